//! Hook targets and the table of original entry points.
//!
//! Every intercepted call forwards to the function the import slot held
//! before patching. The first original captured for a target wins; later
//! modules normally bind the same export, and a module whose slot already
//! holds the interceptor must never overwrite it.
//!
//! When no original was captured (the first patched module imported the
//! function by ordinal, or an earlier hook chain left a stale pointer), the
//! interceptor re-resolves the export by name through a caller-supplied
//! resolver.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Library that exports a hook target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Library {
    Kernel32,
    User32,
}

impl Library {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Kernel32 => "kernel32.dll",
            Self::User32 => "user32.dll",
        }
    }
}

/// An imported function the hook module intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    WriteConsoleA,
    WriteConsoleW,
    WriteFile,
    WriteConsoleOutputCharacterA,
    WriteConsoleOutputCharacterW,
    WriteConsoleOutputAttribute,
    SetConsoleTitleA,
    SetConsoleTitleW,
    LoadLibraryA,
    LoadLibraryW,
    LoadLibraryExA,
    LoadLibraryExW,
    SendMessageA,
    SendMessageW,
}

impl Target {
    pub const ALL: [Target; 14] = [
        Target::WriteConsoleA,
        Target::WriteConsoleW,
        Target::WriteFile,
        Target::WriteConsoleOutputCharacterA,
        Target::WriteConsoleOutputCharacterW,
        Target::WriteConsoleOutputAttribute,
        Target::SetConsoleTitleA,
        Target::SetConsoleTitleW,
        Target::LoadLibraryA,
        Target::LoadLibraryW,
        Target::LoadLibraryExA,
        Target::LoadLibraryExW,
        Target::SendMessageA,
        Target::SendMessageW,
    ];

    pub fn library(self) -> Library {
        match self {
            Self::SendMessageA | Self::SendMessageW => Library::User32,
            _ => Library::Kernel32,
        }
    }

    /// Export name, as it appears in import name tables.
    pub fn name(self) -> &'static str {
        match self {
            Self::WriteConsoleA => "WriteConsoleA",
            Self::WriteConsoleW => "WriteConsoleW",
            Self::WriteFile => "WriteFile",
            Self::WriteConsoleOutputCharacterA => "WriteConsoleOutputCharacterA",
            Self::WriteConsoleOutputCharacterW => "WriteConsoleOutputCharacterW",
            Self::WriteConsoleOutputAttribute => "WriteConsoleOutputAttribute",
            Self::SetConsoleTitleA => "SetConsoleTitleA",
            Self::SetConsoleTitleW => "SetConsoleTitleW",
            Self::LoadLibraryA => "LoadLibraryA",
            Self::LoadLibraryW => "LoadLibraryW",
            Self::LoadLibraryExA => "LoadLibraryExA",
            Self::LoadLibraryExW => "LoadLibraryExW",
            Self::SendMessageA => "SendMessageA",
            Self::SendMessageW => "SendMessageW",
        }
    }

    /// NUL-terminated export name for `GetProcAddress`.
    pub fn c_name(self) -> &'static [u8] {
        match self {
            Self::WriteConsoleA => b"WriteConsoleA\0",
            Self::WriteConsoleW => b"WriteConsoleW\0",
            Self::WriteFile => b"WriteFile\0",
            Self::WriteConsoleOutputCharacterA => b"WriteConsoleOutputCharacterA\0",
            Self::WriteConsoleOutputCharacterW => b"WriteConsoleOutputCharacterW\0",
            Self::WriteConsoleOutputAttribute => b"WriteConsoleOutputAttribute\0",
            Self::SetConsoleTitleA => b"SetConsoleTitleA\0",
            Self::SetConsoleTitleW => b"SetConsoleTitleW\0",
            Self::LoadLibraryA => b"LoadLibraryA\0",
            Self::LoadLibraryW => b"LoadLibraryW\0",
            Self::LoadLibraryExA => b"LoadLibraryExA\0",
            Self::LoadLibraryExW => b"LoadLibraryExW\0",
            Self::SendMessageA => b"SendMessageA\0",
            Self::SendMessageW => b"SendMessageW\0",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Process-wide record of installed hooks.
#[derive(Debug)]
pub struct HookTable {
    originals: [AtomicUsize; Target::ALL.len()],
    /// `(module base, target, value the slot held)` per patched slot.
    installs: Mutex<Vec<(usize, Target, usize)>>,
}

impl Default for HookTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HookTable {
    pub const fn new() -> Self {
        Self {
            originals: [const { AtomicUsize::new(0) }; Target::ALL.len()],
            installs: Mutex::new(Vec::new()),
        }
    }

    /// Record that `module`'s slot for `target` held `original`.
    ///
    /// Returns `true` when this is the first original seen for `target`.
    pub fn record(&self, module: usize, target: Target, original: usize) -> bool {
        if let Ok(mut installs) = self.installs.lock() {
            match installs
                .iter_mut()
                .find(|(m, t, _)| *m == module && *t == target)
            {
                Some(entry) => entry.2 = original,
                None => installs.push((module, target, original)),
            }
        }
        original != 0
            && self.originals[target.index()]
                .compare_exchange(0, original, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// The captured original for `target`, if any.
    pub fn original(&self, target: Target) -> Option<usize> {
        match self.originals[target.index()].load(Ordering::Acquire) {
            0 => None,
            addr => Some(addr),
        }
    }

    /// The captured original, or the address `resolve` finds by name.
    ///
    /// A resolved address is cached so later calls skip the lookup.
    pub fn original_or_resolve(
        &self,
        target: Target,
        resolve: impl FnOnce(Target) -> Option<usize>,
    ) -> Option<usize> {
        if let Some(addr) = self.original(target) {
            return Some(addr);
        }
        let addr = resolve(target)?;
        match self.originals[target.index()].compare_exchange(
            0,
            addr,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Some(addr),
            Err(existing) => Some(existing),
        }
    }

    /// Number of distinct `(module, target)` patches recorded.
    pub fn install_count(&self) -> usize {
        self.installs.lock().map_or(0, |installs| installs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_consistent() {
        for target in Target::ALL {
            let c_name = target.c_name();
            assert_eq!(c_name.last(), Some(&0));
            assert_eq!(&c_name[..c_name.len() - 1], target.name().as_bytes());
        }
    }

    #[test]
    fn indices_are_dense() {
        for (i, target) in Target::ALL.iter().enumerate() {
            assert_eq!(target.index(), i);
        }
    }

    #[test]
    fn only_send_message_lives_in_user32() {
        let user32: Vec<_> = Target::ALL
            .iter()
            .filter(|t| t.library() == Library::User32)
            .collect();
        assert_eq!(user32, vec![&Target::SendMessageA, &Target::SendMessageW]);
    }

    #[test]
    fn first_original_wins() {
        let table = HookTable::new();
        assert!(table.record(0x1000, Target::WriteFile, 0xAAAA));
        assert!(!table.record(0x2000, Target::WriteFile, 0xBBBB));
        assert_eq!(table.original(Target::WriteFile), Some(0xAAAA));
        assert_eq!(table.install_count(), 2);
    }

    #[test]
    fn null_original_is_not_captured() {
        let table = HookTable::new();
        assert!(!table.record(0x1000, Target::WriteConsoleW, 0));
        assert_eq!(table.original(Target::WriteConsoleW), None);
    }

    #[test]
    fn resolve_fills_missing_original_once() {
        let table = HookTable::new();
        let mut calls = 0;
        let addr = table.original_or_resolve(Target::SetConsoleTitleW, |t| {
            calls += 1;
            assert_eq!(t, Target::SetConsoleTitleW);
            Some(0xCAFE)
        });
        assert_eq!(addr, Some(0xCAFE));
        let again = table.original_or_resolve(Target::SetConsoleTitleW, |_| {
            calls += 1;
            None
        });
        assert_eq!(again, Some(0xCAFE));
        assert_eq!(calls, 1);
    }

    #[test]
    fn unresolvable_target_yields_none() {
        let table = HookTable::new();
        assert_eq!(table.original_or_resolve(Target::LoadLibraryW, |_| None), None);
    }
}

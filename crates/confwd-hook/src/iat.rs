//! Import Address Table walking and patching.
//!
//! A [`ModuleImage`] wraps the base address of a mapped PE image and walks
//! its import descriptors by RVA. Every header read goes through
//! `read_unaligned`, so the same code runs against a loaded module or a
//! synthetic image built in a test buffer.
//!
//! Patching swaps one slot at a time. The slot write is delegated to a
//! [`SlotWriter`] so that page protection is handled by the caller's
//! platform layer.
//!
//! # Invariants
//!
//! 1. Only images whose optional-header magic matches the host pointer width
//!    are accepted; thunks are read as `usize`.
//! 2. Descriptors without an original (name) thunk table are skipped: their
//!    names cannot be recovered once the loader has bound the slots.
//! 3. Ordinal imports are never matched by name.
//! 4. Patching a slot that already holds the replacement is reported as
//!    [`PatchOutcome::AlreadyPatched`] and never returned as an "original".

use std::ffi::{CStr, c_char};
use std::mem::size_of;
use std::ptr;

use crate::error::{HookError, Result};

// ---------------------------------------------------------------------------
// Header layout
// ---------------------------------------------------------------------------

const DOS_MAGIC: u16 = 0x5A4D;
const NT_SIGNATURE: u32 = 0x0000_4550;
const E_LFANEW_OFFSET: usize = 0x3C;
const FILE_HEADER_LEN: usize = 20;
const IMPORT_DIRECTORY_INDEX: usize = 1;
const DATA_DIRECTORY_ENTRY_LEN: usize = 8;
const IMPORT_DESCRIPTOR_LEN: usize = 20;

#[cfg(target_pointer_width = "64")]
const OPTIONAL_MAGIC: u16 = 0x20B;
#[cfg(target_pointer_width = "64")]
const DATA_DIRECTORY_OFFSET: usize = 112;

#[cfg(target_pointer_width = "32")]
const OPTIONAL_MAGIC: u16 = 0x10B;
#[cfg(target_pointer_width = "32")]
const DATA_DIRECTORY_OFFSET: usize = 96;

const ORDINAL_FLAG: usize = 1 << (usize::BITS - 1);
const THUNK_LEN: usize = size_of::<usize>();

// ---------------------------------------------------------------------------
// SlotWriter
// ---------------------------------------------------------------------------

/// Stores a pointer into an import slot.
pub trait SlotWriter {
    /// # Safety
    ///
    /// `slot` must point at a pointer-aligned import slot of a mapped image.
    unsafe fn write_slot(&self, slot: *mut usize, value: usize) -> Result<()>;
}

/// Writes the slot in place. Only valid for memory that is already writable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectWrite;

impl SlotWriter for DirectWrite {
    unsafe fn write_slot(&self, slot: *mut usize, value: usize) -> Result<()> {
        unsafe { ptr::write_volatile(slot, value) };
        Ok(())
    }
}

/// Lifts page protection around the write and restores it afterwards.
#[cfg(windows)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtectedWrite;

#[cfg(windows)]
impl SlotWriter for ProtectedWrite {
    unsafe fn write_slot(&self, slot: *mut usize, value: usize) -> Result<()> {
        use windows_sys::Win32::Foundation::GetLastError;
        use windows_sys::Win32::System::Memory::{PAGE_READWRITE, VirtualProtect};

        let mut old = 0u32;
        let ok = unsafe { VirtualProtect(slot.cast(), THUNK_LEN, PAGE_READWRITE, &mut old) };
        if ok == 0 {
            return Err(HookError::Protect {
                slot: slot as usize,
                code: unsafe { GetLastError() },
            });
        }
        unsafe {
            ptr::write_volatile(slot, value);
            VirtualProtect(slot.cast(), THUNK_LEN, old, &mut old);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ModuleImage
// ---------------------------------------------------------------------------

/// Result of [`ModuleImage::patch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The slot now holds the replacement; `original` is what it held before.
    Patched { original: usize },
    /// The slot already held the replacement.
    AlreadyPatched,
    /// The image does not import that function by name.
    NotImported,
}

/// One named or ordinal import.
#[derive(Debug, Clone, Copy)]
pub struct ImportEntry<'a> {
    pub dll: &'a CStr,
    /// `None` for imports by ordinal.
    pub function: Option<&'a CStr>,
    pub slot: *mut usize,
}

impl ImportEntry<'_> {
    fn matches(&self, dll: &str, function: &str) -> bool {
        self.dll.to_bytes().eq_ignore_ascii_case(dll.as_bytes())
            && self.function.is_some_and(|f| f.to_bytes() == function.as_bytes())
    }
}

/// A mapped PE image, addressed by RVA from its base.
#[derive(Debug)]
pub struct ModuleImage {
    base: *mut u8,
    imports_rva: usize,
}

impl ModuleImage {
    /// Validate the headers at `base` and locate the import directory.
    ///
    /// # Safety
    ///
    /// `base` must point at a mapped image whose headers and import tables
    /// remain valid and readable for the lifetime of the returned value.
    pub unsafe fn from_base(base: *mut u8) -> Result<Self> {
        if base.is_null() {
            return Err(HookError::NotAnImage {
                reason: "null base address",
            });
        }
        let probe = Self {
            base,
            imports_rva: 0,
        };

        if probe.read::<u16>(0) != DOS_MAGIC {
            return Err(HookError::NotAnImage {
                reason: "missing MZ signature",
            });
        }
        let nt = usize::try_from(probe.read::<i32>(E_LFANEW_OFFSET)).map_err(|_| {
            HookError::NotAnImage {
                reason: "negative NT header offset",
            }
        })?;
        if probe.read::<u32>(nt) != NT_SIGNATURE {
            return Err(HookError::NotAnImage {
                reason: "missing PE signature",
            });
        }

        let optional = nt + 4 + FILE_HEADER_LEN;
        if probe.read::<u16>(optional) != OPTIONAL_MAGIC {
            return Err(HookError::NotAnImage {
                reason: "optional header does not match host pointer width",
            });
        }

        let directory_count = probe.read::<u32>(optional + DATA_DIRECTORY_OFFSET - 4) as usize;
        if directory_count <= IMPORT_DIRECTORY_INDEX {
            return Err(HookError::NoImportDirectory);
        }
        let entry = optional
            + DATA_DIRECTORY_OFFSET
            + IMPORT_DIRECTORY_INDEX * DATA_DIRECTORY_ENTRY_LEN;
        let imports_rva = probe.read::<u32>(entry) as usize;
        let imports_size = probe.read::<u32>(entry + 4);
        if imports_rva == 0 || imports_size == 0 {
            return Err(HookError::NoImportDirectory);
        }

        Ok(Self { base, imports_rva })
    }

    pub fn base(&self) -> *mut u8 {
        self.base
    }

    fn read<T: Copy>(&self, rva: usize) -> T {
        // SAFETY: `from_base` requires the image to stay mapped and readable.
        unsafe { ptr::read_unaligned(self.base.add(rva).cast::<T>()) }
    }

    fn c_str(&self, rva: usize) -> &CStr {
        // SAFETY: import names are NUL-terminated inside the mapped image.
        unsafe { CStr::from_ptr(self.base.add(rva).cast::<c_char>()) }
    }

    /// Iterate every import entry of every descriptor that carries names.
    pub fn imports(&self) -> Imports<'_> {
        Imports {
            image: self,
            descriptor: 0,
            thunk: 0,
        }
    }

    /// Locate the slot for `dll!function`, comparing the DLL name without case.
    pub fn find(&self, dll: &str, function: &str) -> Option<ImportEntry<'_>> {
        self.imports().find(|entry| entry.matches(dll, function))
    }

    /// Point the slot for `dll!function` at `replacement`.
    ///
    /// # Safety
    ///
    /// `replacement` must be a function with the same ABI and signature as
    /// the import it replaces, and `writer` must be able to write the slot.
    pub unsafe fn patch(
        &self,
        dll: &str,
        function: &str,
        replacement: usize,
        writer: &impl SlotWriter,
    ) -> Result<PatchOutcome> {
        let Some(entry) = self.find(dll, function) else {
            return Ok(PatchOutcome::NotImported);
        };
        let current = unsafe { ptr::read_volatile(entry.slot) };
        if current == replacement {
            return Ok(PatchOutcome::AlreadyPatched);
        }
        unsafe { writer.write_slot(entry.slot, replacement)? };
        Ok(PatchOutcome::Patched { original: current })
    }
}

/// Iterator over [`ImportEntry`] values; see [`ModuleImage::imports`].
pub struct Imports<'a> {
    image: &'a ModuleImage,
    descriptor: usize,
    thunk: usize,
}

impl<'a> Iterator for Imports<'a> {
    type Item = ImportEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let desc = self.image.imports_rva + self.descriptor * IMPORT_DESCRIPTOR_LEN;
            let name_table = self.image.read::<u32>(desc) as usize;
            let dll_name = self.image.read::<u32>(desc + 12) as usize;
            let address_table = self.image.read::<u32>(desc + 16) as usize;

            if dll_name == 0 {
                return None;
            }
            if name_table == 0 || address_table == 0 {
                self.descriptor += 1;
                self.thunk = 0;
                continue;
            }

            let index = self.thunk;
            let thunk = self.image.read::<usize>(name_table + index * THUNK_LEN);
            if thunk == 0 {
                self.descriptor += 1;
                self.thunk = 0;
                continue;
            }
            self.thunk += 1;

            let function = if thunk & ORDINAL_FLAG != 0 {
                None
            } else {
                // IMAGE_IMPORT_BY_NAME: u16 hint, then the name.
                Some(self.image.c_str(thunk + 2))
            };
            let slot_rva = address_table + index * THUNK_LEN;
            // SAFETY: slot lies inside the mapped image.
            let slot = unsafe { self.image.base.add(slot_rva) }.cast::<usize>();

            return Some(ImportEntry {
                dll: self.image.c_str(dll_name),
                function,
                slot,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE_LEN: usize = 0x600;
    const IMPORTS_RVA: usize = 0x200;
    const ORIGINAL_WRITE_FILE: usize = 0x1111;
    const ORIGINAL_WRITE_CONSOLE: usize = 0x2222;

    /// Builds a minimal in-memory PE image with two import descriptors.
    struct SyntheticImage {
        // `u64` storage keeps every slot pointer-aligned.
        words: Vec<u64>,
    }

    impl SyntheticImage {
        fn new() -> Self {
            let mut image = Self {
                words: vec![0; IMAGE_LEN / 8],
            };
            image.put_u16(0, DOS_MAGIC);
            image.put_u32(E_LFANEW_OFFSET, 0x40);
            image.put_u32(0x40, NT_SIGNATURE);
            let optional = 0x40 + 4 + FILE_HEADER_LEN;
            image.put_u16(optional, OPTIONAL_MAGIC);
            image.put_u32(optional + DATA_DIRECTORY_OFFSET - 4, 16);
            let entry = optional + DATA_DIRECTORY_OFFSET + DATA_DIRECTORY_ENTRY_LEN;
            image.put_u32(entry, IMPORTS_RVA as u32);
            image.put_u32(entry + 4, 3 * IMPORT_DESCRIPTOR_LEN as u32);

            // Descriptor 0: KERNEL32.dll with two named imports and one ordinal.
            image.descriptor(0, 0x300, 0x280, 0x380);
            image.put_str(0x280, "KERNEL32.dll");
            image.put_usize(0x300, 0x400);
            image.put_usize(0x300 + THUNK_LEN, 0x420);
            image.put_usize(0x300 + 2 * THUNK_LEN, ORDINAL_FLAG | 5);
            image.put_usize(0x380, ORIGINAL_WRITE_FILE);
            image.put_usize(0x380 + THUNK_LEN, ORIGINAL_WRITE_CONSOLE);
            image.put_usize(0x380 + 2 * THUNK_LEN, 0x3333);
            image.put_str(0x402, "WriteFile");
            image.put_str(0x422, "WriteConsoleW");

            // Descriptor 1: bound imports without a name table.
            image.descriptor(1, 0, 0x290, 0x4C0);
            image.put_str(0x290, "USER32.dll");
            image.put_usize(0x4C0, 0x4444);

            // Descriptor 2: USER32.dll again, with names this time.
            image.descriptor(2, 0x500, 0x2A0, 0x540);
            image.put_str(0x2A0, "user32.dll");
            image.put_usize(0x500, 0x440);
            image.put_str(0x442, "SendMessageW");
            image.put_usize(0x540, 0x5555);
            image
        }

        fn bytes(&mut self) -> &mut [u8] {
            let len = self.words.len() * 8;
            // SAFETY: u64 storage reinterpreted as bytes.
            unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), len) }
        }

        fn base(&mut self) -> *mut u8 {
            self.words.as_mut_ptr().cast()
        }

        fn put_u16(&mut self, at: usize, value: u16) {
            self.bytes()[at..at + 2].copy_from_slice(&value.to_le_bytes());
        }

        fn put_u32(&mut self, at: usize, value: u32) {
            self.bytes()[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }

        fn put_usize(&mut self, at: usize, value: usize) {
            self.bytes()[at..at + THUNK_LEN].copy_from_slice(&value.to_le_bytes());
        }

        fn put_str(&mut self, at: usize, value: &str) {
            let bytes = self.bytes();
            bytes[at..at + value.len()].copy_from_slice(value.as_bytes());
            bytes[at + value.len()] = 0;
        }

        fn descriptor(&mut self, index: usize, names: u32, dll: u32, slots: u32) {
            let at = IMPORTS_RVA + index * IMPORT_DESCRIPTOR_LEN;
            self.put_u32(at, names);
            self.put_u32(at + 12, dll);
            self.put_u32(at + 16, slots);
        }

        fn slot(&mut self, at: usize) -> usize {
            let mut raw = [0u8; THUNK_LEN];
            raw.copy_from_slice(&self.bytes()[at..at + THUNK_LEN]);
            usize::from_le_bytes(raw)
        }
    }

    // ── Header validation ─────────────────────────────────────────────

    #[test]
    fn rejects_missing_mz() {
        let mut image = SyntheticImage::new();
        image.put_u16(0, 0);
        let err = unsafe { ModuleImage::from_base(image.base()) }.unwrap_err();
        assert!(matches!(err, HookError::NotAnImage { .. }));
    }

    #[test]
    fn rejects_foreign_bitness() {
        let mut image = SyntheticImage::new();
        image.put_u16(0x40 + 4 + FILE_HEADER_LEN, 0x107);
        let err = unsafe { ModuleImage::from_base(image.base()) }.unwrap_err();
        assert!(matches!(err, HookError::NotAnImage { .. }));
    }

    #[test]
    fn rejects_missing_import_directory() {
        let mut image = SyntheticImage::new();
        let entry = 0x40 + 4 + FILE_HEADER_LEN + DATA_DIRECTORY_OFFSET + DATA_DIRECTORY_ENTRY_LEN;
        image.put_u32(entry, 0);
        let err = unsafe { ModuleImage::from_base(image.base()) }.unwrap_err();
        assert!(matches!(err, HookError::NoImportDirectory));
    }

    #[test]
    fn null_base_is_not_an_image() {
        let err = unsafe { ModuleImage::from_base(ptr::null_mut()) }.unwrap_err();
        assert!(matches!(err, HookError::NotAnImage { .. }));
    }

    // ── Import walking ────────────────────────────────────────────────

    #[test]
    fn walks_named_and_ordinal_imports() {
        let mut image = SyntheticImage::new();
        let module = unsafe { ModuleImage::from_base(image.base()) }.unwrap();
        let names: Vec<(String, Option<String>)> = module
            .imports()
            .map(|e| {
                (
                    e.dll.to_string_lossy().into_owned(),
                    e.function.map(|f| f.to_string_lossy().into_owned()),
                )
            })
            .collect();
        assert_eq!(
            names,
            vec![
                ("KERNEL32.dll".into(), Some("WriteFile".into())),
                ("KERNEL32.dll".into(), Some("WriteConsoleW".into())),
                ("KERNEL32.dll".into(), None),
                ("user32.dll".into(), Some("SendMessageW".into())),
            ]
        );
    }

    #[test]
    fn find_ignores_dll_case() {
        let mut image = SyntheticImage::new();
        let module = unsafe { ModuleImage::from_base(image.base()) }.unwrap();
        assert!(module.find("kernel32.dll", "WriteConsoleW").is_some());
        assert!(module.find("USER32.DLL", "SendMessageW").is_some());
        assert!(module.find("kernel32.dll", "writeconsolew").is_none());
    }

    // ── Patching ──────────────────────────────────────────────────────

    #[test]
    fn patch_swaps_slot_and_returns_original() {
        let mut image = SyntheticImage::new();
        let module = unsafe { ModuleImage::from_base(image.base()) }.unwrap();
        let outcome =
            unsafe { module.patch("kernel32.dll", "WriteConsoleW", 0xBEEF, &DirectWrite) }.unwrap();
        assert_eq!(
            outcome,
            PatchOutcome::Patched {
                original: ORIGINAL_WRITE_CONSOLE
            }
        );
        assert_eq!(image.slot(0x380 + THUNK_LEN), 0xBEEF);
        assert_eq!(image.slot(0x380), ORIGINAL_WRITE_FILE);
    }

    #[test]
    fn second_patch_is_idempotent() {
        let mut image = SyntheticImage::new();
        let module = unsafe { ModuleImage::from_base(image.base()) }.unwrap();
        unsafe { module.patch("KERNEL32.dll", "WriteFile", 0xBEEF, &DirectWrite) }.unwrap();
        let again =
            unsafe { module.patch("KERNEL32.dll", "WriteFile", 0xBEEF, &DirectWrite) }.unwrap();
        assert_eq!(again, PatchOutcome::AlreadyPatched);
        assert_eq!(image.slot(0x380), 0xBEEF);
    }

    #[test]
    fn missing_import_is_reported() {
        let mut image = SyntheticImage::new();
        let module = unsafe { ModuleImage::from_base(image.base()) }.unwrap();
        let outcome =
            unsafe { module.patch("kernel32.dll", "SetConsoleTitleW", 0xBEEF, &DirectWrite) }
                .unwrap();
        assert_eq!(outcome, PatchOutcome::NotImported);
    }

    #[test]
    fn bound_descriptor_without_names_is_skipped() {
        let mut image = SyntheticImage::new();
        let module = unsafe { ModuleImage::from_base(image.base()) }.unwrap();
        unsafe { module.patch("user32.dll", "SendMessageW", 0xBEEF, &DirectWrite) }.unwrap();
        assert_eq!(image.slot(0x4C0), 0x4444);
        assert_eq!(image.slot(0x540), 0xBEEF);
    }
}

//! Interceptors and their installation across the host's modules.
//!
//! Each interceptor forwards what it observes to [`CHANNEL`], then calls the
//! original entry point with the untouched arguments and returns its result.
//! The host sees no behavioural change apart from the added latency.

use std::ffi::{CStr, c_char, c_void};
use std::mem::{size_of, size_of_val, transmute};
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};

use confwd_wire::MessageKind;
use confwd_wire::text::{utf16_to_utf8, wide_null};
use windows_sys::Win32::Foundation::{BOOL, HANDLE, HMODULE, HWND, LPARAM, LRESULT, WPARAM};
use windows_sys::Win32::System::Console::{COORD, GetConsoleWindow};
use windows_sys::Win32::System::IO::OVERLAPPED;
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows_sys::Win32::System::ProcessStatus::EnumProcessModules;
use windows_sys::Win32::System::Threading::GetCurrentProcess;

use crate::channel::RelayChannel;
use crate::console::{
    ansi_to_utf8, is_console_handle, is_current_stderr, is_status_row, status_attribute,
    stream_kind,
};
use crate::iat::{ModuleImage, PatchOutcome, ProtectedWrite};
use crate::table::{HookTable, Target};

/// Originals for every patched import.
pub(crate) static TABLE: HookTable = HookTable::new();

/// Output pipe to the relay, once connected.
pub(crate) static CHANNEL: RelayChannel<std::fs::File> = RelayChannel::new();

/// Base address of this module; never patched.
static OWN_MODULE: AtomicUsize = AtomicUsize::new(0);

const MAX_MODULES: usize = 256;
const WM_SETICON: u32 = 0x0080;
const ICON_BIG: usize = 1;
const LOAD_LIBRARY_AS_DATAFILE: u32 = 0x0000_0002;
const LOAD_LIBRARY_AS_IMAGE_RESOURCE: u32 = 0x0000_0020;
const LOAD_LIBRARY_AS_DATAFILE_EXCLUSIVE: u32 = 0x0000_0040;
const DATA_ONLY_LOAD: u32 =
    LOAD_LIBRARY_AS_DATAFILE | LOAD_LIBRARY_AS_IMAGE_RESOURCE | LOAD_LIBRARY_AS_DATAFILE_EXCLUSIVE;

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

type WriteConsoleFn =
    unsafe extern "system" fn(HANDLE, *const c_void, u32, *mut u32, *const c_void) -> BOOL;
type WriteFileFn =
    unsafe extern "system" fn(HANDLE, *const u8, u32, *mut u32, *mut OVERLAPPED) -> BOOL;
type WriteOutputCharAFn = unsafe extern "system" fn(HANDLE, *const u8, u32, COORD, *mut u32) -> BOOL;
type WriteOutputWordFn = unsafe extern "system" fn(HANDLE, *const u16, u32, COORD, *mut u32) -> BOOL;
type SetTitleAFn = unsafe extern "system" fn(*const u8) -> BOOL;
type SetTitleWFn = unsafe extern "system" fn(*const u16) -> BOOL;
type LoadLibraryAFn = unsafe extern "system" fn(*const u8) -> HMODULE;
type LoadLibraryWFn = unsafe extern "system" fn(*const u16) -> HMODULE;
type LoadLibraryExAFn = unsafe extern "system" fn(*const u8, HANDLE, u32) -> HMODULE;
type LoadLibraryExWFn = unsafe extern "system" fn(*const u16, HANDLE, u32) -> HMODULE;
type SendMessageFn = unsafe extern "system" fn(HWND, u32, WPARAM, LPARAM) -> LRESULT;

/// Call the original for `$target` as `$ty`, or evaluate `$fallback`.
macro_rules! forward {
    ($target:expr, $ty:ty, ($($arg:expr),*), $fallback:expr) => {
        match original($target) {
            // SAFETY: the table only holds addresses of `$target`'s export.
            Some(addr) => unsafe { transmute::<usize, $ty>(addr)($($arg),*) },
            None => $fallback,
        }
    };
}

fn original(target: Target) -> Option<usize> {
    TABLE.original_or_resolve(target, resolve_export)
}

fn resolve_export(target: Target) -> Option<usize> {
    let library = wide_null(target.library().file_name());
    let module = unsafe { GetModuleHandleW(library.as_ptr()) };
    if module.is_null() {
        return None;
    }
    unsafe { GetProcAddress(module, target.c_name().as_ptr().cast()) }.map(|f| f as usize)
}

/// What a console writer reports when no original could be found.
fn pretend_written(written: *mut u32, count: u32) -> BOOL {
    if !written.is_null() {
        unsafe { *written = count };
    }
    1
}

unsafe fn bytes<'a>(data: *const u8, len: u32) -> Option<&'a [u8]> {
    (!data.is_null() && len > 0).then(|| unsafe { slice::from_raw_parts(data, len as usize) })
}

unsafe fn words<'a>(data: *const u16, len: u32) -> Option<&'a [u16]> {
    (!data.is_null() && len > 0).then(|| unsafe { slice::from_raw_parts(data, len as usize) })
}

unsafe fn wide_c_str<'a>(data: *const u16) -> Option<&'a [u16]> {
    if data.is_null() {
        return None;
    }
    let mut len = 0usize;
    while unsafe { *data.add(len) } != 0 {
        len += 1;
    }
    Some(unsafe { slice::from_raw_parts(data, len) })
}

// ---------------------------------------------------------------------------
// Stream writers
// ---------------------------------------------------------------------------

unsafe extern "system" fn write_console_a(
    console: HANDLE,
    buffer: *const c_void,
    count: u32,
    written: *mut u32,
    reserved: *const c_void,
) -> BOOL {
    if CHANNEL.is_connected() {
        if let Some(data) = unsafe { bytes(buffer.cast(), count) } {
            CHANNEL.send(stream_kind(is_current_stderr(console)), data);
        }
    }
    forward!(
        Target::WriteConsoleA,
        WriteConsoleFn,
        (console, buffer, count, written, reserved),
        pretend_written(written, count)
    )
}

unsafe extern "system" fn write_console_w(
    console: HANDLE,
    buffer: *const c_void,
    count: u32,
    written: *mut u32,
    reserved: *const c_void,
) -> BOOL {
    if CHANNEL.is_connected() {
        if let Some(units) = unsafe { words(buffer.cast(), count) } {
            CHANNEL.send_text(stream_kind(is_current_stderr(console)), &utf16_to_utf8(units));
        }
    }
    forward!(
        Target::WriteConsoleW,
        WriteConsoleFn,
        (console, buffer, count, written, reserved),
        pretend_written(written, count)
    )
}

unsafe extern "system" fn write_file(
    file: HANDLE,
    buffer: *const u8,
    count: u32,
    written: *mut u32,
    overlapped: *mut OVERLAPPED,
) -> BOOL {
    if CHANNEL.is_connected() && is_console_handle(file) {
        if let Some(data) = unsafe { bytes(buffer, count) } {
            CHANNEL.send(stream_kind(is_current_stderr(file)), data);
        }
    }
    forward!(
        Target::WriteFile,
        WriteFileFn,
        (file, buffer, count, written, overlapped),
        0
    )
}

// ---------------------------------------------------------------------------
// Status row
// ---------------------------------------------------------------------------

unsafe extern "system" fn write_output_character_a(
    console: HANDLE,
    chars: *const u8,
    len: u32,
    coord: COORD,
    written: *mut u32,
) -> BOOL {
    if CHANNEL.is_connected() && is_status_row(coord.Y) {
        if let Some(data) = unsafe { bytes(chars, len) } {
            CHANNEL.send(MessageKind::StatusLine, data);
        }
    }
    forward!(
        Target::WriteConsoleOutputCharacterA,
        WriteOutputCharAFn,
        (console, chars, len, coord, written),
        pretend_written(written, len)
    )
}

unsafe extern "system" fn write_output_character_w(
    console: HANDLE,
    chars: *const u16,
    len: u32,
    coord: COORD,
    written: *mut u32,
) -> BOOL {
    if CHANNEL.is_connected() && is_status_row(coord.Y) {
        if let Some(units) = unsafe { words(chars, len) } {
            CHANNEL.send_text(MessageKind::StatusLine, &utf16_to_utf8(units));
        }
    }
    forward!(
        Target::WriteConsoleOutputCharacterW,
        WriteOutputWordFn,
        (console, chars, len, coord, written),
        pretend_written(written, len)
    )
}

unsafe extern "system" fn write_output_attribute(
    console: HANDLE,
    attributes: *const u16,
    len: u32,
    coord: COORD,
    written: *mut u32,
) -> BOOL {
    if CHANNEL.is_connected() && is_status_row(coord.Y) {
        if let Some(attribute) = unsafe { words(attributes, len) }.and_then(status_attribute) {
            CHANNEL.send_attribute(attribute);
        }
    }
    forward!(
        Target::WriteConsoleOutputAttribute,
        WriteOutputWordFn,
        (console, attributes, len, coord, written),
        pretend_written(written, len)
    )
}

// ---------------------------------------------------------------------------
// Title and icon
// ---------------------------------------------------------------------------

unsafe extern "system" fn set_console_title_a(title: *const u8) -> BOOL {
    if CHANNEL.is_connected() && !title.is_null() {
        let raw = unsafe { CStr::from_ptr(title.cast::<c_char>()) };
        CHANNEL.send_text(MessageKind::Title, &ansi_to_utf8(raw.to_bytes()));
    }
    forward!(Target::SetConsoleTitleA, SetTitleAFn, (title), 0)
}

unsafe extern "system" fn set_console_title_w(title: *const u16) -> BOOL {
    if CHANNEL.is_connected() {
        if let Some(units) = unsafe { wide_c_str(title) } {
            CHANNEL.send_text(MessageKind::Title, &utf16_to_utf8(units));
        }
    }
    forward!(Target::SetConsoleTitleW, SetTitleWFn, (title), 0)
}

fn observe_message(window: HWND, message: u32, wparam: WPARAM, lparam: LPARAM) {
    if message != WM_SETICON || wparam != ICON_BIG || !CHANNEL.is_connected() {
        return;
    }
    if window != unsafe { GetConsoleWindow() } {
        return;
    }
    if let Some(icon) = crate::icon::capture(lparam as *mut c_void) {
        CHANNEL.send_icon(&icon);
    }
}

unsafe extern "system" fn send_message_w(
    window: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    observe_message(window, message, wparam, lparam);
    forward!(
        Target::SendMessageW,
        SendMessageFn,
        (window, message, wparam, lparam),
        0
    )
}

unsafe extern "system" fn send_message_a(
    window: HWND,
    message: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    observe_message(window, message, wparam, lparam);
    forward!(
        Target::SendMessageA,
        SendMessageFn,
        (window, message, wparam, lparam),
        0
    )
}

// ---------------------------------------------------------------------------
// Library loads
// ---------------------------------------------------------------------------

fn after_load(module: HMODULE, flags: u32) -> HMODULE {
    if !module.is_null() && flags & DATA_ONLY_LOAD == 0 {
        let patched = hook_loaded_modules();
        if patched > 0 {
            tracing::debug!(patched, "hooked imports after library load");
        }
    }
    module
}

unsafe extern "system" fn load_library_a(name: *const u8) -> HMODULE {
    let module = forward!(Target::LoadLibraryA, LoadLibraryAFn, (name), ptr::null_mut());
    after_load(module, 0)
}

unsafe extern "system" fn load_library_w(name: *const u16) -> HMODULE {
    let module = forward!(Target::LoadLibraryW, LoadLibraryWFn, (name), ptr::null_mut());
    after_load(module, 0)
}

unsafe extern "system" fn load_library_ex_a(name: *const u8, file: HANDLE, flags: u32) -> HMODULE {
    let module = forward!(
        Target::LoadLibraryExA,
        LoadLibraryExAFn,
        (name, file, flags),
        ptr::null_mut()
    );
    after_load(module, flags)
}

unsafe extern "system" fn load_library_ex_w(
    name: *const u16,
    file: HANDLE,
    flags: u32,
) -> HMODULE {
    let module = forward!(
        Target::LoadLibraryExW,
        LoadLibraryExWFn,
        (name, file, flags),
        ptr::null_mut()
    );
    after_load(module, flags)
}

// ---------------------------------------------------------------------------
// Installation
// ---------------------------------------------------------------------------

fn interceptor(target: Target) -> usize {
    match target {
        Target::WriteConsoleA => write_console_a as WriteConsoleFn as usize,
        Target::WriteConsoleW => write_console_w as WriteConsoleFn as usize,
        Target::WriteFile => write_file as WriteFileFn as usize,
        Target::WriteConsoleOutputCharacterA => {
            write_output_character_a as WriteOutputCharAFn as usize
        }
        Target::WriteConsoleOutputCharacterW => {
            write_output_character_w as WriteOutputWordFn as usize
        }
        Target::WriteConsoleOutputAttribute => write_output_attribute as WriteOutputWordFn as usize,
        Target::SetConsoleTitleA => set_console_title_a as SetTitleAFn as usize,
        Target::SetConsoleTitleW => set_console_title_w as SetTitleWFn as usize,
        Target::LoadLibraryA => load_library_a as LoadLibraryAFn as usize,
        Target::LoadLibraryW => load_library_w as LoadLibraryWFn as usize,
        Target::LoadLibraryExA => load_library_ex_a as LoadLibraryExAFn as usize,
        Target::LoadLibraryExW => load_library_ex_w as LoadLibraryExWFn as usize,
        Target::SendMessageA => send_message_a as SendMessageFn as usize,
        Target::SendMessageW => send_message_w as SendMessageFn as usize,
    }
}

/// Remember this module so its own imports are left alone.
pub(crate) fn set_own_module(module: HMODULE) {
    OWN_MODULE.store(module as usize, Ordering::Release);
}

/// Patch every hook target `module` imports. Returns the number of slots
/// patched.
pub(crate) fn hook_module(module: HMODULE) -> usize {
    if module.is_null() || module as usize == OWN_MODULE.load(Ordering::Acquire) {
        return 0;
    }
    // SAFETY: `module` is the base of an image the loader keeps mapped.
    let image = match unsafe { ModuleImage::from_base(module.cast()) } {
        Ok(image) => image,
        Err(error) => {
            tracing::trace!(module = module as usize, %error, "module skipped");
            return 0;
        }
    };

    let mut patched = 0;
    for target in Target::ALL {
        // SAFETY: every interceptor has its target's exact signature.
        let outcome = unsafe {
            image.patch(
                target.library().file_name(),
                target.name(),
                interceptor(target),
                &ProtectedWrite,
            )
        };
        match outcome {
            Ok(PatchOutcome::Patched { original }) => {
                TABLE.record(module as usize, target, original);
                patched += 1;
            }
            Ok(PatchOutcome::AlreadyPatched | PatchOutcome::NotImported) => {}
            Err(error) => {
                tracing::warn!(target = target.name(), %error, "import slot not patched");
            }
        }
    }
    patched
}

/// Patch the main module, then every module currently loaded.
pub(crate) fn hook_loaded_modules() -> usize {
    let main = unsafe { GetModuleHandleW(ptr::null()) };
    let mut patched = hook_module(main);

    let mut modules: [HMODULE; MAX_MODULES] = [ptr::null_mut(); MAX_MODULES];
    let mut needed = 0u32;
    let ok = unsafe {
        EnumProcessModules(
            GetCurrentProcess(),
            modules.as_mut_ptr(),
            size_of_val(&modules) as u32,
            &mut needed,
        )
    };
    if ok == 0 {
        tracing::debug!(
            error = %std::io::Error::last_os_error(),
            "module enumeration failed; only the main module is hooked"
        );
        return patched;
    }
    let count = (needed as usize / size_of::<HMODULE>()).min(MAX_MODULES);
    for &module in &modules[..count] {
        patched += hook_module(module);
    }
    patched
}

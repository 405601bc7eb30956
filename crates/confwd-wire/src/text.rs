//! UTF-16 helpers for the Win32 boundary.

/// Encode `s` as a NUL-terminated UTF-16 buffer.
#[must_use]
pub fn wide_null(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Transcode UTF-16 code units to UTF-8, replacing unpaired surrogates.
#[must_use]
pub fn utf16_to_utf8(units: &[u16]) -> String {
    String::from_utf16_lossy(units)
}

/// Length of a NUL-terminated UTF-16 buffer, or the whole slice if unterminated.
#[must_use]
pub fn wide_len(units: &[u16]) -> usize {
    units.iter().position(|&u| u == 0).unwrap_or(units.len())
}

//! Capture of a window icon into an [`IconImage`].

use confwd_wire::IconImage;

/// Raw bits of one icon bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapData {
    pub width: i32,
    pub height: i32,
    pub bits_per_pixel: u16,
    pub bits: Vec<u8>,
}

/// Combine the colour and mask bitmaps of an icon.
///
/// Monochrome icons have no colour bitmap; their mask holds the AND and XOR
/// planes stacked, so its height is already twice the icon's.
pub fn assemble(
    color: Option<BitmapData>,
    mask: BitmapData,
    hotspot: (u32, u32),
) -> Option<IconImage> {
    if mask.bits.is_empty() {
        return None;
    }
    let (width, height, bits_per_pixel, color) = match color {
        Some(c) if !c.bits.is_empty() => (c.width, c.height, i32::from(c.bits_per_pixel), c.bits),
        _ => (mask.width, mask.height, 1, Vec::new()),
    };
    if width <= 0 || height <= 0 {
        return None;
    }
    Some(IconImage {
        width,
        height,
        bits_per_pixel,
        hotspot_x: i32::try_from(hotspot.0).ok()?,
        hotspot_y: i32::try_from(hotspot.1).ok()?,
        color,
        mask: mask.bits,
    })
}

#[cfg(windows)]
pub use self::win::capture;

#[cfg(windows)]
mod win {
    use std::mem::{size_of, zeroed};

    use confwd_wire::IconImage;
    use windows_sys::Win32::Graphics::Gdi::{BITMAP, DeleteObject, GetBitmapBits, GetObjectW, HBITMAP};
    use windows_sys::Win32::UI::WindowsAndMessaging::{GetIconInfo, HICON, ICONINFO};

    use super::{BitmapData, assemble};

    /// Deletes a GDI bitmap handed out by `GetIconInfo`.
    struct OwnedBitmap(HBITMAP);

    impl Drop for OwnedBitmap {
        fn drop(&mut self) {
            if !self.0.is_null() {
                unsafe { DeleteObject(self.0) };
            }
        }
    }

    impl OwnedBitmap {
        fn read(&self) -> Option<BitmapData> {
            if self.0.is_null() {
                return None;
            }
            let mut bm: BITMAP = unsafe { zeroed() };
            let got = unsafe {
                GetObjectW(self.0, size_of::<BITMAP>() as i32, (&mut bm as *mut BITMAP).cast())
            };
            if got == 0 {
                return None;
            }
            let len = bm.bmWidthBytes.checked_mul(bm.bmHeight)?;
            if len <= 0 {
                return None;
            }
            let mut bits = vec![0u8; len as usize];
            let copied = unsafe { GetBitmapBits(self.0, len, bits.as_mut_ptr().cast()) };
            if copied <= 0 {
                return None;
            }
            bits.truncate(copied as usize);
            Some(BitmapData {
                width: bm.bmWidth,
                height: bm.bmHeight,
                bits_per_pixel: bm.bmBitsPixel,
                bits,
            })
        }
    }

    /// Read the bitmaps behind `icon`. The icon itself is left untouched.
    pub fn capture(icon: HICON) -> Option<IconImage> {
        if icon.is_null() {
            return None;
        }
        let mut info: ICONINFO = unsafe { zeroed() };
        if unsafe { GetIconInfo(icon, &mut info) } == 0 {
            return None;
        }
        let mask = OwnedBitmap(info.hbmMask);
        let color = OwnedBitmap(info.hbmColor);
        assemble(color.read(), mask.read()?, (info.xHotspot, info.yHotspot))
    }
}

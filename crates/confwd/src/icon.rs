//! Splitting a received [`IconImage`] into the planes `CreateIcon` takes.

use confwd_wire::IconImage;

/// Arguments for one `CreateIcon` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconPlanes<'a> {
    pub width: i32,
    pub height: i32,
    pub bits_per_pixel: u8,
    pub and_bits: &'a [u8],
    pub xor_bits: &'a [u8],
}

/// Validate an icon and pick its AND and XOR planes.
///
/// A mask-only icon stacks both monochrome planes in the mask at twice the
/// icon's height. Returns `None` for images that cannot be rebuilt.
#[must_use]
pub fn planes(icon: &IconImage) -> Option<IconPlanes<'_>> {
    if icon.width <= 0 || icon.height <= 0 || icon.mask.is_empty() {
        return None;
    }
    if icon.is_mask_only() {
        if icon.height < 2 || icon.mask.len() % 2 != 0 {
            return None;
        }
        let (and_bits, xor_bits) = icon.mask.split_at(icon.mask.len() / 2);
        return Some(IconPlanes {
            width: icon.width,
            height: icon.height / 2,
            bits_per_pixel: 1,
            and_bits,
            xor_bits,
        });
    }
    let bits_per_pixel = u8::try_from(icon.bits_per_pixel).ok()?;
    if !matches!(bits_per_pixel, 1 | 4 | 8 | 16 | 24 | 32) {
        return None;
    }
    Some(IconPlanes {
        width: icon.width,
        height: icon.height,
        bits_per_pixel,
        and_bits: &icon.mask,
        xor_bits: &icon.color,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colour_icon() -> IconImage {
        IconImage {
            width: 32,
            height: 32,
            bits_per_pixel: 32,
            color: vec![0xAB; 32 * 32 * 4],
            mask: vec![0x00; 32 * 4],
            ..IconImage::default()
        }
    }

    #[test]
    fn colour_icon_uses_both_buffers() {
        let icon = colour_icon();
        let planes = planes(&icon).unwrap();
        assert_eq!((planes.width, planes.height, planes.bits_per_pixel), (32, 32, 32));
        assert_eq!(planes.and_bits.len(), 128);
        assert_eq!(planes.xor_bits.len(), 4096);
    }

    #[test]
    fn mask_only_icon_splits_stacked_planes() {
        let mut mask = vec![0xFF; 64];
        mask.extend(vec![0x00; 64]);
        let icon = IconImage {
            width: 32,
            height: 32,
            bits_per_pixel: 1,
            mask,
            ..IconImage::default()
        };
        let planes = planes(&icon).unwrap();
        assert_eq!(planes.height, 16);
        assert_eq!(planes.bits_per_pixel, 1);
        assert!(planes.and_bits.iter().all(|b| *b == 0xFF));
        assert!(planes.xor_bits.iter().all(|b| *b == 0x00));
    }

    #[test]
    fn degenerate_icons_are_rejected() {
        let mut icon = colour_icon();
        icon.bits_per_pixel = 7;
        assert!(planes(&icon).is_none());

        let mut icon = colour_icon();
        icon.width = 0;
        assert!(planes(&icon).is_none());

        let mut icon = colour_icon();
        icon.mask.clear();
        assert!(planes(&icon).is_none());

        let odd = IconImage {
            width: 16,
            height: 32,
            bits_per_pixel: 1,
            mask: vec![0; 3],
            ..IconImage::default()
        };
        assert!(planes(&odd).is_none());
    }
}

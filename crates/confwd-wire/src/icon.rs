//! `Icon` frame payload.
//!
//! The hook module serializes the bitmap behind a big-icon change so the
//! launcher can rebuild an equivalent icon on its own window:
//!
//! ```text
//! width, height, bitsPerPixel, hotspotX, hotspotY,
//! colorDataSize, maskDataSize          (7 x i32, little-endian)
//! colorData[colorDataSize]
//! maskData[maskDataSize]
//! ```
//!
//! A monochrome icon has no colour bitmap; it is sent with
//! `colorDataSize = 0` and the whole image in the mask.

use crate::error::CodecError;

/// Fixed header: seven little-endian `i32` fields.
pub const ICON_HEADER_LEN: usize = 7 * 4;

/// Decoded icon bitmap data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IconImage {
    pub width: i32,
    pub height: i32,
    pub bits_per_pixel: i32,
    pub hotspot_x: i32,
    pub hotspot_y: i32,
    pub color: Vec<u8>,
    pub mask: Vec<u8>,
}

impl IconImage {
    /// `true` when the icon carries only a monochrome mask.
    #[must_use]
    pub fn is_mask_only(&self) -> bool {
        self.color.is_empty()
    }

    /// Serialize into the wire layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let color_len = i32::try_from(self.color.len()).map_err(|_| CodecError::InvalidIcon {
            reason: "colour data exceeds i32",
        })?;
        let mask_len = i32::try_from(self.mask.len()).map_err(|_| CodecError::InvalidIcon {
            reason: "mask data exceeds i32",
        })?;

        let mut buf = Vec::with_capacity(ICON_HEADER_LEN + self.color.len() + self.mask.len());
        for field in [
            self.width,
            self.height,
            self.bits_per_pixel,
            self.hotspot_x,
            self.hotspot_y,
            color_len,
            mask_len,
        ] {
            buf.extend_from_slice(&field.to_le_bytes());
        }
        buf.extend_from_slice(&self.color);
        buf.extend_from_slice(&self.mask);
        Ok(buf)
    }

    /// Parse the wire layout. The buffer must hold exactly one icon.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < ICON_HEADER_LEN {
            return Err(CodecError::Truncated {
                expected: ICON_HEADER_LEN,
                available: buf.len(),
            });
        }

        let field = |index: usize| {
            let at = index * 4;
            i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
        };

        let color_len = usize::try_from(field(5)).map_err(|_| CodecError::InvalidIcon {
            reason: "negative colour data size",
        })?;
        let mask_len = usize::try_from(field(6)).map_err(|_| CodecError::InvalidIcon {
            reason: "negative mask data size",
        })?;

        let expected = ICON_HEADER_LEN
            .checked_add(color_len)
            .and_then(|n| n.checked_add(mask_len))
            .ok_or(CodecError::InvalidIcon {
                reason: "data sizes overflow",
            })?;
        if buf.len() < expected {
            return Err(CodecError::Truncated {
                expected,
                available: buf.len(),
            });
        }
        if buf.len() > expected {
            return Err(CodecError::TrailingBytes {
                frame_len: expected,
                buffer_len: buf.len(),
            });
        }

        let color_end = ICON_HEADER_LEN + color_len;
        let image = Self {
            width: field(0),
            height: field(1),
            bits_per_pixel: field(2),
            hotspot_x: field(3),
            hotspot_y: field(4),
            color: buf[ICON_HEADER_LEN..color_end].to_vec(),
            mask: buf[color_end..expected].to_vec(),
        };

        if image.width <= 0 || image.height <= 0 {
            return Err(CodecError::InvalidIcon {
                reason: "non-positive dimensions",
            });
        }
        if image.mask.is_empty() {
            return Err(CodecError::InvalidIcon {
                reason: "icon without mask data",
            });
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IconImage {
        IconImage {
            width: 32,
            height: 32,
            bits_per_pixel: 32,
            hotspot_x: 16,
            hotspot_y: 16,
            color: vec![0x11; 32 * 32 * 4],
            mask: vec![0x00; 32 * 32 / 8],
        }
    }

    #[test]
    fn header_layout() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(&bytes[0..4], &32i32.to_le_bytes());
        assert_eq!(&bytes[20..24], &(4096i32).to_le_bytes());
        assert_eq!(&bytes[24..28], &(128i32).to_le_bytes());
        assert_eq!(bytes.len(), ICON_HEADER_LEN + 4096 + 128);
    }

    #[test]
    fn roundtrip_colour_icon() {
        let image = sample();
        let parsed = IconImage::from_bytes(&image.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, image);
        assert!(!parsed.is_mask_only());
    }

    #[test]
    fn mask_only_icon_needs_no_colour_data() {
        // Monochrome icons stack AND and XOR masks: height is doubled.
        let image = IconImage {
            width: 16,
            height: 32,
            bits_per_pixel: 1,
            color: Vec::new(),
            mask: vec![0xF0; 16 * 32 / 8],
            ..IconImage::default()
        };
        let parsed = IconImage::from_bytes(&image.to_bytes().unwrap()).unwrap();
        assert!(parsed.is_mask_only());
        assert_eq!(parsed.mask.len(), 64);
        assert_eq!(parsed, image);
    }

    #[test]
    fn negative_size_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[20..24].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(matches!(
            IconImage::from_bytes(&bytes),
            Err(CodecError::InvalidIcon { .. })
        ));
    }

    #[test]
    fn short_data_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.pop();
        assert!(matches!(
            IconImage::from_bytes(&bytes),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_data_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(
            IconImage::from_bytes(&bytes),
            Err(CodecError::TrailingBytes { .. })
        ));
    }

    #[test]
    fn missing_mask_rejected() {
        let image = IconImage {
            mask: Vec::new(),
            ..sample()
        };
        assert!(matches!(
            IconImage::from_bytes(&image.to_bytes().unwrap()),
            Err(CodecError::InvalidIcon { .. })
        ));
    }

    #[test]
    fn header_too_short() {
        assert!(matches!(
            IconImage::from_bytes(&[0; 10]),
            Err(CodecError::Truncated {
                expected: ICON_HEADER_LEN,
                available: 10
            })
        ));
    }
}

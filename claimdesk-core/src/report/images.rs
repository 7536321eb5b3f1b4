//! Image decoding for the photo grid and upload sniffing.

use image::{DynamicImage, ImageFormat};

/// Decoded photo ready for embedding as raw RGB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl DecodedImage {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Decode any supported format and shrink so neither edge exceeds
/// `max_edge`, keeping the aspect ratio.
pub fn decode(bytes: &[u8], max_edge: u32) -> Result<DecodedImage, image::ImageError> {
    let mut img = image::load_from_memory(bytes)?;
    if max_edge > 0 && (img.width() > max_edge || img.height() > max_edge) {
        img = img.thumbnail(max_edge, max_edge);
    }
    Ok(into_rgb(img))
}

fn into_rgb(img: DynamicImage) -> DecodedImage {
    let rgb = img.to_rgb8();
    DecodedImage {
        width: rgb.width(),
        height: rgb.height(),
        rgb: rgb.into_raw(),
    }
}

/// Upload formats accepted by the intake endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageKind {
    pub extension: &'static str,
    pub mime: &'static str,
}

/// Identify an upload from its magic bytes.
pub fn sniff(bytes: &[u8]) -> Option<ImageKind> {
    let kind = match image::guess_format(bytes).ok()? {
        ImageFormat::Jpeg => ImageKind { extension: "jpg", mime: "image/jpeg" },
        ImageFormat::Png => ImageKind { extension: "png", mime: "image/png" },
        ImageFormat::WebP => ImageKind { extension: "webp", mime: "image/webp" },
        ImageFormat::Gif => ImageKind { extension: "gif", mime: "image/gif" },
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
pub(crate) fn encode_png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([30, 90, 200]),
    ));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_shrinks_large_images() {
        let png = encode_png(1600, 800);
        let decoded = decode(&png, 800).unwrap();
        assert_eq!(decoded.size(), (800, 400));
        assert_eq!(decoded.rgb.len(), 800 * 400 * 3);
    }

    #[test]
    fn test_decode_keeps_small_images() {
        let decoded = decode(&encode_png(20, 10), 800).unwrap();
        assert_eq!(decoded.size(), (20, 10));
        assert_eq!(&decoded.rgb[..3], &[30, 90, 200]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(b"<html>not found</html>", 800).is_err());
    }

    #[test]
    fn test_sniff_formats() {
        assert_eq!(sniff(&encode_png(2, 2)).map(|k| k.extension), Some("png"));
        assert_eq!(
            sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]).map(|k| k.mime),
            Some("image/jpeg")
        );
        assert_eq!(sniff(b"%PDF-1.5"), None);
    }
}

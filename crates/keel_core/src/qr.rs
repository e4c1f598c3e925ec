//! QR rendering for transfer codes.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;

use crate::error::CoreError;

pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

fn encode(data: &str) -> Result<QrCode, CoreError> {
    QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)
        .map_err(|e| CoreError::Qr(e.to_string()))
}

/// PNG bytes of `data`, `module_size` pixels per module, with quiet zone.
pub fn render_png(data: &str, module_size: u32) -> Result<Vec<u8>, CoreError> {
    let image = encode(data)?
        .render::<Luma<u8>>()
        .module_dimensions(module_size, module_size)
        .quiet_zone(true)
        .build();
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| CoreError::Qr(e.to_string()))?;
    Ok(png)
}

pub fn data_url(data: &str, module_size: u32) -> Result<String, CoreError> {
    let png = render_png(data, module_size)?;
    Ok(format!("{PNG_DATA_URL_PREFIX}{}", STANDARD.encode(png)))
}

/// Block-character rendering for terminals.
pub fn render_text(data: &str) -> Result<String, CoreError> {
    Ok(encode(data)?
        .render::<char>()
        .light_color(' ')
        .dark_color('█')
        .module_dimensions(2, 1)
        .quiet_zone(true)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_has_signature_and_grows_with_module_size() {
        let small = render_png("hello", 2).unwrap();
        let large = render_png("hello", 8).unwrap();
        assert_eq!(&small[..8], b"\x89PNG\r\n\x1a\n");
        let small_img = image::load_from_memory(&small).unwrap();
        let large_img = image::load_from_memory(&large).unwrap();
        assert!(large_img.width() > small_img.width());
        assert_eq!(large_img.width(), large_img.height());
    }

    #[test]
    fn data_url_prefix() {
        let url = data_url("hello", 8).unwrap();
        assert!(url.starts_with(PNG_DATA_URL_PREFIX));
        let png = STANDARD.decode(&url[PNG_DATA_URL_PREFIX.len()..]).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
    }

    #[test]
    fn text_rendering_is_multiline() {
        let text = render_text("hello").unwrap();
        assert!(text.lines().count() > 10);
        assert!(text.contains('█'));
    }
}

//! Pairing challenge rendering.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use qrcode::QrCode;
use qrcode::render::svg;
use qrcode::types::QrError;

/// Render a pairing challenge as an SVG `data:` URL.
///
/// Payloads that already are `data:` URLs are returned unchanged.
pub fn render_qr_data_url(payload: &str) -> Result<String, QrError> {
    if payload.starts_with("data:") {
        return Ok(payload.to_string());
    }

    let code = QrCode::new(payload.as_bytes())?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .quiet_zone(true)
        .build();

    Ok(format!(
        "data:image/svg+xml;base64,{}",
        STANDARD.encode(image.as_bytes())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renders_svg_data_url() {
        let url = render_qr_data_url("2@Xq9fK0,aBcD==,ZZZ,1").unwrap();
        let encoded = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn test_data_url_passes_through() {
        let url = "data:image/png;base64,iVBORw0KGgo=";
        assert_eq!(render_qr_data_url(url).unwrap(), url);
    }
}

use qrmate_core::{domain::Frame, errors::Error, ports::FrameDecoder, Result};

/// Decode the first readable QR symbol in an RGBA buffer.
///
/// A frame without a readable symbol is `Ok(None)`; only a buffer whose size does
/// not match `width * height * 4` is an error.
pub fn decode_rgba(pixels: &[u8], width: u32, height: u32) -> Result<Option<String>> {
    let (w, h) = (width as usize, height as usize);
    let expected = w
        .checked_mul(h)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| Error::InvalidFrame(format!("frame too large: {width}x{height}")))?;
    if pixels.len() != expected {
        return Err(Error::InvalidFrame(format!(
            "expected {expected} bytes for {width}x{height} RGBA, got {}",
            pixels.len()
        )));
    }
    if w == 0 || h == 0 {
        return Ok(None);
    }

    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| {
        let i = (y * w + x) * 4;
        luma(pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3])
    });

    for grid in prepared.detect_grids() {
        match grid.decode() {
            Ok((_, content)) => return Ok(Some(content)),
            Err(e) => tracing::debug!(error = %e, "qr grid found but not decodable"),
        }
    }
    Ok(None)
}

/// Decode an uploaded image file (PNG, JPEG, WebP).
pub fn decode_image_bytes(bytes: &[u8]) -> Result<Option<String>> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::Image(format!("unreadable image: {e}")))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    decode_rgba(img.as_raw(), width, height)
}

/// Rec. 601 luma, composited over white so transparent areas read as light.
fn luma(r: u8, g: u8, b: u8, a: u8) -> u8 {
    let y = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
    let a = a as u32;
    ((y * a + 255 * (255 - a)) / 255) as u8
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QrDecoder;

impl FrameDecoder for QrDecoder {
    fn decode_frame(&self, frame: &Frame) -> Result<Option<String>> {
        decode_rgba(&frame.rgba, frame.width, frame.height)
    }
}

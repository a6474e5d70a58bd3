//! QR image decoding (`rqrr`) and rendering (`qrcode` + `image`).

pub mod decoder;
pub mod renderer;

pub use decoder::{decode_image_bytes, decode_rgba, QrDecoder};
pub use renderer::{QrRenderer, QrStyle, QrView, RenderedQr};

use std::io::Cursor;

use base64::{engine::general_purpose, Engine as _};
use image::{imageops, DynamicImage, ImageFormat, Rgba, RgbaImage};
use qrcode::{EcLevel, QrCode};

use qrmate_core::{config::Config, errors::Error, Result};

/// Largest share of the symbol width a centered logo may cover, in percent.
const LOGO_MAX_PERCENT: u32 = 20;

#[derive(Clone, Copy, Debug)]
pub struct QrStyle {
    pub module_px: u32,
    pub border: u32,
    pub dark: Rgba<u8>,
    pub light: Rgba<u8>,
}

impl Default for QrStyle {
    fn default() -> Self {
        Self {
            module_px: 10,
            border: 4,
            dark: Rgba([0, 0, 0, 255]),
            light: Rgba([255, 255, 255, 255]),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedQr {
    pub png: Vec<u8>,
    pub size: u32,
}

impl RenderedQr {
    /// `data:image/png;base64,...` for embedding in HTML.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(&self.png)
        )
    }
}

/// Renders strings as QR images. Error correction is always level H so a
/// centered logo does not make the code unreadable.
#[derive(Clone, Debug, Default)]
pub struct QrRenderer {
    style: QrStyle,
    logo: Option<RgbaImage>,
}

impl QrRenderer {
    pub fn new(style: QrStyle) -> Self {
        Self { style, logo: None }
    }

    pub fn with_logo(mut self, logo: RgbaImage) -> Self {
        self.logo = Some(logo);
        self
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let renderer = Self::new(QrStyle {
            module_px: cfg.qr_module_px.max(1),
            border: cfg.qr_border,
            ..QrStyle::default()
        });
        match &cfg.qr_logo_path {
            Some(path) => {
                let logo = image::open(path)
                    .map_err(|e| Error::Image(format!("logo {}: {e}", path.display())))?
                    .to_rgba8();
                Ok(renderer.with_logo(logo))
            }
            None => Ok(renderer),
        }
    }

    pub fn render_image(&self, data: &str) -> Result<RgbaImage> {
        let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::H)
            .map_err(|e| Error::Qr(format!("cannot encode {} bytes: {e}", data.len())))?;

        let QrStyle {
            module_px,
            border,
            dark,
            light,
        } = self.style;
        let modules = code.width() as u32;
        let size = (modules + 2 * border) * module_px;

        let mut img = RgbaImage::from_pixel(size, size, light);
        for y in 0..modules {
            for x in 0..modules {
                if code[(x as usize, y as usize)] != qrcode::Color::Dark {
                    continue;
                }
                let (px, py) = ((border + x) * module_px, (border + y) * module_px);
                for dy in 0..module_px {
                    for dx in 0..module_px {
                        img.put_pixel(px + dx, py + dy, dark);
                    }
                }
            }
        }

        if let Some(logo) = &self.logo {
            self.overlay_logo(&mut img, logo, modules * module_px);
        }
        Ok(img)
    }

    pub fn render(&self, data: &str) -> Result<RenderedQr> {
        let img = self.render_image(data)?;
        let size = img.width();
        let mut png = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| Error::Image(format!("png encode failed: {e}")))?;
        Ok(RenderedQr { png, size })
    }

    fn overlay_logo(&self, img: &mut RgbaImage, logo: &RgbaImage, symbol_px: u32) {
        let max = (symbol_px * LOGO_MAX_PERCENT / 100).max(1);
        let (lw, lh) = logo.dimensions();
        if lw == 0 || lh == 0 {
            return;
        }
        let scale = f64::from(max) / f64::from(lw.max(lh));
        let (w, h) = (
            ((f64::from(lw) * scale) as u32).max(1),
            ((f64::from(lh) * scale) as u32).max(1),
        );
        let scaled = imageops::resize(logo, w, h, imageops::FilterType::Lanczos3);

        let pad = self.style.module_px;
        let cx = img.width() / 2;
        let cy = img.height() / 2;
        let (x0, y0) = (cx - w / 2, cy - h / 2);
        for y in y0.saturating_sub(pad)..(y0 + h + pad).min(img.height()) {
            for x in x0.saturating_sub(pad)..(x0 + w + pad).min(img.width()) {
                img.put_pixel(x, y, self.style.light);
            }
        }
        imageops::overlay(img, &scaled, i64::from(x0), i64::from(y0));
    }
}

/// Holds the QR for the current input; regenerates only when the input changes.
#[derive(Debug)]
pub struct QrView {
    renderer: QrRenderer,
    input: Option<String>,
    output: Option<RenderedQr>,
    renders: u64,
}

impl QrView {
    pub fn new(renderer: QrRenderer) -> Self {
        Self {
            renderer,
            input: None,
            output: None,
            renders: 0,
        }
    }

    pub fn update(&mut self, input: &str) -> Result<&RenderedQr> {
        let stale = self.input.as_deref() != Some(input) || self.output.is_none();
        if stale {
            // Replace atomically: a failed render clears the old output.
            self.output = None;
            self.input = Some(input.to_string());
            self.output = Some(self.renderer.render(input)?);
            self.renders += 1;
        }
        self.output
            .as_ref()
            .ok_or_else(|| Error::Qr("no rendered output".to_string()))
    }

    pub fn current(&self) -> Option<&RenderedQr> {
        self.output.as_ref()
    }

    pub fn render_count(&self) -> u64 {
        self.renders
    }
}

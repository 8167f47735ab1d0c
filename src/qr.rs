// WiFi QR code generation with a centre logo overlay

use ::image::{DynamicImage, Luma, RgbImage, Rgba};
use clap::ValueEnum;
use qrcode::{EcLevel, QrCode};

use crate::AppError;

/// Authentication type encoded in the WIFI payload.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    Wpa,
    Wep,
    Nopass,
}

impl Security {
    fn token(self) -> &'static str {
        match self {
            Security::Wpa => "WPA",
            Security::Wep => "WEP",
            Security::Nopass => "nopass",
        }
    }
}

/// Credentials for the network the QR code should join.
pub struct WifiNetwork {
    pub ssid: String,
    pub password: String,
    pub security: Security,
}

impl WifiNetwork {
    /// Build the `WIFI:T:...;S:...;P:...;;` payload.
    ///
    /// Reserved characters in the SSID and password are backslash-escaped;
    /// open networks omit the password field entirely.
    pub fn qr_payload(&self) -> String {
        let ssid = escape_field(&self.ssid);
        match self.security {
            Security::Nopass => format!("WIFI:T:nopass;S:{};;", ssid),
            sec => format!(
                "WIFI:T:{};S:{};P:{};;",
                sec.token(),
                ssid,
                escape_field(&self.password)
            ),
        }
    }
}

/// Escape the characters reserved by the WIFI URI format.
fn escape_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if matches!(c, '\\' | ';' | ',' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Rendering options for the QR bitmap.
pub struct QrStyle {
    /// Pixels per QR module.
    pub module_px: u32,
    /// Fraction of the QR width covered by the logo.
    pub logo_coverage: f32,
}

impl Default for QrStyle {
    fn default() -> Self {
        Self {
            module_px: 10,
            logo_coverage: 0.2,
        }
    }
}

/// A rendered QR bitmap, ready to save or embed in a PDF.
pub struct RenderedQr {
    pub image: RgbImage,
}

/// Render the WiFi QR code, overlaying `logo` on its centre when given.
///
/// Error correction is fixed at level H: the logo destroys the modules it
/// covers and the symbol has to survive that.
pub fn encode(
    network: &WifiNetwork,
    logo: Option<&DynamicImage>,
    style: &QrStyle,
) -> Result<RenderedQr, AppError> {
    let payload = network.qr_payload();
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::H)
        .map_err(|e| AppError::QrError(e.to_string()))?;

    let qr = code
        .render::<Luma<u8>>()
        .module_dimensions(style.module_px.max(1), style.module_px.max(1))
        .build();
    let mut image = DynamicImage::ImageLuma8(qr).to_rgb8();

    if let Some(logo) = logo {
        overlay_logo(&mut image, logo, style.logo_coverage);
    }

    Ok(RenderedQr { image })
}

/// Alpha-composite the logo over the centre of the QR bitmap.
fn overlay_logo(qr: &mut RgbImage, logo: &DynamicImage, coverage: f32) {
    let coverage = coverage.clamp(0.05, 0.4);
    let target = ((qr.width() as f32) * coverage).round().max(1.0) as u32;
    let thumb = logo.thumbnail(target, target).to_rgba8();

    let x0 = (qr.width() - thumb.width()) / 2;
    let y0 = (qr.height() - thumb.height()) / 2;

    for (x, y, pixel) in thumb.enumerate_pixels() {
        let Rgba([r, g, b, a]) = *pixel;
        let alpha = a as f32 / 255.0;
        let under = qr.get_pixel(x0 + x, y0 + y);
        let blend = |fg: u8, bg: u8| (fg as f32 * alpha + bg as f32 * (1.0 - alpha)) as u8;
        qr.put_pixel(
            x0 + x,
            y0 + y,
            ::image::Rgb([blend(r, under[0]), blend(g, under[1]), blend(b, under[2])]),
        );
    }
}

//! Image-to-printer-language encoders.
//!
//! The bridge treats rasterisation as a pluggable collaborator: anything that
//! implements [`ImageEncoder`] can turn image file bytes into printer command
//! bytes.  [`EscPosRasterEncoder`] is the built-in implementation for ESC/POS
//! receipt printers using the `GS v 0` raster bit image command.

use std::fmt;
use std::str::FromStr;

use image::GenericImageView;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Widest raster accepted by common 58 mm and 80 mm receipt printers.
pub const DEFAULT_MAX_WIDTH_DOTS: u32 = 384;

/// Errors raised while rasterising an image.
#[derive(Debug, Error, PartialEq)]
pub enum ImageError {
    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("image encoding for {0} printers is not supported")]
    UnsupportedLanguage(PrinterLanguage),

    #[error("image is too large to rasterise: {width}x{height}")]
    TooLarge { width: u32, height: u32 },
}

/// Printer command languages a client may ask an image to be encoded for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum PrinterLanguage {
    #[default]
    EscPos,
    Epl,
    Zpl,
    Cpcl,
}

impl FromStr for PrinterLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ESCP" | "ESCPOS" | "ESC/POS" | "ESCP2" => Ok(Self::EscPos),
            "EPL" | "EPL2" => Ok(Self::Epl),
            "ZPL" | "ZPLII" => Ok(Self::Zpl),
            "CPCL" => Ok(Self::Cpcl),
            other => Err(format!("unknown printer language '{other}'")),
        }
    }
}

impl TryFrom<String> for PrinterLanguage {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for PrinterLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EscPos => "ESC/POS",
            Self::Epl => "EPL",
            Self::Zpl => "ZPL",
            Self::Cpcl => "CPCL",
        };
        f.write_str(name)
    }
}

/// Dot density of the printed raster.
///
/// `Single` prints one dot per pixel; `Double` scales every pixel to a 2×2
/// block of dots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Density {
    #[default]
    Single,
    Double,
}

impl Density {
    /// The `m` parameter of `GS v 0`.
    fn raster_mode(self) -> u8 {
        match self {
            Self::Single => 0,
            Self::Double => 3,
        }
    }
}

/// One image to rasterise.
#[derive(Debug, Clone, Copy)]
pub struct ImageRequest<'a> {
    /// Encoded image file bytes (PNG, JPEG, GIF or BMP).
    pub data: &'a [u8],
    pub language: PrinterLanguage,
    pub density: Density,
}

/// Converts an image into printer command bytes.
pub trait ImageEncoder: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ImageError`] if the image cannot be decoded or the requested
    /// printer language is not handled by this encoder.
    fn encode(&self, request: &ImageRequest<'_>) -> Result<Vec<u8>, ImageError>;
}

/// ESC/POS `GS v 0` raster encoder.
///
/// Images wider than `max_width_dots` are scaled down keeping the aspect
/// ratio.  Pixels are printed black when opaque (alpha ≥ 128) and darker
/// than mid-grey.
#[derive(Debug, Clone)]
pub struct EscPosRasterEncoder {
    max_width_dots: u32,
}

impl Default for EscPosRasterEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WIDTH_DOTS)
    }
}

impl EscPosRasterEncoder {
    pub fn new(max_width_dots: u32) -> Self {
        Self {
            max_width_dots: max_width_dots.max(8),
        }
    }
}

impl ImageEncoder for EscPosRasterEncoder {
    fn encode(&self, request: &ImageRequest<'_>) -> Result<Vec<u8>, ImageError> {
        if request.language != PrinterLanguage::EscPos {
            return Err(ImageError::UnsupportedLanguage(request.language));
        }

        let img = image::load_from_memory(request.data)
            .map_err(|e| ImageError::Decode(e.to_string()))?;
        let (w, h) = img.dimensions();

        let (new_w, new_h) = if w > self.max_width_dots {
            let ratio = f64::from(self.max_width_dots) / f64::from(w);
            (self.max_width_dots, ((f64::from(h) * ratio) as u32).max(1))
        } else {
            (w, h)
        };

        let x_bytes = new_w.div_ceil(8);
        let x_bytes_header =
            u16::try_from(x_bytes).map_err(|_| ImageError::TooLarge { width: new_w, height: new_h })?;
        let height_header =
            u16::try_from(new_h).map_err(|_| ImageError::TooLarge { width: new_w, height: new_h })?;

        let rgba = img
            .resize_exact(new_w, new_h, image::imageops::FilterType::Nearest)
            .to_rgba8();

        let mut data = Vec::with_capacity(8 + (x_bytes * new_h) as usize);
        data.extend_from_slice(&[0x1D, 0x76, 0x30, request.density.raster_mode()]);
        data.extend_from_slice(&x_bytes_header.to_le_bytes());
        data.extend_from_slice(&height_header.to_le_bytes());

        for y in 0..new_h {
            for x_byte in 0..x_bytes {
                let mut byte = 0u8;
                for bit in 0..8 {
                    let x = x_byte * 8 + bit;
                    if x >= new_w {
                        break;
                    }
                    let pixel = rgba.get_pixel(x, y);
                    // Transparent pixels stay white.
                    if pixel[3] >= 128 {
                        let luma = 0.299 * f32::from(pixel[0])
                            + 0.587 * f32::from(pixel[1])
                            + 0.114 * f32::from(pixel[2]);
                        if luma < 128.0 {
                            byte |= 1 << (7 - bit);
                        }
                    }
                }
                data.push(byte);
            }
        }

        debug!(width = new_w, height = new_h, bytes = data.len(), "rasterised image");
        Ok(data)
    }
}

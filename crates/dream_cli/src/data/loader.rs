use ndarray::Array3;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;

use dream_core::CHANNELS;

/// 16-bit samples are brought to the 8-bit range the model expects.
const U16_TO_U8: f32 = 1.0 / 257.0;

#[derive(Debug, Error)]
pub enum DataLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),
}

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "tif" | "tiff"))
        .unwrap_or(false)
}

/// Load an image as `[height, width, 3]` floats in the 0..255 range.
///
/// JPEG and PNG go through the `image` crate. TIFF files are read directly so
/// float images saved by a previous run come back unquantized.
pub fn load_image(path: &Path) -> Result<Array3<f32>, DataLoadError> {
    if is_tiff(path) {
        return load_tiff_image(path);
    }

    let rgb = image::open(path)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    let data: Vec<f32> = rgb.into_raw().into_iter().map(f32::from).collect();
    Array3::from_shape_vec((height as usize, width as usize, CHANNELS), data)
        .map_err(|e| DataLoadError::InvalidDimensions(e.to_string()))
}

/// Load a single-page greyscale or RGB(A) TIFF.
/// Greyscale is broadcast to three channels and alpha is dropped.
pub fn load_tiff_image(path: &Path) -> Result<Array3<f32>, DataLoadError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut decoder = Decoder::new(reader)?;

    let (w, h) = decoder.dimensions()?;
    let (width, height) = (w as usize, h as usize);
    let samples = match decoder.colortype()? {
        ColorType::Gray(_) => 1,
        ColorType::GrayA(_) => 2,
        ColorType::RGB(_) => 3,
        ColorType::RGBA(_) => 4,
        other => {
            return Err(DataLoadError::UnsupportedDataType(format!(
                "Unsupported TIFF color type: {:?}. Only grayscale and RGB supported.",
                other
            )))
        }
    };

    let pixels: Vec<f32> = match decoder.read_image()? {
        DecodingResult::U8(data) => data.into_iter().map(f32::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32 * U16_TO_U8).collect(),
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        _ => {
            return Err(DataLoadError::UnsupportedDataType(
                "TIFF samples must be u8, u16, f32 or f64".to_string(),
            ))
        }
    };

    if pixels.len() != width * height * samples {
        return Err(DataLoadError::InvalidDimensions(format!(
            "TIFF holds {} samples, expected {}x{}x{}",
            pixels.len(),
            height,
            width,
            samples
        )));
    }

    Ok(Array3::from_shape_fn((height, width, CHANNELS), |(y, x, c)| {
        let base = (y * width + x) * samples;
        // Grey (with or without alpha) repeats its one sample
        let offset = if samples <= 2 { 0 } else { c };
        pixels[base + offset]
    }))
}

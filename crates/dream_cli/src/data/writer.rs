use image::RgbImage;
use ndarray::ArrayView3;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tiff::encoder::{colortype::RGB32Float, TiffEncoder};

use dream_core::image::clip_unit;
use dream_core::CHANNELS;

use super::DataLoadError;

fn check_rgb(image: ArrayView3<f32>) -> Result<(u32, u32), DataLoadError> {
    let (height, width, channels) = image.dim();
    if channels != CHANNELS || height == 0 || width == 0 {
        return Err(DataLoadError::InvalidDimensions(format!(
            "Expected non-empty HxWx{} image, got {:?}",
            CHANNELS,
            image.shape()
        )));
    }
    Ok((width as u32, height as u32))
}

/// Write a display-range image (nominally `[0, 1]`) as 8-bit PNG or JPEG,
/// chosen by the file extension. Values outside the range are clipped.
pub fn save_preview(image: ArrayView3<f32>, path: &Path) -> Result<(), DataLoadError> {
    let (width, height) = check_rgb(image)?;
    let bytes: Vec<u8> = clip_unit(image)
        .iter()
        .map(|&v| (v * 255.0).round() as u8)
        .collect();
    let buffer = RgbImage::from_raw(width, height, bytes).ok_or_else(|| {
        DataLoadError::InvalidDimensions("pixel buffer does not match image size".to_string())
    })?;
    buffer.save(path)?;
    Ok(())
}

/// Write the unclipped working image as a float RGB TIFF, loadable again as
/// a starting point.
pub fn save_raw_tiff(image: ArrayView3<f32>, path: &Path) -> Result<(), DataLoadError> {
    let (width, height) = check_rgb(image)?;
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let mut encoder = TiffEncoder::new(writer)?;

    let data: Vec<f32> = image.iter().copied().collect();
    encoder.write_image::<RGB32Float>(width, height, &data)?;
    Ok(())
}

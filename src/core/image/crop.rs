//! Centre-cropping of generated art to the card frame

use std::path::{Path, PathBuf};

use image::DynamicImage;

use super::Result;
use crate::config::CroppingSettings;

/// Frame ratio for vertical (Saga) art.
pub const VERTICAL_RATIO: f64 = 4.0 / 5.0;
/// Frame ratio for standard art.
pub const STANDARD_RATIO: f64 = 5.0 / 4.0;

/// Target ratio for this layout, if cropping is enabled for it.
pub fn target_ratio(settings: &CroppingSettings, vertical: bool) -> Option<f64> {
    match (vertical, settings.crop_vertical, settings.crop_standard) {
        (true, true, _) => Some(VERTICAL_RATIO),
        (false, _, true) => Some(STANDARD_RATIO),
        _ => None,
    }
}

/// Crop the centre of `img` to `ratio` (width / height).
///
/// Images already within 0.01 of the ratio are returned unchanged.
pub fn crop_to_ratio(img: DynamicImage, ratio: f64) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return img;
    }
    let current = width as f64 / height as f64;
    if (current - ratio).abs() <= 0.01 {
        return img;
    }

    if current > ratio {
        let new_width = (height as f64 * ratio) as u32;
        let left = (width - new_width) / 2;
        img.crop_imm(left, 0, new_width, height)
    } else {
        let new_height = (width as f64 / ratio) as u32;
        let top = (height - new_height) / 2;
        img.crop_imm(0, top, width, new_height)
    }
}

/// Decode downloaded bytes, apply the cropping policy and save as PNG.
pub fn save_art(
    bytes: &[u8],
    destination: &Path,
    settings: &CroppingSettings,
    vertical: bool,
) -> Result<PathBuf> {
    let mut img = image::load_from_memory(bytes)?;
    if let Some(ratio) = target_ratio(settings, vertical) {
        img = crop_to_ratio(img, ratio);
        tracing::debug!(
            width = img.width(),
            height = img.height(),
            vertical,
            "cropped art to frame ratio"
        );
    }

    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    img.save_with_format(destination, image::ImageFormat::Png)?;
    Ok(destination.to_path_buf())
}

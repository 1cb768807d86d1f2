//! Loading of configuration files and writing of images.

use anyhow::{Context, Result};
use std::{fs, io, path::Path};

/// Creates any directories missing in order for the given file path to be
/// valid.
pub fn create_parent_directories(file_path: impl AsRef<Path>) -> io::Result<()> {
    match file_path.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Reads the RON (Rusty Object Notation) file at the given path and
/// deserializes the contents into an object of type `T`.
///
/// # Errors
/// Returns an error if the file can not be read or does not hold a valid
/// `T`.
pub fn parse_ron_file<T>(file_path: impl AsRef<Path>) -> Result<T>
where
    T: for<'de> serde::de::Deserialize<'de>,
{
    let file_path = file_path.as_ref();
    let text = fs::read_to_string(file_path)
        .with_context(|| format!("Could not open {}", file_path.display()))?;
    parse_ron_str(&text).with_context(|| format!("Invalid syntax in {}", file_path.display()))
}

/// Deserializes the given RON text into an object of type `T`.
///
/// # Errors
/// Returns an error if the text does not hold a valid `T`.
pub fn parse_ron_str<T>(text: &str) -> Result<T>
where
    T: for<'de> serde::de::Deserialize<'de>,
{
    ron::from_str::<T>(text).map_err(anyhow::Error::from)
}

/// Writes the given linear RGB image to a PNG file, converting to 8 bits per
/// channel and creating missing parent directories.
///
/// # Errors
/// Returns an error if the directories or the file can not be created.
pub fn save_rgb_image_as_png(
    image: &image::Rgb32FImage,
    output_path: impl AsRef<Path>,
) -> Result<()> {
    let output_path = output_path.as_ref();
    create_parent_directories(output_path)?;
    to_rgb8(image)
        .save_with_format(output_path, image::ImageFormat::Png)
        .with_context(|| format!("Could not write {}", output_path.display()))
}

fn to_rgb8(image: &image::Rgb32FImage) -> image::RgbImage {
    image::RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let pixel = image.get_pixel(x, y);
        image::Rgb(pixel.0.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::RenderingConfig;

    #[test]
    fn parsing_invalid_ron_fails() {
        assert!(parse_ron_str::<RenderingConfig>("(resolution: ").is_err());
    }

    #[test]
    fn converting_to_rgb8_clamps_and_rounds_channels() {
        let image = image::Rgb32FImage::from_pixel(2, 1, image::Rgb([-0.5, 0.5, 2.0]));
        let converted = to_rgb8(&image);
        assert_eq!(converted.get_pixel(1, 0).0, [0, 128, 255]);
    }
}

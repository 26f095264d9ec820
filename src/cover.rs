use crate::error::Result;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, ImageFormat};
use std::{
    io::Cursor,
    path::Path,
};

/// The largest cover art dimension the Windows shell will still display.
pub const MAX_COVER_DIMENSION: u32 = 2500;

const JPEG_QUALITY: u8 = 95;

/// A re-encoded cover image ready to be written out.
#[derive(Debug)]
pub struct PreparedImage {
    /// The encoded image data.
    pub data: Vec<u8>,
    /// The MIME type of the encoding.
    pub mime: &'static str,
    /// Final width in pixels.
    pub width: u32,
    /// Final height in pixels.
    pub height: u32,
}

/// Decodes an image file and downscales it to fit within `max_dimension`, preserving the aspect
/// ratio. PNG input stays PNG; everything else is re-encoded as JPEG.
pub fn shrink_to_fit<P>(path: P, max_dimension: u32) -> Result<PreparedImage>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let keep_png = matches!(ImageFormat::from_path(path), Ok(ImageFormat::Png));

    let img = image::open(path)?;
    let (width, height) = (img.width(), img.height());
    let (new_width, new_height) = fit_within(width, height, max_dimension);

    let img = if (new_width, new_height) != (width, height) {
        img.resize(new_width, new_height, FilterType::Lanczos3)
    } else {
        img
    };
    // the alpha-flattened copy below has the same dimensions
    let (out_width, out_height) = (img.width(), img.height());

    let mut buf = Cursor::new(Vec::new());
    let mime = if keep_png {
        img.write_to(&mut buf, ImageFormat::Png)?;
        "image/png"
    } else {
        // JPEG can't carry an alpha channel
        let img = if img.color().has_alpha() {
            DynamicImage::ImageRgb8(img.to_rgb8())
        } else {
            img
        };

        let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
        img.write_with_encoder(encoder)?;
        "image/jpeg"
    };

    Ok(PreparedImage {
        data: buf.into_inner(),
        mime,
        width: out_width,
        height: out_height,
    })
}

/// Computes the dimensions that fit `width` × `height` within `max` while preserving the aspect
/// ratio. Images already within the bound are left alone.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        (width, height)
    } else if width > height {
        (max, (height as u64 * max as u64 / width as u64) as u32)
    } else {
        ((width as u64 * max as u64 / height as u64) as u32, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_within_leaves_small_images_alone() {
        assert_eq!(fit_within(100, 50, 2500), (100, 50));
        assert_eq!(fit_within(2500, 2500, 2500), (2500, 2500));
    }

    #[test]
    fn fit_within_scales_down_the_long_edge() {
        assert_eq!(fit_within(5000, 2500, 2500), (2500, 1250));
        assert_eq!(fit_within(1000, 4000, 2000), (500, 2000));
    }

    #[test]
    fn png_stays_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("art.png");
        image::RgbImage::new(10, 10).save(&path).unwrap();

        let prepared = shrink_to_fit(&path, 4).unwrap();
        assert_eq!(prepared.mime, "image/png");
        assert_eq!((prepared.width, prepared.height), (4, 4));
        assert!(!prepared.data.is_empty());
    }

    #[test]
    fn jpeg_input_reencoded_as_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("art.jpg");
        image::RgbImage::new(8, 4).save(&path).unwrap();

        let prepared = shrink_to_fit(&path, 4).unwrap();
        assert_eq!(prepared.mime, "image/jpeg");
        assert_eq!((prepared.width, prepared.height), (4, 2));
    }

    #[test]
    fn alpha_input_flattened_to_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("art.bmp");
        image::RgbaImage::new(8, 8).save(&path).unwrap();

        let prepared = shrink_to_fit(&path, 4).unwrap();
        assert_eq!(prepared.mime, "image/jpeg");
        assert_eq!((prepared.width, prepared.height), (4, 4));
    }

    #[test]
    fn small_image_not_resized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("art.png");
        image::RgbImage::new(10, 6).save(&path).unwrap();

        let prepared = shrink_to_fit(&path, 2500).unwrap();
        assert_eq!((prepared.width, prepared.height), (10, 6));
    }
}

use crate::{Dims, Error};
use ndarray::Array3;
use std::path::Path;

/// Helper type used to define the source of `ImageSource`'s data
#[derive(Clone)]
pub enum ImageSource<'a> {
    /// A raw buffer of image data, see `image::load_from_memory` for details
    /// on what is supported
    Memory(&'a [u8]),
    /// The path to an image to load from disk. The image format is inferred
    /// from the file extension, see `image::open` for details
    Path(&'a Path),
    /// An already loaded image that is passed directly to the pipeline
    Image(image::DynamicImage),
}

impl<'a> ImageSource<'a> {
    pub fn from_path(path: &'a Path) -> Self {
        Self::Path(path)
    }
}

impl<'a> From<image::DynamicImage> for ImageSource<'a> {
    fn from(img: image::DynamicImage) -> Self {
        Self::Image(img)
    }
}

impl<'a, S> From<&'a S> for ImageSource<'a>
where
    S: AsRef<Path> + 'a,
{
    fn from(path: &'a S) -> Self {
        Self::Path(path.as_ref())
    }
}

pub fn load_dynamic_image(src: ImageSource<'_>) -> Result<image::DynamicImage, image::ImageError> {
    match src {
        ImageSource::Memory(data) => image::load_from_memory(data),
        ImageSource::Path(path) => image::open(path),
        ImageSource::Image(img) => Ok(img),
    }
}

pub(crate) fn load_image(
    src: ImageSource<'_>,
    resize: Option<Dims>,
) -> Result<image::RgbaImage, Error> {
    let img = load_dynamic_image(src)?;

    let img = match resize {
        None => img.to_rgba(),
        Some(ref size) => {
            use image::GenericImageView;

            if img.width() != size.width || img.height() != size.height {
                image::imageops::resize(
                    &img.to_rgba(),
                    size.width,
                    size.height,
                    image::imageops::CatmullRom,
                )
            } else {
                img.to_rgba()
            }
        }
    };

    Ok(img)
}

/// The three pool/upsample stages each halve and re-double the spatial
/// dimensions, so inputs are snapped down to the nearest multiple of 8
/// to make the decoder output match the encoder input exactly.
pub(crate) fn snap_dims(dims: Dims) -> Dims {
    Dims {
        width: (dims.width & !7).max(8),
        height: (dims.height & !7).max(8),
    }
}

/// Loads an image and resizes it so both dimensions are multiples of 8.
pub(crate) fn load_snapped(
    src: ImageSource<'_>,
    resize: Option<Dims>,
) -> Result<image::RgbaImage, Error> {
    let dims = match resize {
        Some(d) => snap_dims(d),
        None => {
            use image::GenericImageView;
            // Peek at the native size first so we only resize once
            let img = load_dynamic_image(src)?;
            let native = Dims::new(img.width(), img.height());
            return load_image(ImageSource::Image(img), Some(snap_dims(native)));
        }
    };

    load_image(src, Some(dims))
}

/// Converts an RGBA image to a CHW float tensor with channels scaled
/// to `[0, 1]`. The alpha channel is dropped.
pub(crate) fn image_to_tensor(img: &image::RgbaImage) -> Array3<f32> {
    let (width, height) = img.dimensions();
    let mut tensor = Array3::zeros((3, height as usize, width as usize));

    for (x, y, pixel) in img.enumerate_pixels() {
        for c in 0..3 {
            tensor[[c, y as usize, x as usize]] = f32::from(pixel[c]) / 255.0;
        }
    }

    tensor
}

/// Converts a CHW float tensor back to an RGBA image, clamping each
/// channel to `[0, 1]`. The alpha channel is fully opaque.
pub(crate) fn tensor_to_image(tensor: &Array3<f32>) -> image::RgbaImage {
    let (channels, height, width) = tensor.dim();
    debug_assert_eq!(channels, 3);

    let mut img = image::RgbaImage::new(width as u32, height as u32);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        for c in 0..3 {
            let v = tensor[[c, y as usize, x as usize]].max(0.0).min(1.0);
            pixel[c] = (v * 255.0).round() as u8;
        }
        pixel[3] = 255;
    }

    img
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn snaps_down_to_multiple_of_8() {
        let snapped = snap_dims(Dims::new(501, 333));
        assert_eq!((snapped.width, snapped.height), (496, 328));

        let tiny = snap_dims(Dims::new(3, 9));
        assert_eq!((tiny.width, tiny.height), (8, 8));
    }

    #[test]
    fn image_tensor_round_trip() {
        let mut img = image::RgbaImage::new(8, 8);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = image::Rgba([(x * 30) as u8, (y * 30) as u8, 128, 255]);
        }

        let tensor = image_to_tensor(&img);
        assert_eq!(tensor.dim(), (3, 8, 8));

        let back = tensor_to_image(&tensor);
        assert_eq!(back, img);
    }
}

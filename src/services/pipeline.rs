use std::io::Cursor;

use image::{imageops, imageops::FilterType, ImageBuffer, ImageFormat, Luma, RgbImage};
use ndarray::{Array2, Array3};
use palette::{FromColor, IntoColor, Lab, LinSrgb, Srgb};

use crate::models::error::AppError;
use crate::services::colorizer::{ColorizeBackend, OutputFormat};

pub struct ColorizedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Full colorization chain: decode → model-resolution lightness → forward
/// pass → upsample chrominance → composite with original-resolution
/// lightness → encode.
///
/// The original spatial resolution is preserved end-to-end; only the
/// lightness/chrominance separation runs at the backend's fixed input size.
pub fn colorize(backend: &dyn ColorizeBackend, raw: &[u8]) -> Result<ColorizedImage, AppError> {
    let img = decode_image(raw)?;
    let (orig_w, orig_h) = img.dimensions();

    let l_model = model_lightness(&img, backend.input_size());
    let prediction = backend.predict_chroma(&l_model)?;

    let mut ab = resize_chroma(&prediction.ab, orig_w, orig_h);
    if prediction.scale != 1.0 {
        ab.mapv_inplace(|v| v * prediction.scale);
    }

    let l_orig = lightness(&img);
    let composed = compose_lab(&l_orig, &ab);

    let (bytes, content_type) = match backend.output_format() {
        OutputFormat::Png => (encode_png(&composed)?, "image/png"),
        OutputFormat::Jpeg => (encode_jpeg(&composed, 90)?, "image/jpeg"),
    };

    Ok(ColorizedImage {
        bytes,
        content_type,
    })
}

/// Decodes the upload into a dense RGB array. A fourth (alpha) channel is
/// dropped unconditionally and single-channel input is broadcast to three
/// channels.
pub fn decode_image(raw: &[u8]) -> Result<RgbImage, AppError> {
    let img = image::load_from_memory(raw).map_err(|e| AppError::Decode(e.to_string()))?;
    Ok(img.to_rgb8())
}

/// Lab lightness (0..100) of every pixel, at the image's own resolution.
pub fn lightness(img: &RgbImage) -> Array2<f32> {
    let (w, h) = img.dimensions();
    let mut l = Array2::zeros((h as usize, w as usize));
    for (x, y, p) in img.enumerate_pixels() {
        let srgb: Srgb<f32> = Srgb::new(
            p[0] as f32 / 255.0,
            p[1] as f32 / 255.0,
            p[2] as f32 / 255.0,
        );
        let lab: Lab = Lab::from_color(srgb.into_linear());
        l[[y as usize, x as usize]] = lab.l;
    }
    l
}

/// Lightness at the backend's input resolution. Bilinear resize, aspect ratio
/// not preserved.
pub fn model_lightness(img: &RgbImage, size: u32) -> Array2<f32> {
    let resized = imageops::resize(img, size, size, FilterType::Triangle);
    lightness(&resized)
}

/// Bilinear-resizes the two predicted chrominance planes to the original
/// resolution.
pub fn resize_chroma(ab: &Array3<f32>, width: u32, height: u32) -> Array3<f32> {
    let (h, w, _) = ab.dim();
    let mut out = Array3::zeros((height as usize, width as usize, 2));
    for c in 0..2 {
        let plane: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_fn(w as u32, h as u32, |x, y| {
                Luma([ab[[y as usize, x as usize, c]]])
            });
        let resized = imageops::resize(&plane, width, height, FilterType::Triangle);
        for (x, y, p) in resized.enumerate_pixels() {
            out[[y as usize, x as usize, c]] = p[0];
        }
    }
    out
}

/// Stacks original-resolution lightness with upsampled chrominance and
/// converts back to sRGB, clipped to the displayable range.
pub fn compose_lab(l: &Array2<f32>, ab: &Array3<f32>) -> RgbImage {
    let (h, w) = l.dim();
    let mut img = RgbImage::new(w as u32, h as u32);
    for y in 0..h {
        for x in 0..w {
            let lab = Lab::new(l[[y, x]], ab[[y, x, 0]], ab[[y, x, 1]]);
            let lin: LinSrgb<f32> = lab.into_color();
            let srgb: Srgb<f32> = Srgb::from_linear(lin);
            img.put_pixel(
                x as u32,
                y as u32,
                image::Rgb([
                    (srgb.red.clamp(0.0, 1.0) * 255.0).round() as u8,
                    (srgb.green.clamp(0.0, 1.0) * 255.0).round() as u8,
                    (srgb.blue.clamp(0.0, 1.0) * 255.0).round() as u8,
                ]),
            );
        }
    }
    img
}

fn encode_png(img: &RgbImage) -> Result<Vec<u8>, AppError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| AppError::Internal(format!("PNG encode error: {}", e)))?;
    Ok(buf.into_inner())
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, AppError> {
    let mut buf = Cursor::new(Vec::new());
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| AppError::Internal(format!("JPEG encode error: {}", e)))?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::colorizer::ChromaPrediction;
    use image::{DynamicImage, Rgba, RgbaImage};

    struct ZeroChroma;

    impl ColorizeBackend for ZeroChroma {
        fn id(&self) -> &'static str {
            "zero"
        }
        fn input_size(&self) -> u32 {
            128
        }
        fn output_format(&self) -> OutputFormat {
            OutputFormat::Png
        }
        fn predict_chroma(&self, _l: &Array2<f32>) -> Result<ChromaPrediction, AppError> {
            Ok(ChromaPrediction {
                ab: Array3::zeros((64, 64, 2)),
                scale: 128.0,
            })
        }
    }

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn alpha_channel_is_dropped() {
        let mut rgba = RgbaImage::new(10, 10);
        for p in rgba.pixels_mut() {
            *p = Rgba([200, 100, 50, 128]);
        }
        let decoded = decode_image(&png_bytes(DynamicImage::ImageRgba8(rgba))).unwrap();
        assert_eq!(decoded.dimensions(), (10, 10));
        assert_eq!(decoded.get_pixel(5, 5).0, [200, 100, 50]);
    }

    #[test]
    fn grayscale_is_broadcast_to_three_channels() {
        let gray = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(8, 8, Luma([77u8])));
        let decoded = decode_image(&png_bytes(gray)).unwrap();
        assert_eq!(decoded.get_pixel(3, 3).0, [77, 77, 77]);
    }

    #[test]
    fn corrupt_bytes_yield_decode_error() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[test]
    fn model_lightness_is_fixed_size_regardless_of_input() {
        let white = RgbImage::from_pixel(100, 100, image::Rgb([255, 255, 255]));
        let l = model_lightness(&white, 128);
        assert_eq!(l.dim(), (128, 128));
        // White maps to L ≈ 100 in Lab.
        assert!((l[[64, 64]] - 100.0).abs() < 0.5);
    }

    #[test]
    fn resize_chroma_preserves_constant_planes() {
        let mut ab = Array3::zeros((16, 16, 2));
        ab.slice_mut(ndarray::s![.., .., 0]).fill(12.5);
        ab.slice_mut(ndarray::s![.., .., 1]).fill(-30.0);
        let resized = resize_chroma(&ab, 50, 40);
        assert_eq!(resized.dim(), (40, 50, 2));
        assert!((resized[[20, 25, 0]] - 12.5).abs() < 1e-3);
        assert!((resized[[20, 25, 1]] + 30.0).abs() < 1e-3);
    }

    #[test]
    fn lab_roundtrip_is_close() {
        let img = RgbImage::from_pixel(4, 4, image::Rgb([180, 90, 40]));
        let l = lightness(&img);
        let mut ab = Array3::zeros((4, 4, 2));
        for y in 0..4 {
            for x in 0..4 {
                let srgb: Srgb<f32> = Srgb::new(180.0 / 255.0, 90.0 / 255.0, 40.0 / 255.0);
                let lab: Lab = Lab::from_color(srgb.into_linear());
                ab[[y, x, 0]] = lab.a;
                ab[[y, x, 1]] = lab.b;
            }
        }
        let out = compose_lab(&l, &ab);
        let p = out.get_pixel(2, 2).0;
        assert!((p[0] as i32 - 180).abs() <= 2);
        assert!((p[1] as i32 - 90).abs() <= 2);
        assert!((p[2] as i32 - 40).abs() <= 2);
    }

    #[test]
    fn zero_chroma_backend_yields_neutral_output_at_original_resolution() {
        let input = RgbImage::from_fn(37, 61, |x, y| {
            image::Rgb([(x * 6) as u8, (y * 4) as u8, 90])
        });
        let raw = png_bytes(DynamicImage::ImageRgb8(input));

        let result = colorize(&ZeroChroma, &raw).unwrap();
        assert_eq!(result.content_type, "image/png");

        let out = image::load_from_memory(&result.bytes).unwrap().to_rgb8();
        assert_eq!(out.dimensions(), (37, 61));
        // Zero chrominance in Lab means a gray pixel in sRGB.
        for p in out.pixels() {
            let [r, g, b] = p.0;
            assert!((r as i32 - g as i32).abs() <= 2);
            assert!((g as i32 - b as i32).abs() <= 2);
        }
    }
}

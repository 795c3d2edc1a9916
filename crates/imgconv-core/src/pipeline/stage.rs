//! The blocking codec stage: decode → optional cover resize → encode.

use std::borrow::Cow;
use std::io::{Cursor, Read, Write};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tiff::TiffEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageReader, Limits};
use tracing::debug;

use crate::error::ConvertError;
use crate::format::OutputFormat;
use crate::request::ConversionRequest;

use super::channel::{ChannelReader, ChunkWriter};

/// Run the whole chain, reporting failures on the response body.
pub(crate) fn run(
    request: ConversionRequest,
    mut reader: ChannelReader,
    mut writer: ChunkWriter,
    max_dimension: u32,
) {
    match convert(&request, &mut reader, &mut writer, max_dimension) {
        Ok(()) => match writer.finish() {
            Ok(bytes) => debug!(bytes, format = %request.format, "conversion finished"),
            Err(e) => debug!(error = %e, "response body closed before the last chunk"),
        },
        Err(e) => {
            debug!(error = %e, "conversion stage failed");
            writer.fail(e);
        }
    }
}

fn convert(
    request: &ConversionRequest,
    reader: &mut impl Read,
    writer: &mut impl Write,
    max_dimension: u32,
) -> Result<(), ConvertError> {
    // The decoders need random access, so the upload is collected here.
    let mut encoded = Vec::new();
    reader.read_to_end(&mut encoded)?;
    debug!(bytes = encoded.len(), "upload received by codec stage");

    let image = decode(encoded, max_dimension)?;
    debug!(width = image.width(), height = image.height(), "decoded");

    let image = if request.wants_resize() {
        cover_resize(image, request.width, request.height, max_dimension)?
    } else {
        image
    };

    encode(&image, request.format, request.encoder_quality(), writer)?;
    writer.flush()?;
    Ok(())
}

/// Decode with the format sniffed from the content rather than the declared
/// MIME type.
pub(crate) fn decode(encoded: Vec<u8>, max_dimension: u32) -> Result<DynamicImage, ConvertError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(max_dimension);
    limits.max_image_height = Some(max_dimension);

    let mut reader = ImageReader::new(Cursor::new(encoded)).with_guessed_format()?;
    reader.limits(limits);
    Ok(reader.decode()?)
}

/// Output box for a cover fit. A missing side follows the source aspect ratio.
pub fn cover_dimensions(source: (u32, u32), width: Option<u32>, height: Option<u32>) -> (u32, u32) {
    let (src_w, src_h) = (source.0.max(1), source.1.max(1));
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale_side(src_h, w, src_w)),
        (None, Some(h)) => (scale_side(src_w, h, src_h), h),
        (None, None) => (src_w, src_h),
    }
}

fn scale_side(other: u32, target: u32, along: u32) -> u32 {
    let scaled = (f64::from(other) * f64::from(target) / f64::from(along)).round();
    (scaled as u32).max(1)
}

/// Centre-crop the source to the box's aspect ratio, then scale to fill it.
/// Enlarging past the source resolution is allowed.
///
/// Cropping first keeps every intermediate buffer no larger than the source
/// or the output, whatever the aspect ratios involved.
pub(crate) fn cover_resize(
    image: DynamicImage,
    width: Option<u32>,
    height: Option<u32>,
    max_dimension: u32,
) -> Result<DynamicImage, ConvertError> {
    let (src_w, src_h) = (image.width(), image.height());
    let (w, h) = cover_dimensions((src_w, src_h), width, height);
    if w > max_dimension || h > max_dimension {
        return Err(ConvertError::stream(format!(
            "resize target {w}x{h} exceeds the maximum of {max_dimension} pixels"
        )));
    }
    if (w, h) == (src_w, src_h) {
        return Ok(image);
    }

    let (x, y, crop_w, crop_h) = cover_crop((src_w, src_h), (w, h));
    debug!(width = w, height = h, crop_w, crop_h, "cover resize");
    let cropped = if (crop_w, crop_h) == (src_w, src_h) {
        image
    } else {
        image.crop_imm(x, y, crop_w, crop_h)
    };
    if (crop_w, crop_h) == (w, h) {
        return Ok(cropped);
    }
    Ok(cropped.resize_exact(w, h, FilterType::Lanczos3))
}

/// Largest centred region of `source` with the aspect ratio of `target`,
/// as `(x, y, width, height)`.
fn cover_crop(source: (u32, u32), target: (u32, u32)) -> (u32, u32, u32, u32) {
    let (src_w, src_h) = (u64::from(source.0.max(1)), u64::from(source.1.max(1)));
    let (dst_w, dst_h) = (u64::from(target.0.max(1)), u64::from(target.1.max(1)));

    let (crop_w, crop_h) = if src_w * dst_h > src_h * dst_w {
        // Source is wider than the box: trim left and right.
        (((src_h * dst_w + dst_h / 2) / dst_h).clamp(1, src_w), src_h)
    } else {
        (src_w, ((src_w * dst_h + dst_w / 2) / dst_w).clamp(1, src_h))
    };
    let x = (src_w - crop_w) / 2;
    let y = (src_h - crop_h) / 2;
    // All four values are bounded by the u32 source dimensions.
    (x as u32, y as u32, crop_w as u32, crop_h as u32)
}

/// Encode `image` as `format` into `out`.
///
/// WebP output is lossless (the codec has no lossy WebP encoder), so quality
/// only affects JPEG.
pub(crate) fn encode(
    image: &DynamicImage,
    format: OutputFormat,
    quality: u8,
    out: &mut impl Write,
) -> Result<(), ConvertError> {
    let image = encodable(image, format);
    match format {
        OutputFormat::Jpeg => image.write_with_encoder(JpegEncoder::new_with_quality(out, quality))?,
        OutputFormat::Png => image.write_with_encoder(PngEncoder::new(out))?,
        OutputFormat::Webp => image.write_with_encoder(WebPEncoder::new_lossless(out))?,
        OutputFormat::Tiff => {
            // The TIFF encoder needs to seek back to patch offsets.
            let mut buf = Cursor::new(Vec::new());
            image.write_with_encoder(TiffEncoder::new(&mut buf))?;
            out.write_all(buf.get_ref())?;
        }
    }
    Ok(())
}

/// Convert to a pixel layout the target encoder accepts.
fn encodable(image: &DynamicImage, format: OutputFormat) -> Cow<'_, DynamicImage> {
    use ColorType::*;

    let native = match format {
        OutputFormat::Jpeg => matches!(image.color(), L8 | Rgb8),
        OutputFormat::Webp => matches!(image.color(), L8 | La8 | Rgb8 | Rgba8),
        OutputFormat::Png => matches!(
            image.color(),
            L8 | La8 | Rgb8 | Rgba8 | L16 | La16 | Rgb16 | Rgba16
        ),
        OutputFormat::Tiff => matches!(image.color(), L8 | L16 | Rgb8 | Rgba8 | Rgb16 | Rgba16),
    };
    if native {
        return Cow::Borrowed(image);
    }
    let keep_alpha = image.color().has_alpha() && format != OutputFormat::Jpeg;
    if keep_alpha {
        Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8()))
    } else {
        Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8()))
    }
}

#[cfg(test)]
mod test {
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    use super::*;

    const MAX: u32 = 16_384;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn encoded(image: &DynamicImage, format: OutputFormat) -> Vec<u8> {
        let mut out = Vec::new();
        encode(image, format, 80, &mut out).unwrap();
        out
    }

    #[test]
    fn cover_dimensions_with_both_sides_is_exact() {
        assert_eq!(cover_dimensions((400, 300), Some(100), Some(100)), (100, 100));
    }

    #[test]
    fn cover_dimensions_derives_the_missing_side() {
        assert_eq!(cover_dimensions((400, 300), Some(200), None), (200, 150));
        assert_eq!(cover_dimensions((400, 300), None, Some(600)), (800, 600));
        assert_eq!(cover_dimensions((1000, 1), Some(10), None), (10, 1));
    }

    #[test]
    fn cover_resize_crops_to_the_box() {
        let out = cover_resize(gradient(400, 300), Some(120), Some(120), MAX).unwrap();
        assert_eq!((out.width(), out.height()), (120, 120));
    }

    #[test]
    fn cover_resize_enlarges() {
        let out = cover_resize(gradient(40, 30), Some(400), None, MAX).unwrap();
        assert_eq!((out.width(), out.height()), (400, 300));
    }

    #[test]
    fn cover_crop_is_centred_on_the_longer_side() {
        assert_eq!(cover_crop((400, 300), (100, 100)), (50, 0, 300, 300));
        assert_eq!(cover_crop((300, 400), (100, 100)), (0, 50, 300, 300));
        assert_eq!(cover_crop((400, 300), (800, 600)), (0, 0, 400, 300));
        assert_eq!(cover_crop((4000, 1), (2000, 2000)), (1999, 0, 1, 1));
    }

    #[test]
    fn cover_resize_handles_extreme_aspect_ratios() {
        let out = cover_resize(gradient(4000, 1), Some(2000), Some(2000), MAX).unwrap();
        assert_eq!((out.width(), out.height()), (2000, 2000));

        let out = cover_resize(gradient(1, 4000), Some(3000), Some(2), MAX).unwrap();
        assert_eq!((out.width(), out.height()), (3000, 2));
    }

    #[test]
    fn cover_resize_rejects_derived_side_over_limit() {
        let err = cover_resize(gradient(10, 1000), Some(200), None, 4096).unwrap_err();
        assert!(err.to_string().contains("exceeds the maximum"), "{err}");
    }

    #[test]
    fn every_format_encodes_and_decodes_back() {
        let source = gradient(33, 17);
        for format in [OutputFormat::Jpeg, OutputFormat::Png, OutputFormat::Webp, OutputFormat::Tiff] {
            let bytes = encoded(&source, format);
            assert_eq!(image::guess_format(&bytes).unwrap(), format.image_format());
            let back = decode(bytes, MAX).unwrap();
            assert_eq!((back.width(), back.height()), (33, 17), "{format}");
        }
    }

    #[test]
    fn jpeg_drops_alpha_instead_of_failing() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 128])));
        let bytes = encoded(&rgba, OutputFormat::Jpeg);
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn garbage_input_is_a_stream_error() {
        let err = decode(b"definitely not an image".to_vec(), MAX).unwrap_err();
        assert_eq!(err.kind(), crate::ConvertErrorKind::Stream);
    }

    #[test]
    fn convert_runs_the_whole_chain() {
        let png = encoded(&gradient(64, 48), OutputFormat::Png);
        let request = ConversionRequest {
            format: OutputFormat::Jpeg,
            width: Some(32),
            ..ConversionRequest::default()
        };
        let mut out = Vec::new();
        convert(&request, &mut Cursor::new(png), &mut out, MAX).unwrap();
        let back = decode(out, MAX).unwrap();
        assert_eq!((back.width(), back.height()), (32, 24));
    }
}

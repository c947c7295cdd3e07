//! Decode, orient, resize and compress input images before they are inlined
//! into a provider request. Every transformation returns a new [`ImageAsset`].

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use restyle_contracts::generation::OrientationMode;
use tracing::debug;

use crate::error::PipelineError;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Inline base64 budget per image; two images plus prompt stay under the
/// ~20 MB request ceiling the providers document.
pub const DEFAULT_MAX_INLINE_CHARS: usize = 2_700_000;

const COMPRESSION_QUALITIES: [u8; 4] = [80, 70, 60, 50];
const HALVED_QUALITY: u8 = 75;
const RESIZE_JPEG_QUALITY: u8 = 92;
const MATCH_MIN_SIDE: u32 = 512;
const MATCH_MAX_SIDE: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageMime {
    Jpeg,
    Png,
    Webp,
}

impl ImageMime {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Png => "image/png",
            ImageMime::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageMime::Jpeg => "jpg",
            ImageMime::Png => "png",
            ImageMime::Webp => "webp",
        }
    }

    pub fn from_mime(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageMime::Jpeg),
            "image/png" => Some(ImageMime::Png),
            "image/webp" => Some(ImageMime::Webp),
            _ => None,
        }
    }

    fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(ImageMime::Jpeg),
            ImageFormat::Png => Some(ImageMime::Png),
            ImageFormat::WebP => Some(ImageMime::Webp),
            _ => None,
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            ImageMime::Jpeg => ImageFormat::Jpeg,
            ImageMime::Png => ImageFormat::Png,
            ImageMime::Webp => ImageFormat::WebP,
        }
    }
}

/// Encoded image plus the metadata the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    format: ImageMime,
    orientation: u8,
}

impl ImageAsset {
    fn new(bytes: Vec<u8>, width: u32, height: u32, format: ImageMime, orientation: u8) -> Self {
        Self {
            bytes,
            width,
            height,
            format,
            orientation,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ImageMime {
        self.format
    }

    /// EXIF orientation still pending on the stored bytes (1 = upright or unknown).
    pub fn orientation(&self) -> u8 {
        self.orientation
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return f64::INFINITY;
        }
        f64::from(self.width) / f64::from(self.height)
    }

    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn encoded_len(&self) -> usize {
        base64_len(self.bytes.len())
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.format.as_str(), self.to_base64())
    }

    pub fn decode(&self) -> Result<DynamicImage, PipelineError> {
        image::load_from_memory_with_format(&self.bytes, self.format.image_format())
            .map_err(|err| PipelineError::decode("stored", err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeOptions {
    pub high_quality: bool,
    pub preserve_quality: bool,
}

impl Default for ResizeOptions {
    fn default() -> Self {
        Self {
            high_quality: true,
            preserve_quality: true,
        }
    }
}

/// Checks size and container type before anything is decoded.
pub fn validate_upload(bytes: &[u8], label: &'static str) -> Result<ImageMime, PipelineError> {
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(PipelineError::TooLarge {
            label,
            size: bytes.len(),
            limit: MAX_UPLOAD_BYTES,
        });
    }
    image::guess_format(bytes)
        .ok()
        .and_then(ImageMime::from_format)
        .ok_or(PipelineError::UnsupportedFormat { label })
}

pub fn load_with_orientation(
    bytes: &[u8],
    mode: OrientationMode,
    label: &'static str,
) -> Result<ImageAsset, PipelineError> {
    let format = validate_upload(bytes, label)?;
    let decoded = image::load_from_memory_with_format(bytes, format.image_format())
        .map_err(|err| PipelineError::decode(label, err))?;
    let (width, height) = decoded.dimensions();
    let orientation = read_exif_orientation(bytes);

    if !should_apply_orientation(mode, width, height, orientation) {
        debug!(label, width, height, orientation, ?mode, "orientation left as-is");
        return Ok(ImageAsset::new(
            bytes.to_vec(),
            width,
            height,
            format,
            orientation,
        ));
    }

    let oriented = apply_orientation(decoded, orientation);
    let (new_width, new_height) = oriented.dimensions();
    debug!(
        label,
        orientation, new_width, new_height, "applied EXIF orientation"
    );
    let encoded = encode_png(&oriented)?;
    Ok(ImageAsset::new(
        encoded,
        new_width,
        new_height,
        ImageMime::Png,
        1,
    ))
}

/// Decides whether an EXIF orientation tag gets applied.
///
/// The heuristic skips portrait images tagged 6/8 and landscape images
/// tagged 3/4 on the assumption that they are already upright. That guess is
/// approximate; `Strict` always applies the tag.
pub fn should_apply_orientation(
    mode: OrientationMode,
    width: u32,
    height: u32,
    orientation: u8,
) -> bool {
    if orientation <= 1 || orientation > 8 {
        return false;
    }
    match mode {
        OrientationMode::Disabled => false,
        OrientationMode::Strict => true,
        OrientationMode::Heuristic => {
            let ratio = if height == 0 {
                f64::INFINITY
            } else {
                f64::from(width) / f64::from(height)
            };
            let likely_upright = (ratio < 1.0 && matches!(orientation, 6 | 8))
                || (ratio > 1.0 && matches!(orientation, 3 | 4));
            !likely_upright
        }
    }
}

pub fn read_exif_orientation(bytes: &[u8]) -> u8 {
    let mut cursor = Cursor::new(bytes);
    let Ok(reader) = exif::Reader::new().read_from_container(&mut cursor) else {
        return 1;
    };
    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .and_then(|value| u8::try_from(value).ok())
        .filter(|value| (1..=8).contains(value))
        .unwrap_or(1)
}

pub fn apply_orientation(image: DynamicImage, orientation: u8) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Largest size within `max_w`×`max_h` keeping the aspect ratio. Never upscales.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 || (width <= max_width && height <= max_height) {
        return (width, height);
    }
    let scale = (f64::from(max_width) / f64::from(width))
        .min(f64::from(max_height) / f64::from(height));
    (scaled(width, scale), scaled(height, scale))
}

/// Common box for a size-matched pair: the larger-area image sets the
/// scale, the target sets the aspect ratio.
pub fn matched_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (target_w, target_h) = target;
    let base = if u64::from(source.0) * u64::from(source.1)
        > u64::from(target_w) * u64::from(target_h)
    {
        source
    } else {
        target
    };
    let aspect = if target_h == 0 {
        1.0
    } else {
        f64::from(target_w) / f64::from(target_h)
    };

    let (width, height) = if aspect >= 1.0 {
        let width = base.0.clamp(MATCH_MIN_SIDE, MATCH_MAX_SIDE);
        (width, (f64::from(width) / aspect).round() as u32)
    } else {
        let height = base.1.clamp(MATCH_MIN_SIDE, MATCH_MAX_SIDE);
        ((f64::from(height) * aspect).round() as u32, height)
    };
    (
        width.clamp(1, MATCH_MAX_SIDE),
        height.clamp(1, MATCH_MAX_SIDE),
    )
}

pub fn resize(
    asset: &ImageAsset,
    max_width: u32,
    max_height: u32,
    options: ResizeOptions,
) -> Result<ImageAsset, PipelineError> {
    let (width, height) = fit_within(asset.width, asset.height, max_width, max_height);
    let in_bounds = width == asset.width && height == asset.height;
    if in_bounds && options.high_quality {
        return Ok(asset.clone());
    }

    let decoded = asset.decode()?;
    let resized = if in_bounds {
        decoded
    } else {
        debug!(
            from_width = asset.width,
            from_height = asset.height,
            width,
            height,
            "resizing image"
        );
        decoded.resize_exact(width, height, FilterType::CatmullRom)
    };
    reencode(&resized, options.preserve_quality, asset.orientation)
}

/// Rescales both images into the matched box (up or down) so the pair
/// reaches the provider at comparable resolution.
pub fn match_sizes(
    source: &ImageAsset,
    target: &ImageAsset,
    preserve_quality: bool,
) -> Result<(ImageAsset, ImageAsset), PipelineError> {
    let (box_w, box_h) = matched_dimensions(
        (source.width, source.height),
        (target.width, target.height),
    );
    debug!(box_w, box_h, "matching image sizes");
    Ok((
        rescale_into(source, box_w, box_h, preserve_quality)?,
        rescale_into(target, box_w, box_h, preserve_quality)?,
    ))
}

fn rescale_into(
    asset: &ImageAsset,
    box_w: u32,
    box_h: u32,
    preserve_quality: bool,
) -> Result<ImageAsset, PipelineError> {
    if asset.width == 0 || asset.height == 0 {
        return Ok(asset.clone());
    }
    let scale = (f64::from(box_w) / f64::from(asset.width))
        .min(f64::from(box_h) / f64::from(asset.height));
    let width = scaled(asset.width, scale);
    let height = scaled(asset.height, scale);
    if width == asset.width && height == asset.height {
        return Ok(asset.clone());
    }
    let resized = asset
        .decode()?
        .resize_exact(width, height, FilterType::CatmullRom);
    reencode(&resized, preserve_quality, asset.orientation)
}

/// Shrinks the encoded image until its base64 form fits `max_encoded_len`.
///
/// Tries the JPEG quality ladder first, then halves the dimensions once and
/// returns that result even if it is still over budget.
pub fn compress_to_size_budget(
    asset: &ImageAsset,
    max_encoded_len: usize,
) -> Result<ImageAsset, PipelineError> {
    let original_len = asset.encoded_len();
    if original_len <= max_encoded_len {
        return Ok(asset.clone());
    }
    debug!(original_len, max_encoded_len, "image over inline budget, compressing");

    let decoded = asset.decode()?;
    for quality in COMPRESSION_QUALITIES {
        let bytes = encode_jpeg(&decoded, quality)?;
        let encoded_len = base64_len(bytes.len());
        debug!(quality, encoded_len, "jpeg compression step");
        if encoded_len <= max_encoded_len {
            return Ok(ImageAsset::new(
                bytes,
                asset.width,
                asset.height,
                ImageMime::Jpeg,
                asset.orientation,
            ));
        }
    }

    let width = scaled(asset.width, 0.5);
    let height = scaled(asset.height, 0.5);
    let halved = decoded.resize_exact(width, height, FilterType::CatmullRom);
    let bytes = encode_jpeg(&halved, HALVED_QUALITY)?;
    debug!(
        width,
        height,
        encoded_len = base64_len(bytes.len()),
        "halved dimensions after quality ladder"
    );
    Ok(ImageAsset::new(
        bytes,
        width,
        height,
        ImageMime::Jpeg,
        asset.orientation,
    ))
}

pub fn base64_len(raw_len: usize) -> usize {
    raw_len.div_ceil(3) * 4
}

fn scaled(value: u32, scale: f64) -> u32 {
    ((f64::from(value) * scale).round() as u32).max(1)
}

fn reencode(
    image: &DynamicImage,
    preserve_quality: bool,
    orientation: u8,
) -> Result<ImageAsset, PipelineError> {
    let (width, height) = image.dimensions();
    if preserve_quality {
        Ok(ImageAsset::new(
            encode_png(image)?,
            width,
            height,
            ImageMime::Png,
            orientation,
        ))
    } else {
        Ok(ImageAsset::new(
            encode_jpeg(image, RESIZE_JPEG_QUALITY)?,
            width,
            height,
            ImageMime::Jpeg,
            orientation,
        ))
    }
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, PipelineError> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(PipelineError::encode)?;
    Ok(cursor.into_inner())
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, PipelineError> {
    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(PipelineError::encode)?;
    Ok(out)
}


#[cfg(test)]
mod tests {
    use image::ImageFormat;

    use super::fixtures::{encode, gradient, jpeg, noise, png, with_exif_orientation};
    use super::*;

    #[test]
    fn validate_rejects_oversized_and_unknown_payloads() {
        let oversized = vec![0u8; MAX_UPLOAD_BYTES + 1];
        assert!(matches!(
            validate_upload(&oversized, "source"),
            Err(PipelineError::TooLarge { label: "source", .. })
        ));
        assert!(matches!(
            validate_upload(b"GIF89a\x01\x00\x01\x00", "target"),
            Err(PipelineError::UnsupportedFormat { label: "target" })
        ));
        assert_eq!(validate_upload(&jpeg(8, 8), "source").ok(), Some(ImageMime::Jpeg));
        assert_eq!(validate_upload(&png(8, 8), "source").ok(), Some(ImageMime::Png));
    }

    #[test]
    fn truncated_image_is_a_decode_error() {
        let mut bytes = jpeg(64, 64);
        bytes.truncate(40);
        let err = load_with_orientation(&bytes, OrientationMode::Strict, "target").unwrap_err();
        assert_eq!(err.kind(), Some(restyle_contracts::generation::ErrorKind::Decode));
    }

    #[test]
    fn exif_orientation_is_read_from_app1_segment() {
        let tagged = with_exif_orientation(&jpeg(40, 20), 6);
        assert_eq!(read_exif_orientation(&tagged), 6);
        assert_eq!(read_exif_orientation(&jpeg(40, 20)), 1);
        assert_eq!(read_exif_orientation(&png(4, 4)), 1);
    }

    #[test]
    fn heuristic_skips_portrait_images_tagged_six() {
        let portrait = with_exif_orientation(&jpeg(30, 60), 6);
        let asset = load_with_orientation(&portrait, OrientationMode::Heuristic, "target").unwrap();
        assert_eq!((asset.width(), asset.height()), (30, 60));
        assert_eq!(asset.orientation(), 6);
        assert_eq!(asset.bytes(), portrait.as_slice());

        let strict = load_with_orientation(&portrait, OrientationMode::Strict, "target").unwrap();
        assert_eq!((strict.width(), strict.height()), (60, 30));
        assert_eq!(strict.format(), ImageMime::Png);
        assert_eq!(strict.orientation(), 1);

        let disabled =
            load_with_orientation(&portrait, OrientationMode::Disabled, "target").unwrap();
        assert_eq!((disabled.width(), disabled.height()), (30, 60));
    }

    #[test]
    fn heuristic_applies_rotation_to_landscape_images_tagged_six() {
        let landscape = with_exif_orientation(&jpeg(60, 30), 6);
        let asset =
            load_with_orientation(&landscape, OrientationMode::Heuristic, "source").unwrap();
        assert_eq!((asset.width(), asset.height()), (30, 60));
        assert_eq!(asset.orientation(), 1);
    }

    #[test]
    fn orientation_is_idempotent() {
        for tag in 1..=8u16 {
            let tagged = with_exif_orientation(&jpeg(48, 32), tag);
            let once = load_with_orientation(&tagged, OrientationMode::Strict, "source").unwrap();
            let twice =
                load_with_orientation(once.bytes(), OrientationMode::Strict, "source").unwrap();
            assert_eq!(once.bytes(), twice.bytes(), "tag {tag}");
            assert_eq!(twice.orientation(), 1);
        }
    }

    #[test]
    fn heuristic_guard_table() {
        use OrientationMode::Heuristic;
        assert!(!should_apply_orientation(Heuristic, 10, 20, 6));
        assert!(!should_apply_orientation(Heuristic, 10, 20, 8));
        assert!(should_apply_orientation(Heuristic, 10, 20, 3));
        assert!(!should_apply_orientation(Heuristic, 20, 10, 3));
        assert!(!should_apply_orientation(Heuristic, 20, 10, 4));
        assert!(should_apply_orientation(Heuristic, 20, 10, 6));
        assert!(should_apply_orientation(Heuristic, 10, 10, 6));
        assert!(should_apply_orientation(Heuristic, 10, 10, 2));
        assert!(!should_apply_orientation(Heuristic, 10, 10, 1));
        assert!(!should_apply_orientation(OrientationMode::Strict, 10, 10, 9));
    }

    #[test]
    fn apply_orientation_swaps_dimensions_for_quarter_turns() {
        let base = gradient(10, 20);
        for (tag, dims) in [
            (1, (10, 20)),
            (2, (10, 20)),
            (3, (10, 20)),
            (4, (10, 20)),
            (5, (20, 10)),
            (6, (20, 10)),
            (7, (20, 10)),
            (8, (20, 10)),
        ] {
            assert_eq!(apply_orientation(base.clone(), tag).dimensions(), dims);
        }
    }

    #[test]
    fn fit_within_scales_down_only() {
        assert_eq!(fit_within(800, 600, 1024, 1024), (800, 600));
        assert_eq!(fit_within(2048, 1536, 1024, 1024), (1024, 768));
        assert_eq!(fit_within(1000, 3000, 1024, 1024), (341, 1024));
        assert_eq!(fit_within(5000, 1, 100, 100), (100, 1));
    }

    #[test]
    fn matched_dimensions_use_target_aspect_and_clamp() {
        assert_eq!(matched_dimensions((4000, 3000), (1000, 1500)), (1365, 2048));
        assert_eq!(matched_dimensions((200, 200), (300, 150)), (512, 256));
        assert_eq!(matched_dimensions((3000, 2000), (800, 600)), (2048, 1536));
    }

    #[test]
    fn resize_keeps_in_bounds_high_quality_asset_untouched() {
        let bytes = jpeg(100, 80);
        let asset = load_with_orientation(&bytes, OrientationMode::Heuristic, "target").unwrap();
        let same = resize(&asset, 1024, 1024, ResizeOptions::default()).unwrap();
        assert_eq!(same, asset);

        let reencoded = resize(
            &asset,
            1024,
            1024,
            ResizeOptions {
                high_quality: false,
                preserve_quality: false,
            },
        )
        .unwrap();
        assert_eq!(reencoded.format(), ImageMime::Jpeg);
        assert_eq!((reencoded.width(), reencoded.height()), (100, 80));
    }

    #[test]
    fn resize_shrinks_with_aspect_ratio() {
        let bytes = png(400, 200);
        let asset = load_with_orientation(&bytes, OrientationMode::Heuristic, "target").unwrap();
        let resized = resize(&asset, 100, 100, ResizeOptions::default()).unwrap();
        assert_eq!((resized.width(), resized.height()), (100, 50));
        assert_eq!(resized.format(), ImageMime::Png);
        let decoded = resized.decode().unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));
    }

    #[test]
    fn compression_within_budget_is_a_no_op() {
        let asset =
            load_with_orientation(&jpeg(64, 64), OrientationMode::Heuristic, "source").unwrap();
        let out = compress_to_size_budget(&asset, asset.encoded_len()).unwrap();
        assert_eq!(out, asset);
    }

    #[test]
    fn compression_uses_quality_ladder_before_halving() {
        let bytes = encode(&noise(256, 256, 7), ImageFormat::Png);
        let asset = load_with_orientation(&bytes, OrientationMode::Heuristic, "source").unwrap();
        let budget = asset.encoded_len() - 1;
        let out = compress_to_size_budget(&asset, budget).unwrap();
        assert_eq!(out.format(), ImageMime::Jpeg);
        assert_eq!((out.width(), out.height()), (256, 256));
        assert!(out.encoded_len() <= budget);
    }

    #[test]
    fn compression_halves_when_ladder_is_exhausted() {
        let bytes = encode(&noise(200, 120, 3), ImageFormat::Png);
        let asset = load_with_orientation(&bytes, OrientationMode::Heuristic, "source").unwrap();
        let out = compress_to_size_budget(&asset, 16).unwrap();
        assert_eq!((out.width(), out.height()), (100, 60));
        assert_eq!(out.format(), ImageMime::Jpeg);
        assert!(out.decode().is_ok());
    }

    #[test]
    fn match_sizes_brings_pair_into_common_box() {
        let small = load_with_orientation(&png(100, 100), OrientationMode::Heuristic, "source")
            .unwrap();
        let large = load_with_orientation(&png(1200, 1800), OrientationMode::Heuristic, "target")
            .unwrap();
        let (source, target) = match_sizes(&small, &large, true).unwrap();
        assert_eq!((target.width(), target.height()), (1200, 1800));
        assert_eq!((source.width(), source.height()), (1200, 1200));
    }

    #[test]
    fn data_url_carries_mime_prefix() {
        let asset =
            load_with_orientation(&png(2, 2), OrientationMode::Heuristic, "source").unwrap();
        assert!(asset.data_url().starts_with("data:image/png;base64,iVBOR"));
        assert_eq!(asset.encoded_len(), asset.to_base64().len());
    }
}

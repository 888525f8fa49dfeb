use std::io::Cursor;

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
#[error("image codec error: {0}")]
pub struct ImageCodecError(pub String);

/// A rendered image payload: PNG-encoded bytes plus pixel dimensions.
///
/// Kept encoded so it can move through channels and stores without
/// re-encoding; decode only at the points that actually touch pixels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(with = "png_bytes_serde")]
    png: Bytes,
    width: u32,
    height: u32,
}

impl ImageData {
    /// Wrap already-encoded PNG bytes, decoding once to learn dimensions.
    pub fn from_png_bytes(bytes: impl Into<Bytes>) -> Result<Self, ImageCodecError> {
        let png: Bytes = bytes.into();
        let img = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .map_err(|e| ImageCodecError(e.to_string()))?;
        Ok(Self {
            width: img.width(),
            height: img.height(),
            png,
        })
    }

    /// Encode a decoded image as PNG.
    pub fn from_pixels(img: &DynamicImage) -> Result<Self, ImageCodecError> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| ImageCodecError(e.to_string()))?;
        Ok(Self {
            png: Bytes::from(buf.into_inner()),
            width: img.width(),
            height: img.height(),
        })
    }

    /// Solid-color image, used by the mock engine and tests.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
        Self::from_pixels(&DynamicImage::ImageRgb8(img))
            .expect("PNG encode of an in-memory RGB buffer cannot fail")
    }

    pub fn png_bytes(&self) -> &Bytes {
        &self.png
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn decode(&self) -> Result<DynamicImage, ImageCodecError> {
        image::load_from_memory_with_format(&self.png, ImageFormat::Png)
            .map_err(|e| ImageCodecError(e.to_string()))
    }

    /// Lanczos resize to exact target dimensions. Returns self unchanged if
    /// the dimensions already match.
    pub fn resized(&self, width: u32, height: u32) -> Result<Self, ImageCodecError> {
        if self.width == width && self.height == height {
            return Ok(self.clone());
        }
        let img = self.decode()?.resize_exact(width, height, FilterType::Lanczos3);
        Self::from_pixels(&img)
    }

    /// Square centered-crop thumbnail, JPEG-encoded.
    pub fn thumbnail_jpeg(&self, size: u32) -> Result<Vec<u8>, ImageCodecError> {
        let img = self.decode()?;
        let min_dim = self.width.min(self.height);
        let left = (self.width - min_dim) / 2;
        let top = (self.height - min_dim) / 2;
        let thumb = img
            .crop_imm(left, top, min_dim, min_dim)
            .resize_exact(size, size, FilterType::Lanczos3);

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(thumb.to_rgb8());
        let mut buf = Cursor::new(Vec::new());
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 85);
        rgb.write_with_encoder(encoder)
            .map_err(|e| ImageCodecError(e.to_string()))?;
        Ok(buf.into_inner())
    }
}

mod png_bytes_serde {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Bytes, D::Error> {
        let v: Vec<u8> = Vec::deserialize(de)?;
        Ok(Bytes::from(v))
    }
}

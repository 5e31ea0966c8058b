//! Frame codecs.

use std::str::FromStr;

use bytes::Bytes;
use image::{
    ExtendedColorType, ImageEncoder, RgbImage, RgbaImage,
    buffer::ConvertBuffer,
    codecs::{jpeg::JpegEncoder, webp::WebPEncoder},
};

use crate::error::RenderError;

/// JPEG quality used when none is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 50;

/// Quality of error and notice frames.
pub(crate) const NOTICE_JPEG_QUALITY: u8 = 80;

/// Image codec for streamed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// Lossy JPEG at the given quality (1-100)
    Jpeg {
        /// Encoder quality
        quality: u8,
    },
    /// Lossless WebP
    WebP,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::Jpeg { quality: DEFAULT_JPEG_QUALITY }
    }
}

impl FrameFormat {
    /// MIME type written in each multipart part header.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg { .. } => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// Encode `image`.
    ///
    /// # Errors
    ///
    /// Returns `RenderError::Encode` if the codec rejects the image.
    pub fn encode(self, image: &RgbaImage) -> Result<Bytes, RenderError> {
        let mut out = Vec::new();
        match self {
            Self::Jpeg { quality } => {
                let rgb: RgbImage = image.convert();
                JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
                    .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
                    .map_err(|e| RenderError::Encode(e.to_string()))?;
            },
            Self::WebP => {
                WebPEncoder::new_lossless(&mut out)
                    .write_image(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgba8)
                    .map_err(|e| RenderError::Encode(e.to_string()))?;
            },
        }
        Ok(Bytes::from(out))
    }
}

impl FromStr for FrameFormat {
    type Err = String;

    /// `jpeg`, `jpeg:<quality>` or `webp`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s.eq_ignore_ascii_case("jpeg") => Ok(Self::default()),
            None if s.eq_ignore_ascii_case("webp") => Ok(Self::WebP),
            Some((codec, quality)) if codec.eq_ignore_ascii_case("jpeg") => {
                let quality: u8 = quality.parse().map_err(|_| format!("bad jpeg quality: {quality}"))?;
                if !(1..=100).contains(&quality) {
                    return Err(format!("jpeg quality out of range: {quality}"));
                }
                Ok(Self::Jpeg { quality })
            },
            _ => Err(format!("unknown frame format: {s}")),
        }
    }
}

/// An encoded frame ready to be written to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Encoded image bytes
    pub data: Bytes,
    /// MIME type of `data`
    pub content_type: &'static str,
}

impl EncodedFrame {
    /// Wrap JPEG bytes.
    pub fn jpeg(data: Bytes) -> Self {
        Self { data, content_type: "image/jpeg" }
    }

    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if no bytes were produced.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

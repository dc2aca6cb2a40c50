// Frame encoding for the model request: decode, downscale, PNG, base64

use crate::{CameraFrame, EncoderConfig, FrameEncoding};
use base64::{engine::general_purpose, Engine as _};
use eyre::{Result, WrapErr};
use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// PNG image ready to embed in a conversation
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    pub base64_png: String,
}

impl EncodedFrame {
    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.base64_png)
    }
}

#[derive(Debug, Clone)]
pub struct FrameEncoder {
    resize: Option<u32>,
}

impl FrameEncoder {
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            resize: (config.resize > 0).then_some(config.resize),
        }
    }

    pub fn encode(&self, frame: &CameraFrame) -> Result<EncodedFrame> {
        frame.validate()?;

        let image = decode(frame)?;
        let image = match self.resize {
            Some(edge) if image.width() != edge || image.height() != edge => {
                image.resize_exact(edge, edge, FilterType::Triangle)
            }
            _ => image,
        };

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .wrap_err("Failed to encode frame as PNG")?;

        debug!(
            "Encoded frame {}: {}x{} -> {}x{} ({} PNG bytes)",
            frame.frame_id,
            frame.width,
            frame.height,
            image.width(),
            image.height(),
            png.len()
        );

        Ok(EncodedFrame {
            frame_id: frame.frame_id,
            width: image.width(),
            height: image.height(),
            base64_png: general_purpose::STANDARD.encode(&png),
        })
    }
}

fn decode(frame: &CameraFrame) -> Result<DynamicImage> {
    match frame.encoding {
        FrameEncoding::Rgb8 => {
            let buffer = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
                .ok_or_else(|| eyre::eyre!("RGB8 buffer does not match {}x{}", frame.width, frame.height))?;
            Ok(DynamicImage::ImageRgb8(buffer))
        }
        FrameEncoding::Bgr8 => {
            let mut data = frame.data.clone();
            for pixel in data.chunks_exact_mut(3) {
                pixel.swap(0, 2);
            }
            let buffer = RgbImage::from_raw(frame.width, frame.height, data)
                .ok_or_else(|| eyre::eyre!("BGR8 buffer does not match {}x{}", frame.width, frame.height))?;
            Ok(DynamicImage::ImageRgb8(buffer))
        }
        FrameEncoding::Jpeg | FrameEncoding::Png => image::load_from_memory(&frame.data)
            .wrap_err_with(|| format!("Failed to decode {:?} frame {}", frame.encoding, frame.frame_id)),
    }
}

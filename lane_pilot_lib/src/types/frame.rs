use eyre::Result;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Pixel layout of an incoming camera frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameEncoding {
    Rgb8,
    Bgr8,
    Jpeg,
    Png,
}

impl FrameEncoding {
    /// Parse the `encoding` parameter camera nodes attach to their output.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "rgb8" => Some(Self::Rgb8),
            "bgr8" => Some(Self::Bgr8),
            "jpeg" | "jpg" | "mjpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Rgb8 | Self::Bgr8)
    }
}

/// One camera frame as delivered by the sensor feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraFrame {
    pub timestamp: u64,
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    pub encoding: FrameEncoding,
    pub data: Vec<u8>, // Raw pixels or compressed bytes, see `encoding`
}

impl CameraFrame {
    pub fn new(frame_id: u64, width: u32, height: u32, encoding: FrameEncoding, data: Vec<u8>) -> Self {
        Self {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            frame_id,
            width,
            height,
            encoding,
            data,
        }
    }

    /// Expected buffer length for raw encodings, `None` for compressed ones
    pub fn expected_size(&self) -> Option<usize> {
        if self.encoding.is_raw() {
            Some(self.width as usize * self.height as usize * 3)
        } else {
            None
        }
    }

    /// Validate frame data integrity
    pub fn validate(&self) -> Result<()> {
        if self.data.is_empty() {
            eyre::bail!("Frame {} carries no data", self.frame_id);
        }

        if let Some(expected) = self.expected_size() {
            if self.data.len() != expected {
                eyre::bail!(
                    "Frame data size mismatch: got {} bytes, expected {} bytes",
                    self.data.len(),
                    expected
                );
            }
        }

        Ok(())
    }
}

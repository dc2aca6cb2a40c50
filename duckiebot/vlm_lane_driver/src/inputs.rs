// Decoding of dora inputs: camera frames and control tokens

use dora_node_api::arrow::array::{Array, BinaryArray, StringArray, UInt8Array};
use eyre::Result;
use lane_pilot_lib::{CameraFrame, FrameEncoding};

/// Frame description taken from the input metadata parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameParams<'a> {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub encoding: Option<&'a str>,
}

/// Build a frame from raw `UInt8Array` pixels or a single compressed `BinaryArray` blob.
pub fn camera_frame(frame_id: u64, params: FrameParams<'_>, array: &dyn Array) -> Result<CameraFrame> {
    let encoding = match params.encoding {
        Some(raw) => FrameEncoding::parse(raw)
            .ok_or_else(|| eyre::eyre!("Unsupported frame encoding: {}", raw))?,
        None => FrameEncoding::Rgb8,
    };

    let data = if let Some(pixels) = array.as_any().downcast_ref::<UInt8Array>() {
        pixels.values().to_vec()
    } else if let Some(blob) = array.as_any().downcast_ref::<BinaryArray>() {
        if blob.is_empty() {
            eyre::bail!("Empty frame input");
        }
        blob.value(0).to_vec()
    } else {
        eyre::bail!("Unexpected frame data type: {:?}", array.data_type());
    };

    let (width, height) = match (params.width, params.height, encoding.is_raw()) {
        (Some(w), Some(h), _) => (w, h),
        // Compressed frames carry their own size
        (_, _, false) => (params.width.unwrap_or(0), params.height.unwrap_or(0)),
        (_, _, true) => eyre::bail!("Raw frame input without width/height parameters"),
    };

    let frame = CameraFrame::new(frame_id, width, height, encoding, data);
    frame.validate()?;
    Ok(frame)
}

/// Extract the control token from a `StringArray` or UTF-8 `BinaryArray`.
pub fn control_token(array: &dyn Array) -> Option<String> {
    if let Some(strings) = array.as_any().downcast_ref::<StringArray>() {
        if strings.is_empty() || strings.is_null(0) {
            return None;
        }
        return Some(strings.value(0).to_string());
    }

    if let Some(bytes) = array.as_any().downcast_ref::<BinaryArray>() {
        if bytes.is_empty() {
            return None;
        }
        return std::str::from_utf8(bytes.value(0)).ok().map(str::to_string);
    }

    None
}

//! Debug image capture
//!
//! The radar can expose its raw sensor frame for alignment checks. The image
//! is pulled in chunks by [`CommandChannel::fetch_debug_image`] and saved as
//! headerless 8-bit grayscale.
//!
//! [`CommandChannel::fetch_debug_image`]: crate::protocol::CommandChannel::fetch_debug_image

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::protocol::RadarError;

/// Bytes requested per READ_DBG_IMG exchange
pub const DEBUG_IMAGE_CHUNK_LEN: u16 = 512;

/// Largest image the host accepts (1280 x 1024, one byte per pixel)
pub const MAX_DEBUG_IMAGE_LEN: usize = 1280 * 1024;

/// A raw debug image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugImage {
    /// Width in pixels
    pub width: u16,
    /// Height in pixels
    pub height: u16,
    /// Pixel bytes as delivered by the device
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl DebugImage {
    /// Pixel count announced by the capture response
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether the device delivered every announced pixel
    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.expected_len()
    }

    /// Write the pixel bytes to `path`, truncated to the announced size
    pub fn save_raw(&self, path: impl AsRef<Path>) -> Result<(), RadarError> {
        let len = self.data.len().min(self.expected_len());
        fs::write(path.as_ref(), &self.data[..len])?;
        Ok(())
    }

    /// Save under `dir` with a timestamped name, returning the full path
    pub fn save_timestamped(&self, dir: impl AsRef<Path>) -> Result<PathBuf, RadarError> {
        let path = dir.as_ref().join(default_file_name(&Local::now()));
        self.save_raw(&path)?;
        Ok(path)
    }
}

/// `dbg_img_YYYYmmddHHMMSS.raw` for the given capture time
pub fn default_file_name(at: &DateTime<Local>) -> String {
    format!("dbg_img_{}.raw", at.format("%Y%m%d%H%M%S"))
}

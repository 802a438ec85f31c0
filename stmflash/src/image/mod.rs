//! Firmware image ingest.

pub mod hex;

pub use hex::{Record, RecordKind};

use crate::error::{Error, Result};
use std::path::Path;

/// Supported firmware file formats, keyed on the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Raw binary image, flashed byte-for-byte from the base address.
    Bin,
    /// Intel-HEX image; record offsets place the data.
    Hex,
}

impl ImageFormat {
    /// Determine the image format from a file path.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("hex") => Ok(Self::Hex),
            Some("bin") => Ok(Self::Bin),
            _ => Err(Error::UnsupportedFormat(path.display().to_string())),
        }
    }
}

//! Core types and error definitions for image_dataset.

use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("source {name} is empty")]
    EmptySource { name: String },
    #[error("sample {index} out of range for source {name} (len {len})")]
    OutOfRange {
        name: String,
        index: usize,
        len: usize,
    },
    #[error("sample {index}: pixel buffer has {actual} bytes, expected {expected} for {width}x{height}")]
    PixelCount {
        index: usize,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("batch size must be positive")]
    ZeroBatchSize,
    #[error("loader worker stopped before the pass finished")]
    WorkerDisconnected,
    #[error("{0}")]
    Other(String),
}

/// A decoded, untransformed grayscale sample as handed out by a source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    /// Row-major 8-bit intensities, `width * height` long.
    pub pixels: Vec<u8>,
    pub label: usize,
}

impl RawImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, label: usize) -> Self {
        Self {
            width,
            height,
            pixels,
            label,
        }
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Which half of a labeled dataset a source serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

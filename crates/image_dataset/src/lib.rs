//! Labeled image sources, preprocessing and Burn-compatible batch loading.
//!
//! This crate provides:
//! - `ImageSource` implementations (MNIST via burn-dataset, in-memory samples)
//! - the resize + to-tensor `ImageTransform`
//! - `DataLoader` / `BatchIter` producing `[N, 1, H, W]` image and `[N]` label tensors

pub mod batch;
pub mod source;
pub mod transform;
pub mod types;

pub use batch::{BatchIter, ClassificationBatch, DataLoader, HostBatch, LoaderConfig};
#[cfg(feature = "mnist")]
pub use source::MnistSource;
pub use source::{ImageSource, InMemorySource};
pub use transform::ImageTransform;
pub use types::*;

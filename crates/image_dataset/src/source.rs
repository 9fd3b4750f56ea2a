//! Labeled image sources.

use crate::types::{DatasetError, DatasetResult, RawImage};

/// Random-access collection of labeled grayscale images.
pub trait ImageSource: Send + Sync {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Option<RawImage>;

    fn name(&self) -> &str;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fetch(&self, index: usize) -> DatasetResult<RawImage> {
        self.get(index).ok_or_else(|| DatasetError::OutOfRange {
            name: self.name().to_string(),
            index,
            len: self.len(),
        })
    }
}

/// Samples held in memory; used for synthetic data and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    name: String,
    samples: Vec<RawImage>,
}

impl InMemorySource {
    pub fn new(name: impl Into<String>, samples: Vec<RawImage>) -> Self {
        Self {
            name: name.into(),
            samples,
        }
    }

    /// `count` deterministic samples of `width` x `height`, labels cycling through
    /// `n_classes`. Each class gets a distinct horizontal band so the task is learnable.
    pub fn synthetic(
        name: impl Into<String>,
        count: usize,
        width: u32,
        height: u32,
        n_classes: usize,
    ) -> Self {
        let n_classes = n_classes.max(1);
        let samples = (0..count)
            .map(|i| {
                let label = i % n_classes;
                let band = (height as usize / n_classes).max(1);
                let mut pixels = vec![0u8; width as usize * height as usize];
                for y in 0..height as usize {
                    if y / band == label {
                        let row = y * width as usize;
                        pixels[row..row + width as usize].fill(255);
                    }
                }
                RawImage::new(width, height, pixels, label)
            })
            .collect();
        Self::new(name, samples)
    }

    pub fn samples(&self) -> &[RawImage] {
        &self.samples
    }
}

impl ImageSource for InMemorySource {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Option<RawImage> {
        self.samples.get(index).cloned()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(feature = "mnist")]
pub use mnist::MnistSource;

#[cfg(feature = "mnist")]
mod mnist {
    use super::ImageSource;
    use crate::types::{RawImage, Split};
    use burn_dataset::vision::MnistDataset;
    use burn_dataset::Dataset;

    const MNIST_SIDE: u32 = 28;

    /// MNIST handwritten digits, downloaded and cached by burn-dataset on first use.
    pub struct MnistSource {
        split: Split,
        inner: MnistDataset,
    }

    impl MnistSource {
        pub fn new(split: Split) -> Self {
            tracing::info!(split = split.as_str(), "loading MNIST");
            let inner = match split {
                Split::Train => MnistDataset::train(),
                Split::Test => MnistDataset::test(),
            };
            Self { split, inner }
        }

        pub fn split(&self) -> Split {
            self.split
        }
    }

    impl ImageSource for MnistSource {
        fn len(&self) -> usize {
            self.inner.len()
        }

        fn get(&self, index: usize) -> Option<RawImage> {
            let item = self.inner.get(index)?;
            let mut pixels = Vec::with_capacity((MNIST_SIDE * MNIST_SIDE) as usize);
            for row in item.image.iter() {
                for &v in row.iter() {
                    pixels.push(v.clamp(0.0, 255.0) as u8);
                }
            }
            Some(RawImage::new(
                MNIST_SIDE,
                MNIST_SIDE,
                pixels,
                item.label as usize,
            ))
        }

        fn name(&self) -> &str {
            match self.split {
                Split::Train => "mnist-train",
                Split::Test => "mnist-test",
            }
        }
    }
}

//! Batch loading for training and evaluation.
//!
//! A `DataLoader` owns a shared source plus the transform and produces one
//! `BatchIter` per pass. With `num_workers > 0` a background thread reads and
//! transforms samples into host buffers and hands them over a bounded channel;
//! tensors are always created on the caller's thread.

use crate::source::ImageSource;
use crate::transform::ImageTransform;
use crate::types::{DatasetError, DatasetResult};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use crossbeam_channel::{bounded, Receiver};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Reshuffle the sample order at the start of every pass.
    pub shuffle: bool,
    /// Seed for reproducible shuffling; pass `p` uses `seed + p`.
    pub seed: Option<u64>,
    /// Drop the trailing partial batch.
    pub drop_last: bool,
    /// 0 assembles batches inline; 1 or more uses a single background worker.
    pub num_workers: usize,
    /// Host batches buffered ahead of the consumer.
    pub prefetch: usize,
    /// Cap on batches per pass.
    pub max_batches: Option<usize>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            shuffle: false,
            seed: None,
            drop_last: false,
            num_workers: 1,
            prefetch: 2,
            max_batches: None,
        }
    }
}

impl LoaderConfig {
    pub fn train(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: true,
            ..Default::default()
        }
    }

    pub fn eval(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            ..Default::default()
        }
    }
}

/// Images `[N, 1, H, W]` in [0, 1] and class indices `[N]`.
#[derive(Debug, Clone)]
pub struct ClassificationBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> ClassificationBatch<B> {
    pub fn len(&self) -> usize {
        self.labels.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Host-side batch, as produced by the worker.
#[derive(Debug, Clone)]
pub struct HostBatch {
    pub images: Vec<f32>,
    pub labels: Vec<i64>,
    pub width: usize,
    pub height: usize,
}

impl HostBatch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn into_tensors<B: Backend>(self, device: &B::Device) -> ClassificationBatch<B> {
        let n = self.labels.len();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(self.images, [n, 1, self.height, self.width]),
            device,
        );
        let labels = Tensor::<B, 1, Int>::from_ints(TensorData::new(self.labels, [n]), device);
        ClassificationBatch { images, labels }
    }
}

pub struct DataLoader {
    source: Arc<dyn ImageSource>,
    transform: ImageTransform,
    cfg: LoaderConfig,
}

impl DataLoader {
    pub fn new(
        source: Arc<dyn ImageSource>,
        transform: ImageTransform,
        cfg: LoaderConfig,
    ) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(DatasetError::ZeroBatchSize);
        }
        if source.is_empty() {
            return Err(DatasetError::EmptySource {
                name: source.name().to_string(),
            });
        }
        if cfg.num_workers > 1 {
            tracing::warn!(
                requested = cfg.num_workers,
                "loader supports a single background worker; using 1"
            );
        }
        Ok(Self {
            source,
            transform,
            cfg,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.cfg
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Samples produced by one pass.
    pub fn num_samples(&self) -> usize {
        (self.batches_in_pass() * self.cfg.batch_size).min(self.source.len())
    }

    /// Batches produced by one pass.
    pub fn len(&self) -> usize {
        self.batches_in_pass()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn batches_in_pass(&self) -> usize {
        let n = self.source.len();
        let bs = self.cfg.batch_size;
        let full = if self.cfg.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        };
        match self.cfg.max_batches {
            Some(cap) => full.min(cap),
            None => full,
        }
    }

    fn order_for_pass(&self, pass: u64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.source.len()).collect();
        if self.cfg.shuffle {
            let mut rng = match self.cfg.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed.wrapping_add(pass)),
                None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
            };
            order.shuffle(&mut rng);
        }
        let keep = (self.batches_in_pass() * self.cfg.batch_size).min(order.len());
        order.truncate(keep);
        order
    }

    /// Starts pass number `pass` (used to vary the shuffle between epochs).
    pub fn iter(&self, pass: u64) -> BatchIter {
        let order = self.order_for_pass(pass);
        let remaining = self.batches_in_pass();
        if self.cfg.num_workers == 0 {
            return BatchIter {
                inner: BatchIterKind::Inline {
                    source: self.source.clone(),
                    transform: self.transform,
                    order,
                    cursor: 0,
                    batch_size: self.cfg.batch_size,
                },
                remaining,
            };
        }
        let (tx, rx) = bounded(self.cfg.prefetch.max(1));
        let source = self.source.clone();
        let transform = self.transform;
        let batch_size = self.cfg.batch_size;
        thread::spawn(move || {
            for chunk in order.chunks(batch_size) {
                let res = assemble(source.as_ref(), &transform, chunk);
                let failed = res.is_err();
                if tx.send(res).is_err() || failed {
                    break;
                }
            }
        });
        BatchIter {
            inner: BatchIterKind::Worker { rx },
            remaining,
        }
    }
}

enum BatchIterKind {
    Inline {
        source: Arc<dyn ImageSource>,
        transform: ImageTransform,
        order: Vec<usize>,
        cursor: usize,
        batch_size: usize,
    },
    Worker {
        rx: Receiver<DatasetResult<HostBatch>>,
    },
}

pub struct BatchIter {
    inner: BatchIterKind,
    remaining: usize,
}

impl BatchIter {
    /// Batches still to come in this pass.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn next_host(&mut self) -> DatasetResult<Option<HostBatch>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let batch = match &mut self.inner {
            BatchIterKind::Inline {
                source,
                transform,
                order,
                cursor,
                batch_size,
            } => {
                let end = (*cursor + *batch_size).min(order.len());
                let slice = &order[*cursor..end];
                *cursor = end;
                assemble(source.as_ref(), transform, slice)?
            }
            BatchIterKind::Worker { rx } => match rx.recv() {
                Ok(res) => res?,
                Err(_) => return Err(DatasetError::WorkerDisconnected),
            },
        };
        self.remaining -= 1;
        Ok(Some(batch))
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<ClassificationBatch<B>>> {
        Ok(self.next_host()?.map(|b| b.into_tensors(device)))
    }
}

fn assemble(
    source: &dyn ImageSource,
    transform: &ImageTransform,
    indices: &[usize],
) -> DatasetResult<HostBatch> {
    let mut images = Vec::new();
    let mut labels = Vec::with_capacity(indices.len());
    let mut dims: Option<(u32, u32)> = None;
    for &idx in indices {
        let sample = source.fetch(idx)?;
        let out = transform.output_size(sample.width, sample.height);
        match dims {
            None => dims = Some(out),
            Some(expected) if expected != out => {
                return Err(DatasetError::Other(format!(
                    "sample {idx} is {}x{} after transform, batch expects {}x{}",
                    out.0, out.1, expected.0, expected.1
                )));
            }
            Some(_) => {}
        }
        let pixels = transform.apply(idx, &sample)?;
        if images.capacity() == 0 {
            images.reserve(pixels.len() * indices.len());
        }
        images.extend_from_slice(&pixels);
        labels.push(sample.label as i64);
    }
    let (width, height) = dims.ok_or_else(|| DatasetError::Other("empty batch".into()))?;
    Ok(HostBatch {
        images,
        labels,
        width: width as usize,
        height: height as usize,
    })
}

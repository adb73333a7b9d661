//! Barcode detection and bulk auto-classification.
//!
//! Detection runs on a blocking worker that only reads image files. Labels
//! are applied and saved on the async side, one image at a time, so the
//! catalog has a single writer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use image::GrayImage;
use tokio::sync::mpsc;

use crate::catalog::ImageCatalog;
use crate::config::DetectorConfig;
use crate::models::Classification;
use crate::store;

const CHANNEL_CAPACITY: usize = 32;

/// Minimum spread of a band's column profile before it is considered at all.
const MIN_CONTRAST: f32 = 32.0;

pub trait BarcodeDetector: Send + Sync {
    fn count_barcodes(&self, path: &Path) -> anyhow::Result<usize>;
}

/// Counts regions of horizontal bands that show the dense light/dark
/// alternation of a 1D barcode.
#[derive(Debug, Clone)]
pub struct StripeDetector {
    bands: u32,
    min_transitions: usize,
}

impl StripeDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            bands: config.bands.max(1),
            min_transitions: config.min_transitions,
        }
    }

    pub fn count_regions(&self, image: &GrayImage) -> usize {
        let (width, height) = image.dimensions();
        if width < 2 || height == 0 {
            return 0;
        }

        let band_height = (height / self.bands).max(1);
        let mut regions = 0;
        let mut in_region = false;
        for top in (0..height).step_by(band_height as usize) {
            let bottom = (top + band_height).min(height);
            let striped = band_transitions(image, top, bottom) > self.min_transitions;
            if striped && !in_region {
                regions += 1;
            }
            in_region = striped;
        }
        regions
    }
}

fn band_transitions(image: &GrayImage, top: u32, bottom: u32) -> usize {
    let rows = (bottom - top) as f32;
    let profile: Vec<f32> = (0..image.width())
        .map(|x| {
            (top..bottom)
                .map(|y| f32::from(image.get_pixel(x, y).0[0]))
                .sum::<f32>()
                / rows
        })
        .collect();

    let (low, high) = profile
        .iter()
        .fold((f32::MAX, f32::MIN), |(low, high), value| (low.min(*value), high.max(*value)));
    if high - low < MIN_CONTRAST {
        return 0;
    }
    let threshold = (low + high) / 2.0;
    profile
        .windows(2)
        .filter(|pair| (pair[0] > threshold) != (pair[1] > threshold))
        .count()
}

impl BarcodeDetector for StripeDetector {
    fn count_barcodes(&self, path: &Path) -> anyhow::Result<usize> {
        let image = image::open(path)
            .with_context(|| format!("failed to open image {}", path.display()))?
            .to_luma8();
        Ok(self.count_regions(&image))
    }
}

/// No code found means nothing was there to read; any code means the scanner
/// missed one.
pub fn label_for(barcodes: usize) -> Classification {
    if barcodes == 0 {
        Classification::NoLabel
    } else {
        Classification::ReadFailure
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub identifier: String,
    pub barcodes: usize,
    pub label: Classification,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoClassifySummary {
    pub processed: usize,
    pub no_label: usize,
    pub read_failure: usize,
    pub save_failures: usize,
}

/// Labels every unclassified image and saves the revision file after each
/// one. A failed save is logged and the run continues with the in-memory
/// labels.
pub async fn auto_classify<D, F>(
    catalog: &mut ImageCatalog,
    detector: Arc<D>,
    revision: &Path,
    mut on_progress: F,
) -> anyhow::Result<AutoClassifySummary>
where
    D: BarcodeDetector + ?Sized + 'static,
    F: FnMut(&Progress),
{
    let jobs: Vec<(String, PathBuf)> = catalog
        .unclassified()
        .into_iter()
        .map(|identifier| {
            let path = catalog.path_of(&identifier);
            (identifier, path)
        })
        .collect();
    let total = jobs.len();
    tracing::info!(total, "auto-classifying images");

    let (tx, mut rx) = mpsc::channel::<(String, usize)>(CHANNEL_CAPACITY);
    let worker = tokio::task::spawn_blocking(move || {
        for (identifier, path) in jobs {
            let barcodes = detector.count_barcodes(&path).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), "barcode detection failed: {err:#}");
                0
            });
            if tx.blocking_send((identifier, barcodes)).is_err() {
                break;
            }
        }
    });

    let mut summary = AutoClassifySummary::default();
    while let Some((identifier, barcodes)) = rx.recv().await {
        let label = label_for(barcodes);
        catalog.set_classification(&identifier, label)?;
        summary.processed += 1;
        match label {
            Classification::NoLabel => summary.no_label += 1,
            _ => summary.read_failure += 1,
        }

        if let Err(err) = store::save_revision(revision, catalog) {
            tracing::error!("{err}");
            summary.save_failures += 1;
        }

        on_progress(&Progress {
            processed: summary.processed,
            total,
            identifier,
            barcodes,
            label,
        });
    }

    worker
        .await
        .context("barcode detection worker join failed")?;
    Ok(summary)
}

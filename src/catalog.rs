use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::AnalyticsConfig;
use crate::error::{AnalyticsError, Result};
use crate::models::{Classification, ImageRecord, SessionView};
use crate::session;

/// All image records of one scanner folder, keyed by file name.
#[derive(Debug, Clone)]
pub struct ImageCatalog {
    folder: PathBuf,
    records: BTreeMap<String, ImageRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFilter {
    All,
    Label(Classification),
    OcrRecovered,
    FalseNoRead,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageCounts {
    pub total: usize,
    pub classified: usize,
    pub by_label: BTreeMap<Classification, usize>,
    pub ocr_readable: usize,
    pub false_no_read: usize,
}

impl ImageCounts {
    pub fn count(&self, class: Classification) -> usize {
        self.by_label.get(&class).copied().unwrap_or(0)
    }
}

impl ImageCatalog {
    pub fn scan(folder: &Path, config: &AnalyticsConfig) -> Result<Self> {
        let records = list_images(folder, config)?
            .into_iter()
            .map(|name| (name.clone(), ImageRecord::new(name)))
            .collect();
        Ok(Self {
            folder: folder.to_path_buf(),
            records,
        })
    }

    pub fn from_records<I>(folder: impl Into<PathBuf>, records: I) -> Self
    where
        I: IntoIterator<Item = ImageRecord>,
    {
        Self {
            folder: folder.into(),
            records: records
                .into_iter()
                .map(|record| (record.identifier.clone(), record))
                .collect(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, identifier: &str) -> Option<&ImageRecord> {
        self.records.get(identifier)
    }

    pub fn path_of(&self, identifier: &str) -> PathBuf {
        self.folder.join(identifier)
    }

    /// Records in scanner order: trigger ID, then sub-image index.
    pub fn records(&self) -> Vec<&ImageRecord> {
        let mut records: Vec<&ImageRecord> = self.records.values().collect();
        records.sort_by_cached_key(|record| sort_key(&record.identifier));
        records
    }

    pub fn sessions(&self) -> BTreeMap<String, SessionView> {
        session::aggregate(self.records.values())
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Applies rows loaded from a revision file. Rows for images that are no
    /// longer in the folder are dropped; returns how many were applied.
    pub fn merge_saved(&mut self, saved: Vec<ImageRecord>) -> usize {
        let mut applied = 0;
        let mut dropped = 0;
        for mut row in saved {
            let Some(record) = self.records.get_mut(&row.identifier) else {
                dropped += 1;
                continue;
            };
            if row.classification != Classification::ReadFailure {
                row.false_no_read = false;
            }
            if row.false_no_read {
                row.ocr_readable = false;
            }
            *record = row;
            applied += 1;
        }
        if dropped > 0 {
            tracing::warn!(dropped, "saved labels refer to images missing from the folder");
        }
        applied
    }

    pub fn set_classification(&mut self, identifier: &str, class: Classification) -> Result<()> {
        self.record_mut(identifier)?.set_classification(class);
        Ok(())
    }

    pub fn set_ocr_readable(&mut self, identifier: &str, value: bool) -> Result<()> {
        self.record_mut(identifier)?.set_ocr_readable(value);
        Ok(())
    }

    pub fn set_false_no_read(&mut self, identifier: &str, value: bool) -> Result<()> {
        let record = self.record_mut(identifier)?;
        if record.set_false_no_read(value) {
            Ok(())
        } else {
            Err(AnalyticsError::FalseNoReadNotAllowed {
                image: identifier.to_string(),
                label: record.classification.label(),
            })
        }
    }

    pub fn set_comment(&mut self, identifier: &str, comment: &str) -> Result<()> {
        self.record_mut(identifier)?.comment = comment.trim().to_string();
        Ok(())
    }

    /// Picks up images written to the folder since the last scan.
    pub fn refresh(&mut self, config: &AnalyticsConfig) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for name in list_images(&self.folder, config)? {
            if !self.records.contains_key(&name) {
                self.records.insert(name.clone(), ImageRecord::new(name.clone()));
                added.push(name);
            }
        }
        added.sort_by_cached_key(|name| sort_key(name));
        Ok(added)
    }

    pub fn unclassified(&self) -> Vec<String> {
        self.filter(ImageFilter::Label(Classification::Unclassified))
            .into_iter()
            .map(|record| record.identifier.clone())
            .collect()
    }

    pub fn filter(&self, filter: ImageFilter) -> Vec<&ImageRecord> {
        self.records()
            .into_iter()
            .filter(|record| match filter {
                ImageFilter::All => true,
                ImageFilter::Label(class) => record.classification == class,
                ImageFilter::OcrRecovered => record.ocr_readable,
                ImageFilter::FalseNoRead => record.false_no_read,
            })
            .collect()
    }

    pub fn image_counts(&self) -> ImageCounts {
        let mut counts = ImageCounts {
            total: self.records.len(),
            by_label: Classification::ALL.iter().map(|class| (*class, 0)).collect(),
            ..ImageCounts::default()
        };
        for record in self.records.values() {
            *counts.by_label.entry(record.classification).or_insert(0) += 1;
            if record.classification.is_classified() {
                counts.classified += 1;
            }
            if record.ocr_readable {
                counts.ocr_readable += 1;
            }
            if record.false_no_read {
                counts.false_no_read += 1;
            }
        }
        counts
    }

    /// Expected session total guessed from the span of numeric trigger IDs.
    pub fn detect_total_sessions(&self) -> Option<u64> {
        let ids: BTreeSet<u64> = self
            .records
            .keys()
            .filter_map(|name| {
                let stem = Path::new(name).file_stem()?.to_string_lossy().into_owned();
                stem.split('_').next()?.parse::<u64>().ok()
            })
            .collect();
        let (min, max) = (ids.first()?, ids.last()?);
        Some(max - min + 1)
    }

    fn record_mut(&mut self, identifier: &str) -> Result<&mut ImageRecord> {
        self.records
            .get_mut(identifier)
            .ok_or_else(|| AnalyticsError::UnknownImage(identifier.to_string()))
    }
}

pub(crate) fn list_images(folder: &Path, config: &AnalyticsConfig) -> Result<Vec<String>> {
    let read_error = |source| AnalyticsError::FolderRead {
        path: folder.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in std::fs::read_dir(folder).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        if !entry.file_type().map_err(read_error)?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if config.is_image_file(&name) {
            names.push(name);
        }
    }
    tracing::debug!(folder = %folder.display(), images = names.len(), "scanned folder");
    Ok(names)
}

fn sort_key(name: &str) -> (u64, u64, String) {
    let mut parts = name.split('_');
    let trigger = parts.next().and_then(|part| part.parse().ok()).unwrap_or(0);
    let sub_image = parts.next().and_then(|part| part.parse().ok()).unwrap_or(0);
    (trigger, sub_image, name.to_string())
}

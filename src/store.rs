//! CSV files kept next to the images: the revision file holding every label,
//! plus the stats, issues, report and session exports.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use regex::Regex;

use crate::catalog::ImageCatalog;
use crate::error::{AnalyticsError, Result};
use crate::models::{Classification, ImageRecord, Issue, SessionClass, SessionView};
use crate::report::StatRow;

const REVISION_HEADER: [&str; 9] = [
    "image_path",
    "image_label",
    "OCR_Readable",
    "False_NoRead",
    "Comment",
    "session_number",
    "session_label",
    "session_OCR_readable",
    "session_index",
];

pub fn timestamp(now: NaiveDateTime) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Newest `revision_YYYYMMDD_HHMMSS.csv` in the folder, if any.
pub fn latest_revision(folder: &Path) -> Result<Option<PathBuf>> {
    let pattern = Regex::new(r"^revision_\d{8}_\d{6}\.csv$")?;
    let read_error = |source| AnalyticsError::FolderRead {
        path: folder.to_path_buf(),
        source,
    };

    let mut latest: Option<String> = None;
    for entry in std::fs::read_dir(folder).map_err(read_error)? {
        let name = entry.map_err(read_error)?.file_name().to_string_lossy().into_owned();
        if pattern.is_match(&name) && latest.as_ref().map_or(true, |current| name > *current) {
            latest = Some(name);
        }
    }
    Ok(latest.map(|name| folder.join(name)))
}

/// The revision file to keep writing to: the latest one, or a fresh one
/// stamped with `now`.
pub fn revision_path(folder: &Path, now: NaiveDateTime) -> Result<PathBuf> {
    match latest_revision(folder)? {
        Some(path) => Ok(path),
        None => Ok(folder.join(format!("revision_{}.csv", timestamp(now)))),
    }
}

fn parse_flag(raw: Option<&str>) -> bool {
    raw.map(|value| {
        matches!(
            value.trim().to_lowercase().as_str(),
            "true" | "t" | "1" | "yes"
        )
    })
    .unwrap_or(false)
}

fn relative_name(stored: &str, folder: &Path) -> String {
    let path = Path::new(stored);
    if !path.is_absolute() {
        return stored.to_string();
    }
    path.strip_prefix(folder)
        .ok()
        .or_else(|| path.file_name().map(Path::new))
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| stored.to_string())
}

/// Reads a revision file. Short rows are skipped; missing trailing columns
/// default to false/empty.
pub fn load_revision(path: &Path, folder: &Path) -> Result<Vec<ImageRecord>> {
    let load_error = |source| AnalyticsError::Load {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(load_error)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(load_error)?;
        if row.len() < 2 {
            continue;
        }

        let raw_label = row.get(1).unwrap_or_default().trim();
        let classification = match Classification::from_label(raw_label) {
            Some(class) => class,
            None => {
                if !raw_label.is_empty() {
                    tracing::warn!(label = raw_label, "unknown label in revision file, treating as unclassified");
                }
                Classification::Unclassified
            }
        };

        records.push(ImageRecord {
            identifier: relative_name(row.get(0).unwrap_or_default(), folder),
            classification,
            ocr_readable: parse_flag(row.get(2)),
            false_no_read: parse_flag(row.get(3)),
            comment: row.get(4).unwrap_or_default().trim().to_string(),
        });
    }

    tracing::info!(path = %path.display(), rows = records.len(), "loaded revision");
    Ok(records)
}

fn flag(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn persist_error(path: &Path) -> impl Fn(csv::Error) -> AnalyticsError + '_ {
    move |source| AnalyticsError::Persist {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes every record with its session columns and flushes before returning.
pub fn save_revision(path: &Path, catalog: &ImageCatalog) -> Result<()> {
    let to_error = persist_error(path);
    let sessions = catalog.sessions();
    let mut writer = csv::Writer::from_path(path).map_err(&to_error)?;
    writer.write_record(REVISION_HEADER).map_err(&to_error)?;

    for record in catalog.records() {
        let key = crate::session::session_key(&record.identifier);
        let session = sessions.get(&key);
        let session_label = session
            .map(|session| session.resolved())
            .unwrap_or(SessionClass::Unlabeled);
        let session_ocr = session.is_some_and(|session| session.ocr_readable);

        writer
            .write_record([
                record.identifier.as_str(),
                record.classification.label(),
                flag(record.ocr_readable),
                flag(record.false_no_read),
                record.comment.as_str(),
                key.as_str(),
                session_label.label(),
                flag(session_ocr),
                "",
            ])
            .map_err(&to_error)?;
    }
    writer.flush().map_err(|err| to_error(err.into()))?;
    tracing::debug!(path = %path.display(), images = catalog.len(), "saved revision");
    Ok(())
}

pub fn save_stats(path: &Path, rows: &[StatRow]) -> Result<()> {
    let to_error = persist_error(path);
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(&to_error)?;
    writer
        .write_record(["Category", "Metric", "Value", "Description"])
        .map_err(&to_error)?;
    for row in rows {
        writer.serialize(row).map_err(&to_error)?;
    }
    writer.flush().map_err(|err| to_error(err.into()))?;
    Ok(())
}

pub fn save_issues(path: &Path, issues: &[Issue]) -> Result<()> {
    let to_error = persist_error(path);
    let mut writer = csv::Writer::from_path(path).map_err(&to_error)?;
    writer.write_record(["ID", "Issue_Type"]).map_err(&to_error)?;
    for issue in issues {
        writer
            .write_record([issue.id.to_string(), issue.kind.to_string()])
            .map_err(&to_error)?;
    }
    writer.flush().map_err(|err| to_error(err.into()))?;
    Ok(())
}

pub fn save_report(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).map_err(|err: io::Error| persist_error(path)(err.into()))
}

/// One per-category session file written by [`export_sessions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExport {
    pub class: SessionClass,
    pub path: PathBuf,
    pub sessions: usize,
}

fn label_list(session: &SessionView) -> String {
    if session.labels.is_empty() {
        return Classification::Unclassified.label().to_string();
    }
    session
        .labels
        .iter()
        .map(|label| label.label())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Writes `sessions_<category>_<stamp>.csv` for each non-empty class and a
/// `sessions_summary_<stamp>.csv` listing them.
pub fn export_sessions(
    folder: &Path,
    sessions: &BTreeMap<String, SessionView>,
    stamp: &str,
) -> Result<Vec<SessionExport>> {
    let mut by_class: BTreeMap<SessionClass, Vec<&SessionView>> = BTreeMap::new();
    for session in sessions.values() {
        by_class.entry(session.resolved()).or_default().push(session);
    }

    let mut exports = Vec::new();
    for class in SessionClass::ALL {
        let Some(members) = by_class.get(&class) else {
            continue;
        };
        let path = folder.join(format!(
            "sessions_{}_{stamp}.csv",
            class.label().replace(' ', "_")
        ));
        let to_error = persist_error(&path);
        let mut writer = csv::Writer::from_path(&path).map_err(&to_error)?;
        writer
            .write_record(["session_id", "final_category", "all_classifications_in_session"])
            .map_err(&to_error)?;
        for session in members {
            writer
                .write_record([session.key.as_str(), class.label(), label_list(session).as_str()])
                .map_err(&to_error)?;
        }
        writer.flush().map_err(|err| to_error(err.into()))?;
        exports.push(SessionExport {
            class,
            path: path.clone(),
            sessions: members.len(),
        });
    }

    let summary = folder.join(format!("sessions_summary_{stamp}.csv"));
    let to_error = persist_error(&summary);
    let mut writer = csv::Writer::from_path(&summary).map_err(&to_error)?;
    writer
        .write_record(["category", "unique_sessions", "filename"])
        .map_err(&to_error)?;
    for export in &exports {
        let file_name = export
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        writer
            .write_record([export.class.label().to_string(), export.sessions.to_string(), file_name])
            .map_err(&to_error)?;
    }
    writer.flush().map_err(|err| to_error(err.into()))?;

    Ok(exports)
}

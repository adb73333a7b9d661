//! Scanner log parsing.
//!
//! A log line is relevant when it carries one or more `ID: <digits>` tokens.
//! `noread` lines are genuine no-reads only when an image with that trigger ID
//! was captured; otherwise the sensor fired without a parcel (false trigger).

use std::collections::BTreeSet;
use std::path::Path;

use chrono::NaiveDateTime;
use regex::{Regex, RegexBuilder};

use crate::catalog;
use crate::config::AnalyticsConfig;
use crate::error::{AnalyticsError, Result};
use crate::models::{Issue, IssueKind, LogAnalysis, LogDateRange, TriggerId};
use crate::rates;

const TIMESTAMP_PATTERNS: [&str; 4] = [
    r"\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}",
    r"\d{2}/\d{2}/\d{4}\s+\d{2}:\d{2}:\d{2}",
    r"\d{2}-\d{2}-\d{4}\s+\d{2}:\d{2}:\d{2}",
    r"\d{8}_\d{6}",
];

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
    "%Y%m%d_%H%M%S",
];

pub struct LogAnalyzer {
    id_pattern: Regex,
    timeout_pattern: Regex,
    timestamp_patterns: Vec<Regex>,
    config: AnalyticsConfig,
}

impl LogAnalyzer {
    pub fn new(config: &AnalyticsConfig) -> Result<Self> {
        let timeout_pattern = RegexBuilder::new(&config.timeout_patterns.join("|"))
            .case_insensitive(true)
            .build()?;
        let timestamp_patterns = TIMESTAMP_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            id_pattern: Regex::new(r"ID:\s*(\d+)")?,
            timeout_pattern,
            timestamp_patterns,
            config: config.clone(),
        })
    }

    pub fn parse(&self, log_text: &str, known_ids: &BTreeSet<TriggerId>) -> LogAnalysis {
        let mut analysis = LogAnalysis::default();

        for line in log_text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            analysis.total_entries += 1;

            let ids = self.line_ids(line);
            analysis.unique_ids.extend(ids.iter().cloned());

            let mut false_trigger = false;
            if line.to_lowercase().contains("noread") {
                for id in &ids {
                    if known_ids.contains(id) {
                        analysis.total_noread += 1;
                    } else {
                        analysis.false_triggers += 1;
                        analysis.missed_trigger_ids.push(id.clone());
                        false_trigger = true;
                    }
                }
            }

            if !false_trigger && self.timeout_pattern.is_match(line) {
                analysis.timeouts += 1;
                analysis.timeout_ids.extend(ids);
            }
        }

        analysis.effective_session_count = analysis
            .unique_ids
            .len()
            .saturating_sub(analysis.false_triggers)
            .saturating_sub(analysis.timeouts);

        tracing::info!(
            entries = analysis.total_entries,
            unique = analysis.unique_ids.len(),
            false_triggers = analysis.false_triggers,
            timeouts = analysis.timeouts,
            noread = analysis.total_noread,
            "parsed scanner log"
        );
        analysis
    }

    /// Trigger IDs of captured images, from the first `_` segment of each
    /// file name. Short or non-numeric segments are skipped.
    pub fn known_trigger_ids<'a, I>(&self, file_names: I) -> BTreeSet<TriggerId>
    where
        I: IntoIterator<Item = &'a str>,
    {
        file_names
            .into_iter()
            .filter_map(|name| {
                let segment = name.split('_').next()?;
                if segment.len() < self.config.min_trigger_id_len {
                    return None;
                }
                TriggerId::parse(segment)
            })
            .collect()
    }

    /// Like [`Self::known_trigger_ids`] but lists the image files in the
    /// folder itself. A folder that cannot be read is an error, not an empty set.
    pub fn scan_known_trigger_ids(&self, folder: &Path) -> Result<BTreeSet<TriggerId>> {
        let names = catalog::list_images(folder, &self.config)?;
        Ok(self.known_trigger_ids(names.iter().map(String::as_str)))
    }

    /// Start and end of the log, taken from the timestamped lines with the
    /// smallest and largest trigger ID.
    pub fn extract_date_range(&self, log_text: &str) -> Option<LogDateRange> {
        let mut entries: Vec<(TriggerId, &str)> = Vec::new();

        for line in log_text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let ids = self.line_ids(line);
            if ids.is_empty() {
                continue;
            }
            let Some(timestamp) = self
                .timestamp_patterns
                .iter()
                .find_map(|pattern| pattern.find(line))
            else {
                continue;
            };
            entries.extend(ids.into_iter().map(|id| (id, timestamp.as_str())));
        }

        // Stable sort keeps the first occurrence of a repeated ID in front.
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let (start_id, start) = entries.first()?.clone();
        let (end_id, end) = entries.last()?.clone();

        Some(LogDateRange {
            start_date: format_timestamp(start),
            end_date: format_timestamp(end),
            start_id,
            end_id,
        })
    }

    fn line_ids(&self, line: &str) -> Vec<TriggerId> {
        self.id_pattern
            .captures_iter(line)
            .filter_map(|caps| TriggerId::parse(caps.get(1)?.as_str()))
            .collect()
    }
}

pub fn read_log(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| AnalyticsError::LogRead {
        path: path.to_path_buf(),
        source,
    })
}

impl LogAnalysis {
    pub fn read_sessions(&self) -> usize {
        self.unique_ids.len().saturating_sub(self.total_noread)
    }

    pub fn gross_rate(&self) -> f64 {
        rates::log_gross_rate(self.unique_ids.len(), self.total_noread)
    }
}

/// Missed triggers and timeouts, sorted numerically by ID.
pub fn issues(analysis: &LogAnalysis) -> Vec<Issue> {
    let mut issues: Vec<Issue> = analysis
        .missed_trigger_ids
        .iter()
        .map(|id| Issue {
            id: id.clone(),
            kind: IssueKind::MissedTrig,
        })
        .chain(analysis.timeout_ids.iter().map(|id| Issue {
            id: id.clone(),
            kind: IssueKind::Timeout,
        }))
        .collect();
    issues.sort_by(|a, b| a.id.cmp(&b.id));
    issues
}

fn format_timestamp(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&collapsed, format).ok())
        .map(|timestamp| timestamp.format("%d-%m-%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> LogAnalyzer {
        LogAnalyzer::new(&AnalyticsConfig::default()).unwrap()
    }

    fn ids(raw: &[&str]) -> BTreeSet<TriggerId> {
        raw.iter().filter_map(|id| TriggerId::parse(id)).collect()
    }

    #[test]
    fn noread_cross_references_captured_images() {
        let log = "2025-01-01 10:00:00 NOREAD ID: 42\n2025-01-01 10:00:05 NOREAD ID: 99\n";
        let analysis = analyzer().parse(log, &ids(&["42"]));

        assert_eq!(analysis.total_noread, 1);
        assert_eq!(analysis.false_triggers, 1);
        assert_eq!(analysis.unique_ids, ids(&["42", "99"]));
        assert_eq!(analysis.missed_trigger_ids, vec![TriggerId::parse("99").unwrap()]);
        assert_eq!(analysis.effective_session_count, 1);
    }

    #[test]
    fn single_id_noread_line_increments_exactly_one_counter() {
        let analyzer = analyzer();
        let known = analyzer.parse("noread ID: 7", &ids(&["7"]));
        assert_eq!((known.total_noread, known.false_triggers), (1, 0));

        let unknown = analyzer.parse("noread ID: 7", &ids(&[]));
        assert_eq!((unknown.total_noread, unknown.false_triggers), (0, 1));
    }

    #[test]
    fn leading_zeros_do_not_split_ids() {
        let log = "read ok ID: 0000000042\nNoRead ID: 42";
        let analysis = analyzer().parse(log, &ids(&["0000000042"]));
        assert_eq!(analysis.unique_ids.len(), 1);
        assert_eq!(analysis.total_noread, 1);
    }

    #[test]
    fn timeouts_counted_once_per_line() {
        let log = "Scanner TIMEOUT ID: 5 ID: 6\nTimed out waiting ID: 8\nno response ID: 9\ngood read ID: 10";
        let analysis = analyzer().parse(log, &ids(&[]));
        assert_eq!(analysis.timeouts, 3);
        assert_eq!(analysis.timeout_ids, ids(&["5", "6", "8", "9"]).into_iter().collect::<Vec<_>>());
        assert_eq!(analysis.effective_session_count, 2);
        assert_eq!(analysis.total_entries, 4);
    }

    #[test]
    fn false_trigger_lines_are_not_timeouts() {
        let analysis = analyzer().parse("NOREAD timeout ID: 11", &ids(&[]));
        assert_eq!(analysis.false_triggers, 1);
        assert_eq!(analysis.timeouts, 0);

        let genuine = analyzer().parse("NOREAD timeout ID: 11", &ids(&["11"]));
        assert_eq!(genuine.total_noread, 1);
        assert_eq!(genuine.timeouts, 1);
    }

    #[test]
    fn effective_count_never_negative() {
        let log = "noread ID: 1\nnoread ID: 1\nnoread ID: 1";
        let analysis = analyzer().parse(log, &ids(&[]));
        assert_eq!(analysis.unique_ids.len(), 1);
        assert_eq!(analysis.false_triggers, 3);
        assert_eq!(analysis.effective_session_count, 0);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let analysis = analyzer().parse("\n   \nID: 3 ok\n", &ids(&[]));
        assert_eq!(analysis.total_entries, 1);
        assert_eq!(analysis.effective_session_count, 1);
    }

    #[test]
    fn known_ids_need_long_numeric_segment() {
        let known = analyzer().known_trigger_ids([
            "0000000042_0001_000_20250101.jpg",
            "42_0001_20250101.jpg",
            "ABCDEFGHIJ_0001_20250101.jpg",
            "0000000043.jpg",
        ]);
        assert_eq!(known, ids(&["42"]));
    }

    #[test]
    fn unreadable_folder_is_an_error() {
        let err = analyzer()
            .scan_known_trigger_ids(Path::new("/definitely/not/here"))
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::FolderRead { .. }));
    }

    #[test]
    fn only_image_files_count_as_captured() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0000000042_0001_T.jpg"), b"").unwrap();
        std::fs::write(dir.path().join("0000000099_0001_T.xml"), b"").unwrap();
        std::fs::create_dir(dir.path().join("0000000077_backup")).unwrap();

        let analyzer = analyzer();
        let known = analyzer.scan_known_trigger_ids(dir.path()).unwrap();
        assert_eq!(known, ids(&["42"]));

        let log = "NOREAD ID: 0000000042\nNOREAD ID: 0000000099\nNOREAD ID: 0000000077";
        let analysis = analyzer.parse(log, &known);
        assert_eq!(analysis.total_noread, 1);
        assert_eq!(analysis.false_triggers, 2);
        assert_eq!(analysis.effective_session_count, 1);
    }

    #[test]
    fn missing_log_is_an_error() {
        let err = read_log(Path::new("/definitely/not/here.log")).unwrap_err();
        assert!(matches!(err, AnalyticsError::LogRead { .. }));
    }

    #[test]
    fn issues_sorted_numerically() {
        let log = "noread ID: 100\ntimeout ID: 20\nnoread ID: 3";
        let list = issues(&analyzer().parse(log, &ids(&[])));
        let rendered: Vec<String> = list
            .iter()
            .map(|issue| format!("{}:{}", issue.id, issue.kind))
            .collect();
        assert_eq!(rendered, vec!["3:MissedTrig", "20:Timeout", "100:MissedTrig"]);
    }

    #[test]
    fn date_range_follows_smallest_and_largest_id() {
        let log = "\
2025-03-02 08:15:00 ok ID: 0000000105
2025-03-01 23:59:59 ok ID: 0000000100
20250302_091500 noread ID: 0000000110
no timestamp ID: 0000000200";
        let range = analyzer().extract_date_range(log).unwrap();
        assert_eq!(range.start_date, "01-03-2025 23:59:59");
        assert_eq!(range.end_date, "02-03-2025 09:15:00");
        assert_eq!(range.start_id.as_str(), "100");
        assert_eq!(range.end_id.as_str(), "110");
    }

    #[test]
    fn date_range_absent_without_timestamps() {
        assert!(analyzer().extract_date_range("ID: 1 ok\nID: 2 ok").is_none());
    }

    #[test]
    fn gross_rate_uses_genuine_noreads() {
        let log = "ok ID: 1\nok ID: 2\nok ID: 3\nnoread ID: 4";
        let analysis = analyzer().parse(log, &ids(&["4"]));
        assert_eq!(analysis.read_sessions(), 3);
        assert!((analysis.gross_rate() - 75.0).abs() < 1e-9);
    }
}

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Serialize, Serializer};

/// Operator-assigned label of a single image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Unclassified,
    NoLabel,
    ReadFailure,
    Incomplete,
    Unreadable,
}

impl Classification {
    pub const ALL: [Classification; 5] = [
        Classification::Unclassified,
        Classification::NoLabel,
        Classification::ReadFailure,
        Classification::Incomplete,
        Classification::Unreadable,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Classification::Unclassified => "(Unclassified)",
            Classification::NoLabel => "no label",
            Classification::ReadFailure => "read failure",
            Classification::Incomplete => "incomplete",
            Classification::Unreadable => "unreadable",
        }
    }

    /// Accepts the stored labels as well as `no_label` / `read-failure` style
    /// spellings typed on the command line.
    pub fn from_label(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "(unclassified)" | "unclassified" | "" => Some(Classification::Unclassified),
            "no label" => Some(Classification::NoLabel),
            "read failure" => Some(Classification::ReadFailure),
            "incomplete" => Some(Classification::Incomplete),
            "unreadable" => Some(Classification::Unreadable),
            _ => None,
        }
    }

    pub fn is_classified(self) -> bool {
        self != Classification::Unclassified
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Resolved label of a whole session. `Incomplete` has no counterpart here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionClass {
    ReadFailure,
    Unreadable,
    NoLabel,
    Unlabeled,
}

impl SessionClass {
    pub const ALL: [SessionClass; 4] = [
        SessionClass::NoLabel,
        SessionClass::ReadFailure,
        SessionClass::Unreadable,
        SessionClass::Unlabeled,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SessionClass::ReadFailure => "read failure",
            SessionClass::Unreadable => "unreadable",
            SessionClass::NoLabel => "no label",
            SessionClass::Unlabeled => "unlabeled",
        }
    }
}

impl fmt::Display for SessionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub identifier: String,
    pub classification: Classification,
    pub ocr_readable: bool,
    pub false_no_read: bool,
    pub comment: String,
}

impl ImageRecord {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            classification: Classification::Unclassified,
            ocr_readable: false,
            false_no_read: false,
            comment: String::new(),
        }
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.set_classification(classification);
        self
    }

    pub fn set_classification(&mut self, classification: Classification) {
        self.classification = classification;
        if classification != Classification::ReadFailure {
            self.false_no_read = false;
        }
    }

    pub fn set_ocr_readable(&mut self, value: bool) {
        self.ocr_readable = value;
        if value {
            self.false_no_read = false;
        }
    }

    /// Returns false (and leaves the record untouched) when the image is not a
    /// read failure.
    pub fn set_false_no_read(&mut self, value: bool) -> bool {
        if value && self.classification != Classification::ReadFailure {
            return false;
        }
        self.false_no_read = value;
        if value {
            self.ocr_readable = false;
        }
        true
    }
}

/// Per-session view built from the member images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    pub key: String,
    pub members: Vec<String>,
    /// Distinct classified labels among the members.
    pub labels: BTreeSet<Classification>,
    pub ocr_readable: bool,
    pub false_no_read: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    /// Every distinct session key, classified or not.
    pub total_sessions: usize,
    /// Sessions with at least one classified member.
    pub actual_sessions: usize,
    pub no_label: usize,
    pub read_failure: usize,
    /// Sessions resolved to the unreadable bucket, counted directly.
    pub unreadable: usize,
    /// `actual_sessions - no_label - read_failure`.
    pub unreadable_code: usize,
    pub ocr_readable: usize,
    pub ocr_readable_non_failure: usize,
    pub false_no_read: usize,
    pub ocr_in_read_failure: usize,
    pub ocr_in_unreadable: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateResult {
    pub total_readable_excl_ocr: i64,
    pub total_readable_incl_ocr: i64,
    pub successful_reads_excl_ocr: i64,
    pub successful_reads_incl_ocr: i64,
    pub net_rate_excl_ocr: f64,
    pub net_rate_incl_ocr: f64,
    pub ocr_improvement_percentage: f64,
}

/// Decimal trigger ID with leading zeros stripped; orders numerically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerId(String);

impl TriggerId {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let trimmed = raw.trim_start_matches('0');
        Some(Self(if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for TriggerId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for TriggerId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for TriggerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogAnalysis {
    pub total_entries: usize,
    pub unique_ids: BTreeSet<TriggerId>,
    pub false_triggers: usize,
    pub timeouts: usize,
    pub total_noread: usize,
    pub effective_session_count: usize,
    pub missed_trigger_ids: Vec<TriggerId>,
    pub timeout_ids: Vec<TriggerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IssueKind {
    MissedTrig,
    Timeout,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::MissedTrig => f.write_str("MissedTrig"),
            IssueKind::Timeout => f.write_str("Timeout"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub id: TriggerId,
    pub kind: IssueKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogDateRange {
    pub start_date: String,
    pub end_date: String,
    pub start_id: TriggerId,
    pub end_id: TriggerId,
}

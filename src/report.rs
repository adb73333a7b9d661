use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::catalog::{ImageCatalog, ImageCounts};
use crate::models::{
    Classification, LogAnalysis, LogDateRange, RateResult, SessionCounts, SessionView,
};
use crate::rates::{self, CaptureGross, RateInputs};
use crate::session;

/// Every number shown on the dashboard or written to the report, computed
/// once. Both renderings read from this value and never recompute.
#[derive(Debug, Clone, Serialize)]
pub struct ReportFigures {
    pub total_entered: u64,
    pub counts: SessionCounts,
    pub rates: RateResult,
    pub capture_gross: Option<CaptureGross>,
    pub integrity: IntegrityCheck,
    pub log: Option<LogFigures>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntegrityCheck {
    pub no_label: usize,
    pub read_failure: usize,
    pub unreadable: usize,
    pub expected: usize,
}

impl IntegrityCheck {
    pub fn sum(&self) -> usize {
        self.no_label + self.read_failure + self.unreadable
    }

    pub fn is_ok(&self) -> bool {
        self.sum() == self.expected
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogFigures {
    pub unique_sessions: usize,
    pub read_sessions: usize,
    pub noread_sessions: usize,
    pub false_triggers: usize,
    pub timeouts: usize,
    pub effective_sessions: usize,
    pub gross_rate: f64,
    pub date_range: Option<LogDateRange>,
}

impl ReportFigures {
    pub fn build(sessions: &BTreeMap<String, SessionView>, total_entered: u64) -> Self {
        let counts = session::count_sessions(sessions);
        let rates = rates::compute_rates(&RateInputs::from_counts(total_entered, &counts));
        let integrity = IntegrityCheck {
            no_label: counts.no_label,
            read_failure: counts.read_failure,
            unreadable: counts.unreadable,
            expected: counts.actual_sessions,
        };
        if !integrity.is_ok() {
            tracing::error!(?integrity, "session buckets do not add up to classified sessions");
        }

        Self {
            total_entered,
            capture_gross: rates::capture_gross_rate(total_entered, counts.actual_sessions),
            counts,
            rates,
            integrity,
            log: None,
        }
    }

    pub fn with_log(mut self, analysis: &LogAnalysis, date_range: Option<LogDateRange>) -> Self {
        self.log = Some(LogFigures {
            unique_sessions: analysis.unique_ids.len(),
            read_sessions: analysis.read_sessions(),
            noread_sessions: analysis.total_noread,
            false_triggers: analysis.false_triggers,
            timeouts: analysis.timeouts,
            effective_sessions: analysis.effective_session_count,
            gross_rate: analysis.gross_rate(),
            date_range,
        });
        self
    }
}

pub fn integrity_line(check: &IntegrityCheck) -> String {
    let mut line = format!(
        "Integrity check: {} + {} + {} = {}",
        check.no_label,
        check.read_failure,
        check.unreadable,
        check.sum()
    );
    if check.is_ok() {
        line.push_str(" (OK)");
    } else {
        let _ = write!(line, " (MISMATCH: should be {})", check.expected);
    }
    line
}

fn fraction_line(label: &str, successes: i64, total: i64, rate: f64) -> String {
    if total > 0 {
        format!("{label}: {successes}/{total} ({rate:.2}%)")
    } else {
        format!("{label}: N/A (no readable sessions)")
    }
}

fn readable_total(figures: &ReportFigures, total: i64) -> String {
    if figures.total_entered == 0 {
        "N/A (enter expected total)".to_string()
    } else {
        total.to_string()
    }
}

/// Session breakdown shared by the dashboard and the exported report.
pub fn reading_lines(figures: &ReportFigures) -> Vec<String> {
    let counts = &figures.counts;
    let mut lines = Vec::new();
    if let Some(log) = &figures.log {
        lines.push(format!("Number of Failed sessions: {}", log.noread_sessions));
    }
    lines.push(format!("Number of classified sessions: {}", counts.actual_sessions));
    lines.push(format!("Number of No-Code sessions: {}", counts.no_label));
    lines.push(format!("Number of Read-Failure sessions: {}", counts.read_failure));
    lines.push(format!("Number of Unreadable sessions: {}", figures.integrity.unreadable));
    lines.push(format!("Number of OCR recovered sessions: {}", counts.ocr_readable));
    lines.push(format!(
        "Number of OCR recovered failure sessions: {}",
        counts.ocr_recovered_failures()
    ));
    lines.push(format!(
        "Sub-Number of OCR recovered in 'read failure' sessions: {}",
        counts.ocr_in_read_failure
    ));
    lines.push(format!(
        "Sub-Number of OCR recovered in 'unreadable' sessions: {}",
        counts.ocr_in_unreadable
    ));
    lines.push(format!("Number of False NoRead sessions: {}", counts.false_no_read));
    lines.push(format!(
        "Total readable sessions (excl. OCR): {}",
        readable_total(figures, figures.rates.total_readable_excl_ocr)
    ));
    lines.push(format!(
        "Total readable sessions (incl. OCR): {}",
        readable_total(figures, figures.rates.total_readable_incl_ocr)
    ));
    lines.push(integrity_line(&figures.integrity));
    lines
}

/// Gross and net rates shared by the dashboard and the exported report.
pub fn read_rate_lines(figures: &ReportFigures) -> Vec<String> {
    let rates = &figures.rates;
    let mut lines = Vec::new();

    if let Some(log) = &figures.log {
        lines.push(format!("Gross read performance (log): {:.1}%", log.gross_rate));
    }
    if let Some(gross) = &figures.capture_gross {
        lines.push(format!(
            "Gross read rate: {}/{} ({:.2}%)",
            gross.read, gross.total, gross.rate
        ));
    }
    lines.push(fraction_line(
        "Net read rate (excl. OCR)",
        rates.successful_reads_excl_ocr,
        rates.total_readable_excl_ocr,
        rates.net_rate_excl_ocr,
    ));
    lines.push(fraction_line(
        "Net read rate (incl. OCR)",
        rates.successful_reads_incl_ocr,
        rates.total_readable_incl_ocr,
        rates.net_rate_incl_ocr,
    ));
    if rates.successful_reads_excl_ocr > 0 {
        lines.push(format!(
            "OCR read rate improvement: +{:.2}%",
            rates.ocr_improvement_percentage
        ));
    } else {
        lines.push("OCR read rate improvement: N/A (no baseline reads)".to_string());
    }
    lines
}

pub fn log_lines(log: &LogFigures) -> Vec<String> {
    vec![
        format!("Number of sessions: {}", log.unique_sessions),
        format!("Number of Read sessions: {}", log.read_sessions),
        format!("Number of No-Read sessions: {}", log.noread_sessions),
        format!("Number of False triggers: {}", log.false_triggers),
        format!("Number of Timeouts: {}", log.timeouts),
        format!("Number of Effective sessions: {}", log.effective_sessions),
    ]
}

fn date_lines(log: Option<&LogFigures>) -> Vec<String> {
    match log.and_then(|log| log.date_range.as_ref()) {
        Some(range) => vec![
            format!("Start Date: {}", range.start_date),
            format!("End Date: {}", range.end_date),
        ],
        None => vec![
            "Start Date: Not available".to_string(),
            "End Date: Not available".to_string(),
        ],
    }
}

/// Per-image progress block shown at the top of the dashboard.
pub fn image_summary(counts: &ImageCounts) -> Vec<String> {
    let remaining = counts.total - counts.classified;
    let mut lines = vec![format!(
        "{}/{} images classified ({} remaining, {:.1}%)",
        counts.classified,
        counts.total,
        remaining,
        rates::percentage(counts.classified, counts.total)
    )];
    for class in Classification::ALL {
        lines.push(format!("  {}: {}", class.label(), counts.count(class)));
    }
    lines.push(format!("  OCR recovered: {}", counts.ocr_readable));
    lines.push(format!("  False NoRead: {}", counts.false_no_read));

    let parts = [
        counts.count(Classification::NoLabel),
        counts.count(Classification::ReadFailure),
        counts.count(Classification::Incomplete),
        counts.count(Classification::Unreadable),
    ];
    let sum: usize = parts.iter().sum();
    let mut integrity = format!(
        "Integrity check: {} + {} + {} + {} = {}",
        parts[0], parts[1], parts[2], parts[3], sum
    );
    if sum == counts.classified {
        integrity.push_str(" (OK)");
    } else {
        let _ = write!(integrity, " (MISMATCH: should be {})", counts.classified);
    }
    lines.push(integrity);
    lines
}

pub fn render_dashboard(images: &ImageCounts, figures: &ReportFigures) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "=== IMAGES ===");
    for line in image_summary(images) {
        let _ = writeln!(output, "{line}");
    }

    if let Some(log) = &figures.log {
        let _ = writeln!(output);
        let _ = writeln!(output, "=== LOG FILE ANALYSIS ===");
        for line in date_lines(Some(log)).into_iter().chain(log_lines(log)) {
            let _ = writeln!(output, "{line}");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "=== SESSIONS ===");
    let _ = writeln!(output, "Expected total sessions: {}", figures.total_entered);
    for line in reading_lines(figures) {
        let _ = writeln!(output, "{line}");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "=== READ RATE ===");
    for line in read_rate_lines(figures) {
        let _ = writeln!(output, "{line}");
    }

    output
}

pub fn render_export(
    figures: &ReportFigures,
    folder: &Path,
    log_path: Option<&Path>,
    generated: NaiveDateTime,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "FIS ANALYTICS - LOG ANALYSIS REPORT");
    let _ = writeln!(output, "{}", "=".repeat(60));
    let _ = writeln!(output, "Generated: {}", generated.format("%d-%m-%Y %H:%M:%S"));
    let _ = writeln!(output);

    let _ = writeln!(output, "=== PATH ===");
    let _ = writeln!(output, "Folder Path: {}", folder.display());
    match log_path {
        Some(path) => {
            let _ = writeln!(output, "Log File Path: {}", path.display());
        }
        None => {
            let _ = writeln!(output, "Log File Path: Not set");
        }
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "=== DATES ===");
    for line in date_lines(figures.log.as_ref()) {
        let _ = writeln!(output, "{line}");
    }
    let _ = writeln!(output);

    if let Some(log) = &figures.log {
        let _ = writeln!(output, "=== LOG FILE ANALYSIS ===");
        for line in log_lines(log) {
            let _ = writeln!(output, "{line}");
        }
        let _ = writeln!(output);
    }

    let _ = writeln!(output, "=== READING ANALYSIS ===");
    let _ = writeln!(output, "Expected total sessions: {}", figures.total_entered);
    for line in reading_lines(figures) {
        let _ = writeln!(output, "{line}");
    }
    let _ = writeln!(output);

    let _ = writeln!(output, "=== READ RATE ===");
    for line in read_rate_lines(figures) {
        let _ = writeln!(output, "{line}");
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "{}", "=".repeat(50));
    let _ = writeln!(output, "End of Report");

    output
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatRow {
    pub category: &'static str,
    pub metric: String,
    pub value: String,
    pub description: String,
}

fn stat(category: &'static str, metric: impl Into<String>, value: impl ToString, description: impl Into<String>) -> StatRow {
    StatRow {
        category,
        metric: metric.into(),
        value: value.to_string(),
        description: description.into(),
    }
}

/// Rows of the `stats_<timestamp>.csv` export.
pub fn stats_rows(
    images: &ImageCounts,
    figures: &ReportFigures,
    folder: &Path,
    generated: NaiveDateTime,
) -> Vec<StatRow> {
    let mut rows = Vec::new();

    for class in Classification::ALL {
        rows.push(stat(
            "Image_Counts",
            class.label(),
            images.count(class),
            format!("Number of images classified as {}", class.label()),
        ));
    }
    rows.push(stat("Image_Counts", "total_images", images.total, "Total number of images in dataset"));

    let counts = &figures.counts;
    let session_rows = [
        ("sessions_no label", counts.no_label, "Number of sessions classified as no label"),
        ("sessions_read failure", counts.read_failure, "Number of sessions classified as read failure"),
        ("sessions_unreadable", counts.unreadable, "Number of sessions classified as unreadable"),
        ("sessions_unlabeled", counts.total_sessions - counts.actual_sessions, "Number of sessions without classified images"),
        ("sessions_ocr_readable", counts.ocr_readable, "Number of sessions recovered with OCR"),
        ("sessions_false_noread", counts.false_no_read, "Number of sessions marked False NoRead"),
        ("total_unique_sessions", counts.total_sessions, "Total number of unique sessions"),
        ("actual_sessions", counts.actual_sessions, "Number of sessions with at least one classified image"),
    ];
    for (metric, value, description) in session_rows {
        rows.push(stat("Session_Counts", metric, value, description));
    }
    rows.push(stat(
        "Session_Counts",
        "manual_total_sessions",
        figures.total_entered,
        "Expected total number of sessions",
    ));

    rows.push(stat("Progress_Stats", "classified_images", images.classified, "Number of images that have been classified"));
    rows.push(stat(
        "Progress_Stats",
        "unclassified_images",
        images.total - images.classified,
        "Number of images still unclassified",
    ));
    rows.push(stat(
        "Progress_Stats",
        "progress_percentage",
        format!("{:.1}%", rates::percentage(images.classified, images.total)),
        "Percentage of images classified",
    ));

    let net = &figures.rates;
    rows.push(stat("Read_Rates", "net_rate_excl_ocr", format!("{:.2}%", net.net_rate_excl_ocr), "Net read rate excluding OCR recovery"));
    rows.push(stat("Read_Rates", "net_rate_incl_ocr", format!("{:.2}%", net.net_rate_incl_ocr), "Net read rate including OCR recovery"));
    rows.push(stat(
        "Read_Rates",
        "ocr_improvement",
        format!("{:.2}%", net.ocr_improvement_percentage),
        "Relative read gain from OCR recovery",
    ));

    rows.push(stat(
        "System_Info",
        "timestamp",
        generated.format("%Y-%m-%d %H:%M:%S"),
        "Time when statistics were generated",
    ));
    rows.push(stat("System_Info", "source_folder", folder.display(), "Source folder path for images"));
    rows
}

/// Explains how one session got its classification.
pub fn diagnose(catalog: &ImageCatalog, key: &str) -> Option<String> {
    let sessions = catalog.sessions();
    let session = sessions.get(key)?;

    let mut by_label: BTreeMap<Classification, Vec<&str>> = BTreeMap::new();
    for member in &session.members {
        let class = catalog
            .get(member)
            .map(|record| record.classification)
            .unwrap_or(Classification::Unclassified);
        by_label.entry(class).or_default().push(member);
    }

    let mut output = String::new();
    let _ = writeln!(output, "=== SESSION {key} ===");
    let _ = writeln!(output, "Total images: {}", session.members.len());
    let _ = writeln!(output, "Resolved classification: {}", session.resolved());
    match session::deciding_rule(&session.labels) {
        Some((label, class)) => {
            let _ = writeln!(output, "Reason: contains a '{label}' image, which resolves to '{class}'");
        }
        None => {
            let _ = writeln!(output, "Reason: no classified images");
        }
    }
    let _ = writeln!(output, "OCR recovered: {}", session.ocr_readable);
    let _ = writeln!(output, "False NoRead: {}", session.false_no_read);
    let _ = writeln!(output);
    for (class, members) in by_label {
        let _ = writeln!(output, "{}: {} images", class.label().to_uppercase(), members.len());
        for member in members {
            let _ = writeln!(output, "  - {member}");
        }
    }
    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyticsConfig;
    use crate::log_analysis::LogAnalyzer;
    use crate::models::{ImageRecord, TriggerId};
    use chrono::NaiveDate;

    fn sample_catalog() -> ImageCatalog {
        let mut fnr = ImageRecord::new("0000000003_0001_T3.jpg").with_classification(Classification::ReadFailure);
        fnr.set_false_no_read(true);
        let mut ocr = ImageRecord::new("0000000004_0001_T4.jpg").with_classification(Classification::Unreadable);
        ocr.set_ocr_readable(true);
        ImageCatalog::from_records(
            "scans",
            vec![
                ImageRecord::new("0000000001_0001_T1.jpg").with_classification(Classification::NoLabel),
                ImageRecord::new("0000000002_0001_T2.jpg").with_classification(Classification::ReadFailure),
                ImageRecord::new("0000000002_0002_T2.jpg").with_classification(Classification::Incomplete),
                fnr,
                ocr,
                ImageRecord::new("0000000005_0001_T5.jpg").with_classification(Classification::Incomplete),
                ImageRecord::new("0000000006_0001_T6.jpg"),
            ],
        )
    }

    fn generated() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 2)
            .and_then(|date| date.and_hms_opt(3, 4, 5))
            .unwrap()
    }

    fn figures_with_log() -> ReportFigures {
        let catalog = sample_catalog();
        let analyzer = LogAnalyzer::new(&AnalyticsConfig::default()).unwrap();
        let known = analyzer.known_trigger_ids(catalog.file_names());
        let log = "NOREAD ID: 0000000002\nNOREAD ID: 0000000099\nok ID: 0000000010\nok ID: 0000000011";
        let analysis = analyzer.parse(log, &known);
        assert!(known.contains(&TriggerId::parse("2").unwrap()));
        ReportFigures::build(&catalog.sessions(), 20).with_log(&analysis, None)
    }

    #[test]
    fn integrity_line_flags_mismatch() {
        let ok = IntegrityCheck { no_label: 1, read_failure: 2, unreadable: 3, expected: 6 };
        assert_eq!(integrity_line(&ok), "Integrity check: 1 + 2 + 3 = 6 (OK)");

        let bad = IntegrityCheck { expected: 7, ..ok };
        assert_eq!(integrity_line(&bad), "Integrity check: 1 + 2 + 3 = 6 (MISMATCH: should be 7)");
    }

    #[test]
    fn figures_match_session_snapshot() {
        let figures = ReportFigures::build(&sample_catalog().sessions(), 20);
        assert_eq!(figures.counts.actual_sessions, 5);
        assert_eq!(figures.counts.read_failure, 2);
        assert_eq!(figures.counts.unreadable, 2);
        assert!(figures.integrity.is_ok());
        // 20 - 5 + 2 readable, 17 - 2 + 1 successful
        assert_eq!(figures.rates.total_readable_excl_ocr, 17);
        assert_eq!(figures.rates.successful_reads_excl_ocr, 16);
        assert_eq!(figures.rates.total_readable_incl_ocr, 18);
        assert_eq!(figures.rates.successful_reads_incl_ocr, 17);
    }

    #[test]
    fn dashboard_and_export_share_metric_lines() {
        let figures = figures_with_log();
        let dashboard = render_dashboard(&sample_catalog().image_counts(), &figures);
        let export = render_export(&figures, Path::new("scans"), Some(Path::new("scanner.log")), generated());

        for line in reading_lines(&figures)
            .into_iter()
            .chain(read_rate_lines(&figures))
            .chain(log_lines(figures.log.as_ref().unwrap()))
        {
            assert!(dashboard.contains(&line), "dashboard missing {line}");
            assert!(export.contains(&line), "export missing {line}");
        }
        assert!(export.contains("Generated: 02-01-2025 03:04:05"));
        assert!(export.contains("Number of Failed sessions: 1"));
        assert!(export.contains("Number of False triggers: 1"));
        assert!(export.ends_with("End of Report\n"));
    }

    #[test]
    fn unreadable_line_matches_integrity_term() {
        let mut figures = ReportFigures::build(&sample_catalog().sessions(), 20);
        figures.counts.unreadable_code = 99;
        let lines = reading_lines(&figures);
        assert!(lines.contains(&"Number of Unreadable sessions: 2".to_string()));
        assert!(lines.contains(&"Integrity check: 1 + 2 + 2 = 5 (OK)".to_string()));
    }

    #[test]
    fn missing_total_renders_not_applicable() {
        let figures = ReportFigures::build(&sample_catalog().sessions(), 0);
        assert!(figures.capture_gross.is_none());
        let reading = reading_lines(&figures).join("\n");
        assert!(reading.contains("Total readable sessions (excl. OCR): N/A (enter expected total)"));
        let rates = read_rate_lines(&figures).join("\n");
        assert!(rates.contains("Net read rate (excl. OCR): N/A (no readable sessions)"));
        assert!(rates.contains("OCR read rate improvement: N/A (no baseline reads)"));
    }

    #[test]
    fn rate_lines_render_rate_result_values() {
        let figures = ReportFigures::build(&sample_catalog().sessions(), 20);
        let lines = read_rate_lines(&figures);
        assert!(lines.contains(&"Gross read rate: 15/20 (75.00%)".to_string()));
        assert!(lines.contains(&"Net read rate (excl. OCR): 16/17 (94.12%)".to_string()));
        assert!(lines.contains(&"OCR read rate improvement: +6.25%".to_string()));
    }

    #[test]
    fn image_summary_checks_label_sum() {
        let lines = image_summary(&sample_catalog().image_counts());
        assert_eq!(lines[0], "6/7 images classified (1 remaining, 85.7%)");
        assert!(lines.last().unwrap().ends_with("= 6 (OK)"));
    }

    #[test]
    fn stats_rows_reuse_figures() {
        let catalog = sample_catalog();
        let figures = ReportFigures::build(&catalog.sessions(), 20);
        let rows = stats_rows(&catalog.image_counts(), &figures, Path::new("scans"), generated());
        let value = |metric: &str| {
            rows.iter()
                .find(|row| row.metric == metric)
                .map(|row| row.value.clone())
                .unwrap()
        };
        assert_eq!(value("manual_total_sessions"), "20");
        assert_eq!(value("sessions_unlabeled"), "1");
        assert_eq!(value("net_rate_excl_ocr"), format!("{:.2}%", figures.rates.net_rate_excl_ocr));
        assert_eq!(value("timestamp"), "2025-01-02 03:04:05");
    }

    #[test]
    fn diagnose_names_deciding_rule() {
        let catalog = sample_catalog();
        let report = diagnose(&catalog, "0000000002_T2").unwrap();
        assert!(report.contains("Resolved classification: read failure"));
        assert!(report.contains("READ FAILURE: 1 images"));
        assert!(report.contains("INCOMPLETE: 1 images"));

        let folded = diagnose(&catalog, "0000000005_T5").unwrap();
        assert!(folded.contains("contains a 'incomplete' image, which resolves to 'unreadable'"));
        assert!(diagnose(&catalog, "nope").is_none());
    }
}

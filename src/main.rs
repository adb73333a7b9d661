use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod catalog;
mod config;
mod detect;
mod error;
mod log_analysis;
mod models;
mod rates;
mod report;
mod session;
mod store;

use catalog::{ImageCatalog, ImageFilter};
use config::AnalyticsConfig;
use log_analysis::LogAnalyzer;
use models::{Classification, LogAnalysis, LogDateRange};
use report::ReportFigures;

#[derive(Parser)]
#[command(name = "readrate")]
#[command(about = "Barcode scanner read-rate analytics over labelled image folders", long_about = None)]
struct Cli {
    /// TOML file overriding the built-in tunables
    #[arg(long, global = true, env = "READRATE_CONFIG")]
    config: Option<PathBuf>,
    /// Log progress details
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show classification progress, session counts and read rates
    Status {
        folder: PathBuf,
        /// Expected number of sessions. Overrides the effective session count
        /// derived from --log; without it the log count is used when positive,
        /// then the span of trigger IDs in the image names
        #[arg(long)]
        total: Option<u64>,
        /// Scanner log to cross-reference
        #[arg(long)]
        log: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// List images, optionally filtered
    List {
        folder: PathBuf,
        #[arg(long, value_enum, default_value_t = ListFilter::All)]
        filter: ListFilter,
    },
    /// Label one image and save the revision file
    Label {
        folder: PathBuf,
        image: String,
        #[arg(long, value_enum)]
        label: Option<LabelArg>,
        #[arg(long)]
        ocr: Option<bool>,
        #[arg(long)]
        false_no_read: Option<bool>,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Parse a scanner log and write the issues CSV
    AnalyzeLog {
        folder: PathBuf,
        log: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write the text report and stats CSV
    Report {
        folder: PathBuf,
        #[arg(long)]
        log: Option<PathBuf>,
        /// Expected number of sessions. Overrides the effective session count
        /// derived from --log; without it the log count is used when positive,
        /// then the span of trigger IDs in the image names
        #[arg(long)]
        total: Option<u64>,
        /// Output directory, defaults to the image folder
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export session lists per resolved classification
    Sessions { folder: PathBuf },
    /// Explain how a session was classified
    Diagnose { folder: PathBuf, session: String },
    /// Label unclassified images by barcode detection
    AutoClassify {
        folder: PathBuf,
        /// Keep polling the folder for new images every N seconds
        #[arg(long)]
        watch: Option<u64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum LabelArg {
    NoLabel,
    ReadFailure,
    Incomplete,
    Unreadable,
    Unclassified,
}

impl From<LabelArg> for Classification {
    fn from(arg: LabelArg) -> Self {
        match arg {
            LabelArg::NoLabel => Classification::NoLabel,
            LabelArg::ReadFailure => Classification::ReadFailure,
            LabelArg::Incomplete => Classification::Incomplete,
            LabelArg::Unreadable => Classification::Unreadable,
            LabelArg::Unclassified => Classification::Unclassified,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum ListFilter {
    All,
    Unclassified,
    NoLabel,
    ReadFailure,
    Incomplete,
    Unreadable,
    Ocr,
    FalseNoRead,
}

impl From<ListFilter> for ImageFilter {
    fn from(filter: ListFilter) -> Self {
        match filter {
            ListFilter::All => ImageFilter::All,
            ListFilter::Unclassified => ImageFilter::Label(Classification::Unclassified),
            ListFilter::NoLabel => ImageFilter::Label(Classification::NoLabel),
            ListFilter::ReadFailure => ImageFilter::Label(Classification::ReadFailure),
            ListFilter::Incomplete => ImageFilter::Label(Classification::Incomplete),
            ListFilter::Unreadable => ImageFilter::Label(Classification::Unreadable),
            ListFilter::Ocr => ImageFilter::OcrRecovered,
            ListFilter::FalseNoRead => ImageFilter::FalseNoRead,
        }
    }
}

struct LogInput {
    path: PathBuf,
    analysis: LogAnalysis,
    date_range: Option<LogDateRange>,
}

/// Scans the folder and restores labels from the latest revision file.
fn open_catalog(folder: &Path, config: &AnalyticsConfig) -> anyhow::Result<(ImageCatalog, PathBuf)> {
    let mut catalog = ImageCatalog::scan(folder, config)
        .with_context(|| format!("failed to open image folder {}", folder.display()))?;
    let revision = store::revision_path(folder, Local::now().naive_local())?;
    if revision.exists() {
        let saved = store::load_revision(&revision, folder)?;
        let applied = catalog.merge_saved(saved);
        tracing::info!(applied, path = %revision.display(), "restored labels");
    }
    Ok((catalog, revision))
}

fn analyze_log(path: &Path, folder: &Path, config: &AnalyticsConfig) -> anyhow::Result<LogInput> {
    let analyzer = LogAnalyzer::new(config)?;
    let text = log_analysis::read_log(path)?;
    let known = analyzer
        .scan_known_trigger_ids(folder)
        .context("failed to collect trigger IDs from image names")?;
    Ok(LogInput {
        path: path.to_path_buf(),
        analysis: analyzer.parse(&text, &known),
        date_range: analyzer.extract_date_range(&text),
    })
}

/// Explicit total, else the effective log count, else the filename ID span.
fn resolve_total(explicit: Option<u64>, log: Option<&LogAnalysis>, catalog: &ImageCatalog) -> u64 {
    if let Some(total) = explicit {
        return total;
    }
    if let Some(effective) = log.map(|analysis| analysis.effective_session_count).filter(|count| *count > 0) {
        return effective as u64;
    }
    catalog.detect_total_sessions().unwrap_or(0)
}

fn build_figures(catalog: &ImageCatalog, total: u64, log: Option<&LogInput>) -> ReportFigures {
    let figures = ReportFigures::build(&catalog.sessions(), total);
    match log {
        Some(log) => figures.with_log(&log.analysis, log.date_range.clone()),
        None => figures,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "readrate=info"
    } else {
        "readrate=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AnalyticsConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Status {
            folder,
            total,
            log,
            json,
        } => {
            let (catalog, _) = open_catalog(&folder, &config)?;
            let log = log
                .map(|path| analyze_log(&path, &folder, &config))
                .transpose()?;
            let total = resolve_total(total, log.as_ref().map(|log| &log.analysis), &catalog);
            let figures = build_figures(&catalog, total, log.as_ref());

            if json {
                println!("{}", serde_json::to_string_pretty(&figures)?);
            } else {
                print!("{}", report::render_dashboard(&catalog.image_counts(), &figures));
            }
        }
        Commands::List { folder, filter } => {
            let (catalog, _) = open_catalog(&folder, &config)?;
            let records = catalog.filter(filter.into());
            if records.is_empty() {
                println!("No matching images.");
                return Ok(());
            }
            for record in records {
                let mut flags = Vec::new();
                if record.ocr_readable {
                    flags.push("OCR");
                }
                if record.false_no_read {
                    flags.push("False NoRead");
                }
                println!(
                    "{}\t{}\t{}\t{}",
                    record.identifier,
                    record.classification,
                    flags.join(","),
                    record.comment
                );
            }
        }
        Commands::Label {
            folder,
            image,
            label,
            ocr,
            false_no_read,
            comment,
        } => {
            let (mut catalog, revision) = open_catalog(&folder, &config)?;
            if let Some(label) = label {
                catalog.set_classification(&image, label.into())?;
            }
            if let Some(value) = ocr {
                catalog.set_ocr_readable(&image, value)?;
            }
            if let Some(value) = false_no_read {
                catalog.set_false_no_read(&image, value)?;
            }
            if let Some(comment) = comment {
                catalog.set_comment(&image, &comment)?;
            }
            store::save_revision(&revision, &catalog)?;

            if let Some(record) = catalog.get(&image) {
                println!(
                    "{} is now '{}' (OCR: {}, False NoRead: {}).",
                    record.identifier, record.classification, record.ocr_readable, record.false_no_read
                );
            }
            println!("Saved {}.", revision.display());
        }
        Commands::AnalyzeLog { folder, log, json } => {
            let (catalog, _) = open_catalog(&folder, &config)?;
            let log = analyze_log(&log, &folder, &config)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&log.analysis)?);
            } else {
                let total = resolve_total(None, Some(&log.analysis), &catalog);
                let figures = build_figures(&catalog, total, Some(&log));
                if let Some(figures) = &figures.log {
                    for line in report::log_lines(figures) {
                        println!("{line}");
                    }
                    println!("Gross read performance (log): {:.1}%", figures.gross_rate);
                }
                println!("Expected total sessions: {total}");
            }

            let stamp = store::timestamp(Local::now().naive_local());
            let issues_path = folder.join(format!("FIS_Analytics_Report_{stamp}.csv"));
            store::save_issues(&issues_path, &log_analysis::issues(&log.analysis))?;
            println!("Issues written to {}.", issues_path.display());
        }
        Commands::Report {
            folder,
            log,
            total,
            out,
        } => {
            let (catalog, _) = open_catalog(&folder, &config)?;
            let log = log
                .map(|path| analyze_log(&path, &folder, &config))
                .transpose()?;
            let total = resolve_total(total, log.as_ref().map(|log| &log.analysis), &catalog);
            let figures = build_figures(&catalog, total, log.as_ref());

            let now = Local::now().naive_local();
            let stamp = store::timestamp(now);
            let out = out.unwrap_or_else(|| folder.clone());
            std::fs::create_dir_all(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;

            let text = report::render_export(
                &figures,
                &folder,
                log.as_ref().map(|log| log.path.as_path()),
                now,
            );
            let report_path = out.join(format!("FIS_Analytics_Report_{stamp}.txt"));
            store::save_report(&report_path, &text)?;
            println!("Report written to {}.", report_path.display());

            let stats_path = out.join(format!("stats_{stamp}.csv"));
            let rows = report::stats_rows(&catalog.image_counts(), &figures, &folder, now);
            store::save_stats(&stats_path, &rows)?;
            println!("Stats written to {}.", stats_path.display());

            if let Some(log) = &log {
                let issues_path = out.join(format!("FIS_Analytics_Report_{stamp}.csv"));
                store::save_issues(&issues_path, &log_analysis::issues(&log.analysis))?;
                println!("Issues written to {}.", issues_path.display());
            }
        }
        Commands::Sessions { folder } => {
            let (catalog, _) = open_catalog(&folder, &config)?;
            let stamp = store::timestamp(Local::now().naive_local());
            let exports = store::export_sessions(&folder, &catalog.sessions(), &stamp)?;
            for export in &exports {
                println!(
                    "- {}: {} sessions -> {}",
                    export.class,
                    export.sessions,
                    export.path.display()
                );
            }
            println!("Summary written to sessions_summary_{stamp}.csv.");
        }
        Commands::Diagnose { folder, session } => {
            let (catalog, _) = open_catalog(&folder, &config)?;
            match report::diagnose(&catalog, &session) {
                Some(text) => print!("{text}"),
                None => anyhow::bail!("no session {session} in {}", folder.display()),
            }
        }
        Commands::AutoClassify { folder, watch } => {
            let (mut catalog, revision) = open_catalog(&folder, &config)?;
            let detector = Arc::new(detect::StripeDetector::new(&config.detector));

            loop {
                let summary = detect::auto_classify(
                    &mut catalog,
                    Arc::clone(&detector),
                    &revision,
                    |progress| {
                        println!(
                            "[{}/{}] {} -> {} ({} codes)",
                            progress.processed,
                            progress.total,
                            progress.identifier,
                            progress.label,
                            progress.barcodes
                        );
                    },
                )
                .await?;
                if summary.processed > 0 {
                    println!(
                        "Labelled {} images: {} no label, {} read failure.",
                        summary.processed, summary.no_label, summary.read_failure
                    );
                }
                if summary.save_failures > 0 {
                    eprintln!(
                        "{} saves to {} failed; labels from this run may be lost.",
                        summary.save_failures,
                        revision.display()
                    );
                }

                let Some(seconds) = watch else {
                    break;
                };
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                let added = catalog.refresh(&config)?;
                if !added.is_empty() {
                    tracing::info!(count = added.len(), "new images in folder");
                }
            }
        }
    }

    Ok(())
}

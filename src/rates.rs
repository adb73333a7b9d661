//! Read-rate formulas.
//!
//! Every percentage the tool displays or exports is computed here. The
//! dashboard, the exported report and the stats CSV all take their numbers
//! from [`compute_rates`] and the gross-rate helpers below.

use serde::Serialize;

use crate::models::{RateResult, SessionCounts};

/// Inputs of the net-rate calculation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateInputs {
    pub total_entered: u64,
    pub actual_sessions: u64,
    pub sessions_read_failure: u64,
    pub sessions_false_no_read: u64,
    pub sessions_ocr_readable: u64,
    pub sessions_ocr_readable_non_failure: u64,
}

impl RateInputs {
    pub fn from_counts(total_entered: u64, counts: &SessionCounts) -> Self {
        Self {
            total_entered,
            actual_sessions: counts.actual_sessions as u64,
            sessions_read_failure: counts.read_failure as u64,
            sessions_false_no_read: counts.false_no_read as u64,
            sessions_ocr_readable: counts.ocr_readable as u64,
            sessions_ocr_readable_non_failure: counts.ocr_readable_non_failure as u64,
        }
    }
}

pub fn compute_rates(inputs: &RateInputs) -> RateResult {
    let total_entered = inputs.total_entered as i64;
    let actual_sessions = inputs.actual_sessions as i64;
    let sessions_read_failure = inputs.sessions_read_failure as i64;
    let sessions_false_no_read = inputs.sessions_false_no_read as i64;
    let sessions_ocr_readable = inputs.sessions_ocr_readable as i64;
    let sessions_ocr_readable_non_failure = inputs.sessions_ocr_readable_non_failure as i64;

    let total_readable_excl_ocr = total_entered - actual_sessions + sessions_read_failure;
    let total_readable_incl_ocr = total_readable_excl_ocr + sessions_ocr_readable_non_failure;

    // Clamped at zero but not capped at the denominator.
    let successful_reads_excl_ocr =
        (total_readable_excl_ocr - sessions_read_failure + sessions_false_no_read).max(0);
    let successful_reads_incl_ocr = successful_reads_excl_ocr + sessions_ocr_readable;

    let ocr_improvement_percentage = if successful_reads_excl_ocr > 0 {
        (successful_reads_incl_ocr - successful_reads_excl_ocr) as f64
            / successful_reads_excl_ocr as f64
            * 100.0
    } else {
        0.0
    };

    RateResult {
        total_readable_excl_ocr,
        total_readable_incl_ocr,
        successful_reads_excl_ocr,
        successful_reads_incl_ocr,
        net_rate_excl_ocr: ratio_percent(successful_reads_excl_ocr, total_readable_excl_ocr),
        net_rate_incl_ocr: ratio_percent(successful_reads_incl_ocr, total_readable_incl_ocr),
        ocr_improvement_percentage,
    }
}

/// Log-derived gross rate: unique IDs that were not genuine no-reads.
pub fn log_gross_rate(unique_ids: usize, total_noread: usize) -> f64 {
    if unique_ids == 0 {
        return 0.0;
    }
    ratio_percent(unique_ids as i64 - total_noread as i64, unique_ids as i64)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CaptureGross {
    pub read: i64,
    pub total: u64,
    pub rate: f64,
}

/// Gross rate against the expected total: sessions that never produced a
/// classified image count as reads. `None` while no total is known.
pub fn capture_gross_rate(total_entered: u64, actual_sessions: usize) -> Option<CaptureGross> {
    if total_entered == 0 {
        return None;
    }
    let read = total_entered as i64 - actual_sessions as i64;
    Some(CaptureGross {
        read,
        total: total_entered,
        rate: ratio_percent(read, total_entered as i64),
    })
}

/// `part / whole * 100`, or 0.0 when `whole` is empty.
pub fn percentage(part: usize, whole: usize) -> f64 {
    ratio_percent(part as i64, whole as i64)
}

fn ratio_percent(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64 * 100.0
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::models::{Classification, ImageRecord, SessionClass, SessionCounts, SessionView};

/// Session key of an image: `<first segment>_<last segment>` of the file stem.
pub fn session_key(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let segments: Vec<&str> = stem.split('_').collect();
    match segments.as_slice() {
        [] => stem.clone(),
        [only] => only.to_string(),
        [first, .., last] => format!("{first}_{last}"),
    }
}

/// Session resolution rules, highest priority first. The first rule whose
/// label is present decides the session. Incomplete resolves to Unreadable.
pub const RULES: [(Classification, SessionClass); 4] = [
    (Classification::ReadFailure, SessionClass::ReadFailure),
    (Classification::Unreadable, SessionClass::Unreadable),
    (Classification::Incomplete, SessionClass::Unreadable),
    (Classification::NoLabel, SessionClass::NoLabel),
];

/// The rule that decides a session with these member labels, if any does.
pub fn deciding_rule(labels: &BTreeSet<Classification>) -> Option<(Classification, SessionClass)> {
    RULES.iter().copied().find(|(label, _)| labels.contains(label))
}

pub fn resolve(labels: &BTreeSet<Classification>) -> SessionClass {
    deciding_rule(labels)
        .map(|(_, class)| class)
        .unwrap_or(SessionClass::Unlabeled)
}

impl SessionView {
    pub fn is_classified(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn resolved(&self) -> SessionClass {
        resolve(&self.labels)
    }
}

pub fn aggregate<'a, I>(records: I) -> BTreeMap<String, SessionView>
where
    I: IntoIterator<Item = &'a ImageRecord>,
{
    let mut sessions: BTreeMap<String, SessionView> = BTreeMap::new();

    for record in records {
        let key = session_key(&record.identifier);
        let entry = sessions.entry(key.clone()).or_insert_with(|| SessionView {
            key,
            ..SessionView::default()
        });

        entry.members.push(record.identifier.clone());
        if record.classification.is_classified() {
            entry.labels.insert(record.classification);
        }
        entry.ocr_readable |= record.ocr_readable;
        entry.false_no_read |= record.false_no_read;
    }

    sessions
}

/// Resolved class of every session that has at least one classified member.
pub fn classification_map(sessions: &BTreeMap<String, SessionView>) -> BTreeMap<&str, SessionClass> {
    sessions
        .values()
        .filter(|session| session.is_classified())
        .map(|session| (session.key.as_str(), session.resolved()))
        .collect()
}

impl SessionCounts {
    /// OCR-recovered sessions that resolved to a failure bucket.
    pub fn ocr_recovered_failures(&self) -> usize {
        self.ocr_in_read_failure + self.ocr_in_unreadable
    }
}

pub fn count_sessions(sessions: &BTreeMap<String, SessionView>) -> SessionCounts {
    let classes = classification_map(sessions);
    let mut counts = SessionCounts {
        total_sessions: sessions.len(),
        actual_sessions: classes.len(),
        ..SessionCounts::default()
    };

    for class in classes.values() {
        match class {
            SessionClass::NoLabel => counts.no_label += 1,
            SessionClass::ReadFailure => counts.read_failure += 1,
            SessionClass::Unreadable => counts.unreadable += 1,
            SessionClass::Unlabeled => {}
        }
    }

    for session in sessions.values() {
        let class = classes.get(session.key.as_str()).copied();
        if session.false_no_read {
            counts.false_no_read += 1;
        }
        if !session.ocr_readable {
            continue;
        }
        counts.ocr_readable += 1;
        match class {
            Some(SessionClass::ReadFailure) => counts.ocr_in_read_failure += 1,
            Some(SessionClass::Unreadable) => {
                counts.ocr_in_unreadable += 1;
                counts.ocr_readable_non_failure += 1;
            }
            _ => counts.ocr_readable_non_failure += 1,
        }
    }

    counts.unreadable_code = counts
        .actual_sessions
        .saturating_sub(counts.no_label)
        .saturating_sub(counts.read_failure);
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, class: Classification) -> ImageRecord {
        ImageRecord::new(name).with_classification(class)
    }

    fn set(labels: &[Classification]) -> BTreeSet<Classification> {
        labels.iter().copied().collect()
    }

    #[test]
    fn key_uses_first_and_last_segment() {
        assert_eq!(
            session_key("0000000042_0001_000_20250101120000.jpg"),
            "0000000042_20250101120000"
        );
        assert_eq!(
            session_key("0000000042_0002_001_20250101120000.jpg"),
            session_key("0000000042_0001_000_20250101120000.png")
        );
        assert_eq!(session_key("single.jpg"), "single");
        assert_eq!(session_key("a.b_c.jpg"), "a.b_c");
        assert_eq!(session_key(""), "");
    }

    #[test]
    fn key_ignores_directories() {
        assert_eq!(session_key("scans/001_x_T1.jpg"), "001_T1");
    }

    #[test]
    fn each_rule_applies_on_its_own() {
        for (label, class) in RULES {
            assert_eq!(resolve(&set(&[label])), class);
        }
        assert_eq!(resolve(&set(&[])), SessionClass::Unlabeled);
        assert_eq!(
            resolve(&set(&[Classification::Unclassified])),
            SessionClass::Unlabeled
        );
    }

    #[test]
    fn read_failure_dominates_every_combination() {
        let others = [
            Classification::NoLabel,
            Classification::Incomplete,
            Classification::Unreadable,
        ];
        for mask in 0..(1 << others.len()) {
            let mut labels = set(&[Classification::ReadFailure]);
            for (bit, label) in others.iter().enumerate() {
                if mask & (1 << bit) != 0 {
                    labels.insert(*label);
                }
            }
            assert_eq!(resolve(&labels), SessionClass::ReadFailure);
        }
    }

    #[test]
    fn non_empty_classified_sets_resolve_to_three_buckets() {
        let pool = [
            Classification::NoLabel,
            Classification::ReadFailure,
            Classification::Incomplete,
            Classification::Unreadable,
        ];
        for mask in 1..(1 << pool.len()) {
            let labels: BTreeSet<_> = pool
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, label)| *label)
                .collect();
            let class = resolve(&labels);
            assert!(matches!(
                class,
                SessionClass::ReadFailure | SessionClass::Unreadable | SessionClass::NoLabel
            ));
        }
    }

    #[test]
    fn incomplete_folds_into_unreadable() {
        assert_eq!(
            resolve(&set(&[Classification::Incomplete, Classification::NoLabel])),
            SessionClass::Unreadable
        );
    }

    #[test]
    fn unclassified_sessions_do_not_count_as_actual() {
        let records = vec![
            record("001_a_T1.jpg", Classification::NoLabel),
            record("001_b_T1.jpg", Classification::Unclassified),
            record("002_a_T2.jpg", Classification::Unclassified),
        ];
        let sessions = aggregate(&records);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions["001_T1"].members.len(), 2);

        let counts = count_sessions(&sessions);
        assert_eq!(counts.total_sessions, 2);
        assert_eq!(counts.actual_sessions, 1);
        assert_eq!(counts.no_label, 1);
    }

    #[test]
    fn flags_or_reduce_across_all_members() {
        let mut ocr = record("003_a_T3.jpg", Classification::Unclassified);
        ocr.set_ocr_readable(true);
        let mut fnr = record("004_a_T4.jpg", Classification::ReadFailure);
        assert!(fnr.set_false_no_read(true));
        let records = vec![
            ocr,
            record("003_b_T3.jpg", Classification::Unclassified),
            fnr,
            record("004_b_T4.jpg", Classification::ReadFailure),
        ];
        let sessions = aggregate(&records);
        assert!(sessions["003_T3"].ocr_readable);
        assert!(!sessions["003_T3"].is_classified());
        assert!(sessions["004_T4"].false_no_read);

        let counts = count_sessions(&sessions);
        assert_eq!(counts.ocr_readable, 1);
        assert_eq!(counts.ocr_readable_non_failure, 1);
        assert_eq!(counts.false_no_read, 1);
    }

    #[test]
    fn integrity_identity_holds_without_a_fourth_bucket() {
        let records = vec![
            record("001_a_T1.jpg", Classification::NoLabel),
            record("002_a_T2.jpg", Classification::ReadFailure),
            record("002_b_T2.jpg", Classification::Incomplete),
            record("003_a_T3.jpg", Classification::Incomplete),
            record("004_a_T4.jpg", Classification::Unreadable),
            record("004_b_T4.jpg", Classification::NoLabel),
            record("005_a_T5.jpg", Classification::Incomplete),
            record("005_b_T5.jpg", Classification::NoLabel),
        ];
        let counts = count_sessions(&aggregate(&records));
        assert_eq!(counts.actual_sessions, 5);
        assert_eq!(counts.no_label, 1);
        assert_eq!(counts.read_failure, 1);
        assert_eq!(counts.unreadable, 3);
        assert_eq!(counts.unreadable_code, counts.unreadable);
        assert_eq!(
            counts.no_label + counts.read_failure + counts.unreadable_code,
            counts.actual_sessions
        );
    }

    #[test]
    fn ocr_breakdown_follows_resolved_class() {
        let mut rf = record("001_a_T1.jpg", Classification::ReadFailure);
        rf.set_ocr_readable(true);
        let mut ur = record("002_a_T2.jpg", Classification::Incomplete);
        ur.set_ocr_readable(true);
        let mut nl = record("003_a_T3.jpg", Classification::NoLabel);
        nl.set_ocr_readable(true);

        let counts = count_sessions(&aggregate(&vec![rf, ur, nl]));
        assert_eq!(counts.ocr_readable, 3);
        assert_eq!(counts.ocr_in_read_failure, 1);
        assert_eq!(counts.ocr_in_unreadable, 1);
        assert_eq!(counts.ocr_readable_non_failure, 2);
        assert_eq!(counts.ocr_recovered_failures(), 2);
    }

    #[test]
    fn aggregation_is_order_independent() {
        let records = vec![
            record("001_a_T1.jpg", Classification::NoLabel),
            record("001_b_T1.jpg", Classification::ReadFailure),
            record("002_a_T2.jpg", Classification::Unreadable),
        ];
        let mut reversed = records.clone();
        reversed.reverse();
        assert_eq!(
            count_sessions(&aggregate(&records)),
            count_sessions(&aggregate(&reversed))
        );
    }
}

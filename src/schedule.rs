use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Wall-clock time of day as minutes since midnight. Timetables carry
/// "HH:MM" strings on the wire; all comparisons happen in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Minutes(pub u16);

impl Minutes {
    pub fn parse(s: &str) -> Option<Minutes> {
        let (h, m) = s.trim().split_once(':')?;
        let h: u16 = h.parse().ok()?;
        let m: u16 = m.parse().ok()?;
        if h > 23 || m > 59 {
            return None;
        }
        Some(Minutes(h * 60 + m))
    }

    pub fn hhmm(self) -> String {
        format!("{:02}:{:02}", self.0 / 60, self.0 % 60)
    }

    pub fn saturating_sub(self, mins: u16) -> Minutes {
        Minutes(self.0.saturating_sub(mins))
    }

    pub fn saturating_add(self, mins: u16) -> Minutes {
        Minutes(self.0.saturating_add(mins))
    }
}

impl fmt::Display for Minutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hhmm())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Department {
    CS,
    IS,
}

impl Department {
    pub fn parse(s: &str) -> Option<Department> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CS" => Some(Department::CS),
            "IS" => Some(Department::IS),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Department::CS => "CS",
            Department::IS => "IS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    A,
    B,
}

impl Section {
    pub fn parse(s: &str) -> Option<Section> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Some(Section::A),
            "B" => Some(Section::B),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Section::A => "A",
            Section::B => "B",
        }
    }
}

/// Identifies one class-section-semester combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassKey {
    pub semester: u8,
    pub department: Department,
    pub section: Section,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub subject: String,
    pub start: Minutes,
    pub end: Minutes,
}

/// One violation found while checking a proposed period list. Indices refer
/// to positions in the submitted list so the caller can highlight exact rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    InvalidRange { index: usize },
    Overlap { first: usize, second: usize },
    MissingSubject { index: usize },
}

impl Violation {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Violation::InvalidRange { index } => serde_json::json!({
                "kind": "invalid_range",
                "index": index,
            }),
            Violation::Overlap { first, second } => serde_json::json!({
                "kind": "overlap",
                "first": first,
                "second": second,
            }),
            Violation::MissingSubject { index } => serde_json::json!({
                "kind": "missing_subject",
                "index": index,
            }),
        }
    }
}

/// Checks a proposed period list for range validity, subject presence and
/// pairwise overlap. Runs every check to completion and reports all
/// violations found, not just the first, so a caller can surface every
/// offending row in one round-trip.
pub fn validate_periods(entries: &[Period]) -> Result<(), Vec<Violation>> {
    let mut violations = Vec::new();

    for (i, e) in entries.iter().enumerate() {
        if e.start >= e.end {
            violations.push(Violation::InvalidRange { index: i });
        }
        if e.subject.trim().is_empty() {
            violations.push(Violation::MissingSubject { index: i });
        }
    }

    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            let (a, b) = (&entries[i], &entries[j]);
            // Half-open interval intersection on [start, end).
            if a.start < b.end && b.start < a.end {
                violations.push(Violation::Overlap { first: i, second: j });
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Which schedule applies on a given date. A tagged variant so resolution
/// and lock checks are exhaustive and cannot silently take the wrong branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Default(Vec<Period>),
    DateSpecific { entries: Vec<Period>, locked: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchedule {
    pub schedule: Schedule,
    pub day_of_week: Weekday,
}

impl ResolvedSchedule {
    pub fn entries(&self) -> &[Period] {
        match &self.schedule {
            Schedule::Default(entries) => entries,
            Schedule::DateSpecific { entries, .. } => entries,
        }
    }

    pub fn locked(&self) -> bool {
        match &self.schedule {
            Schedule::Default(_) => false,
            Schedule::DateSpecific { locked, .. } => *locked,
        }
    }

    pub fn source(&self) -> &'static str {
        match &self.schedule {
            Schedule::Default(_) => "default",
            Schedule::DateSpecific { .. } => "date-specific",
        }
    }
}

/// Full weekday name as shown to callers ("Monday", not "Mon").
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

pub fn parse_weekday(s: &str) -> Option<Weekday> {
    match s.trim().to_ascii_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Resolves the effective schedule for one date: a stored override wins
/// verbatim, otherwise the weekly template entries for that weekday apply.
/// Pure; the caller fetches both candidates from the store first.
pub fn resolve(
    day_of_week: Weekday,
    template_entries: Vec<Period>,
    date_override: Option<(Vec<Period>, bool)>,
) -> ResolvedSchedule {
    let schedule = match date_override {
        Some((entries, locked)) => Schedule::DateSpecific { entries, locked },
        None => Schedule::Default(template_entries),
    };
    ResolvedSchedule {
        schedule,
        day_of_week,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("schedule override is locked")]
    Locked,
    #[error("timetable failed validation")]
    Invalid(Vec<Violation>),
}

/// Gate for `applyOverride`: a locked stored override rejects any further
/// writes, and candidate entries must pass the full validator. No store
/// mutation happens on the error path.
pub fn check_override(existing_locked: Option<bool>, entries: &[Period]) -> Result<(), ScheduleError> {
    if existing_locked == Some(true) {
        return Err(ScheduleError::Locked);
    }
    validate_periods(entries).map_err(ScheduleError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(subject: &str, start: &str, end: &str) -> Period {
        Period {
            subject: subject.to_string(),
            start: Minutes::parse(start).expect("start"),
            end: Minutes::parse(end).expect("end"),
        }
    }

    #[test]
    fn minutes_parse_and_format() {
        assert_eq!(Minutes::parse("09:05"), Some(Minutes(545)));
        assert_eq!(Minutes::parse("00:00"), Some(Minutes(0)));
        assert_eq!(Minutes::parse("23:59"), Some(Minutes(1439)));
        assert_eq!(Minutes::parse("24:00"), None);
        assert_eq!(Minutes::parse("09:60"), None);
        assert_eq!(Minutes::parse("0905"), None);
        assert_eq!(Minutes(545).hhmm(), "09:05");
    }

    #[test]
    fn validate_accepts_clean_day() {
        let entries = vec![
            p("Data Structures", "09:00", "09:55"),
            p("Operating Systems", "10:00", "10:55"),
        ];
        assert_eq!(validate_periods(&entries), Ok(()));
    }

    #[test]
    fn validate_reports_every_violation_at_once() {
        let entries = vec![
            p("Data Structures", "10:00", "09:00"),
            p("  ", "09:30", "10:30"),
            p("Networks", "10:00", "11:00"),
        ];
        let violations = validate_periods(&entries).unwrap_err();
        assert!(violations.contains(&Violation::InvalidRange { index: 0 }));
        assert!(violations.contains(&Violation::MissingSubject { index: 1 }));
        assert!(violations.contains(&Violation::Overlap { first: 1, second: 2 }));
    }

    #[test]
    fn touching_periods_do_not_overlap() {
        let entries = vec![
            p("Data Structures", "09:00", "10:00"),
            p("Networks", "10:00", "11:00"),
        ];
        assert_eq!(validate_periods(&entries), Ok(()));
    }

    #[test]
    fn resolve_prefers_override_verbatim() {
        let template = vec![p("Data Structures", "09:00", "09:55")];
        let override_entries = vec![p("Seminar", "11:00", "12:00")];
        let resolved = resolve(
            Weekday::Mon,
            template.clone(),
            Some((override_entries.clone(), false)),
        );
        assert_eq!(resolved.entries(), override_entries.as_slice());
        assert_eq!(resolved.source(), "date-specific");
        assert!(!resolved.locked());

        let resolved = resolve(Weekday::Mon, template.clone(), None);
        assert_eq!(resolved.entries(), template.as_slice());
        assert_eq!(resolved.source(), "default");
        assert!(!resolved.locked());
    }

    #[test]
    fn check_override_rejects_locked() {
        let entries = vec![p("Seminar", "11:00", "12:00")];
        assert_eq!(check_override(Some(true), &entries), Err(ScheduleError::Locked));
        assert_eq!(check_override(Some(false), &entries), Ok(()));
        assert_eq!(check_override(None, &entries), Ok(()));
    }

    proptest! {
        // Overlap reporting matches interval intersection exactly, in both
        // directions, over arbitrary pairs of valid ranges.
        #[test]
        fn overlap_detection_is_complete(
            s1 in 0u16..1380, len1 in 1u16..120,
            s2 in 0u16..1380, len2 in 1u16..120,
        ) {
            let a = Period {
                subject: "A".to_string(),
                start: Minutes(s1),
                end: Minutes(s1 + len1),
            };
            let b = Period {
                subject: "B".to_string(),
                start: Minutes(s2),
                end: Minutes(s2 + len2),
            };
            let intersects = s1 < s2 + len2 && s2 < s1 + len1;

            let forward = validate_periods(&[a.clone(), b.clone()]);
            let backward = validate_periods(&[b, a]);
            prop_assert_eq!(forward.is_err(), intersects);
            prop_assert_eq!(backward.is_err(), intersects);
            if let Err(violations) = forward {
                prop_assert_eq!(
                    violations,
                    vec![Violation::Overlap { first: 0, second: 1 }]
                );
            }
        }
    }
}

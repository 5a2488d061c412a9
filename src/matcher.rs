use crate::schedule::{Minutes, Period};

/// Margin around a period's start and end inside which a captured event
/// still counts for that period.
pub const TOLERANCE_MINUTES: u16 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Present,
    Absent,
    Excused,
}

impl Status {
    pub fn parse(s: &str) -> Option<Status> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Status::Present),
            "absent" => Some(Status::Absent),
            "excused" => Some(Status::Excused),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Present => "present",
            Status::Absent => "absent",
            Status::Excused => "excused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkedBy {
    System,
    Manual,
}

impl MarkedBy {
    pub fn parse(s: &str) -> Option<MarkedBy> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Some(MarkedBy::System),
            "manual" => Some(MarkedBy::Manual),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MarkedBy::System => "system",
            MarkedBy::Manual => "manual",
        }
    }
}

/// One raw attendance capture for a student: which subject the session was
/// for, when it ran, and what it recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEvent {
    pub subject: String,
    pub timestamp: Minutes,
    pub status: Status,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodOutcome<'a> {
    pub period: &'a Period,
    pub event: Option<&'a AttendanceEvent>,
}

/// Matches captured events against a resolved period list. An event counts
/// for a period when its subject matches and its timestamp falls within
/// `[start - 15min, end + 15min]`, both bounds inclusive. When several
/// events qualify, the first in input order wins. Periods with no match are
/// a normal outcome ("not yet taken"); this never fails.
pub fn reconcile<'a>(
    periods: &'a [Period],
    events: &'a [AttendanceEvent],
) -> Vec<PeriodOutcome<'a>> {
    periods
        .iter()
        .map(|period| {
            let window_start = period.start.saturating_sub(TOLERANCE_MINUTES);
            let window_end = period.end.saturating_add(TOLERANCE_MINUTES);
            let event = events.iter().find(|e| {
                e.subject == period.subject
                    && e.timestamp >= window_start
                    && e.timestamp <= window_end
            });
            PeriodOutcome { period, event }
        })
        .collect()
}

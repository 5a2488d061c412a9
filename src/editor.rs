use crate::matcher::Status;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// One attendance record as the edit surface sees it: the fields a teacher
/// correction may touch, keyed by student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub student_id: String,
    pub status: Status,
    pub reason_type: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("attendance for {date} can no longer be edited")]
    ImmutableSession { date: NaiveDate },
    #[error("no changes to save")]
    NoChanges,
    #[error("session is not in edit mode")]
    NotEditing,
    #[error("student {0} has no record in this session")]
    UnknownStudent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Viewing,
    Editing,
}

/// Per-session edit state machine: Viewing -> Editing -> (save | cancel) ->
/// Viewing. Holds the original snapshot, a working copy, and the set of
/// students actually touched, so a save submits only the minimal diff.
#[derive(Debug)]
pub struct EditReconciler {
    original: BTreeMap<String, RecordDraft>,
    working: BTreeMap<String, RecordDraft>,
    changed: BTreeSet<String>,
    phase: Phase,
}

impl EditReconciler {
    /// Starts an edit over the session's current records. Sessions from any
    /// day other than `today` are immutable through this path.
    pub fn begin(
        session_date: NaiveDate,
        today: NaiveDate,
        records: Vec<RecordDraft>,
    ) -> Result<EditReconciler, EditError> {
        if session_date != today {
            return Err(EditError::ImmutableSession { date: session_date });
        }
        let original: BTreeMap<String, RecordDraft> = records
            .into_iter()
            .map(|r| (r.student_id.clone(), r))
            .collect();
        Ok(EditReconciler {
            working: original.clone(),
            original,
            changed: BTreeSet::new(),
            phase: Phase::Editing,
        })
    }

    pub fn is_editing(&self) -> bool {
        self.phase == Phase::Editing
    }

    /// Updates the working copy for one student and remembers the student as
    /// changed. Re-setting the same student is idempotent on the change set.
    pub fn set_status(
        &mut self,
        student_id: &str,
        status: Status,
        reason_type: Option<String>,
    ) -> Result<(), EditError> {
        if self.phase != Phase::Editing {
            return Err(EditError::NotEditing);
        }
        let record = self
            .working
            .get_mut(student_id)
            .ok_or_else(|| EditError::UnknownStudent(student_id.to_string()))?;
        record.status = status;
        record.reason_type = reason_type;
        self.changed.insert(student_id.to_string());
        Ok(())
    }

    /// Discards the working copy and returns to Viewing. No I/O.
    pub fn cancel(&mut self) {
        self.working = self.original.clone();
        self.changed.clear();
        self.phase = Phase::Viewing;
    }

    /// The records to submit: exactly the touched students, in student-id
    /// order. Fails when nothing was changed so callers skip the round-trip.
    pub fn diff(&self) -> Result<Vec<RecordDraft>, EditError> {
        if self.phase != Phase::Editing {
            return Err(EditError::NotEditing);
        }
        if self.changed.is_empty() {
            return Err(EditError::NoChanges);
        }
        Ok(self
            .changed
            .iter()
            .filter_map(|id| self.working.get(id).cloned())
            .collect())
    }

    /// Called after the caller persisted the diff successfully. A failed
    /// persist simply skips this, leaving the machine in Editing with the
    /// working copy intact for a retry.
    pub fn commit(&mut self) {
        self.original = self.working.clone();
        self.changed.clear();
        self.phase = Phase::Viewing;
    }

    pub fn records(&self) -> impl Iterator<Item = &RecordDraft> {
        self.working.values()
    }
}

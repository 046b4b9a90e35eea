use chrono::NaiveDate;

use crate::models::{SessionRecord, SessionStatus};

/// Attendance rate assumed when no session was completed or canceled yet.
pub const NEUTRAL_ATTENDANCE_RATE: f64 = 1.0;

/// Recency gap reported for a patient without any session.
pub const NO_HISTORY_GAP_DAYS: i64 = i64::MAX;

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    pub total: usize,
    pub completed: usize,
    pub canceled: usize,
    pub scheduled: usize,
    pub attendance_rate: f64,
    pub recency_gap_days: i64,
    pub cancellation_streak: usize,
    pub last_session: Option<NaiveDate>,
}

impl FeatureSet {
    pub fn has_history(&self) -> bool {
        self.total > 0
    }
}

pub fn attendance_rate(completed: usize, canceled: usize) -> Option<f64> {
    let attended = completed + canceled;
    if attended == 0 {
        None
    } else {
        Some(completed as f64 / attended as f64)
    }
}

/// Derives the classifier inputs from a history sorted by date ascending.
///
/// Never fails: an empty history yields the neutral attendance rate and
/// [`NO_HISTORY_GAP_DAYS`].
pub fn extract(sessions: &[SessionRecord], today: NaiveDate) -> FeatureSet {
    let mut completed = 0usize;
    let mut canceled = 0usize;
    let mut scheduled = 0usize;

    for session in sessions {
        match session.status {
            SessionStatus::Concluido => completed += 1,
            SessionStatus::Cancelado => canceled += 1,
            status if status.is_pending() => scheduled += 1,
            _ => {}
        }
    }

    let last_session = sessions.iter().map(|s| s.date).max();
    let recency_gap_days = match last_session {
        Some(date) => (today - date).num_days().max(0),
        None => NO_HISTORY_GAP_DAYS,
    };

    let cancellation_streak = sessions
        .iter()
        .rev()
        .take_while(|s| s.status == SessionStatus::Cancelado)
        .count();

    FeatureSet {
        total: sessions.len(),
        completed,
        canceled,
        scheduled,
        attendance_rate: attendance_rate(completed, canceled).unwrap_or(NEUTRAL_ATTENDANCE_RATE),
        recency_gap_days,
        cancellation_streak,
        last_session,
    }
}

use std::cmp::Ordering;

use chrono::{NaiveDate, Utc};

use crate::config::RiskConfig;
use crate::error::EngineError;
use crate::features::{self, FeatureSet};
use crate::history::HistoryReader;
use crate::models::{PatientRef, RiskAssessment, RiskLevel, SessionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskFactor {
    InsufficientData,
    CancellationStreak,
    Disengagement,
    LowAttendance,
    Stable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub score: f64,
    pub level: RiskLevel,
    pub factor: RiskFactor,
    pub reason: String,
}

pub fn evaluation_date(as_of: Option<NaiveDate>) -> NaiveDate {
    as_of.unwrap_or_else(|| Utc::now().date_naive())
}

pub fn level_for(score: f64, config: &RiskConfig) -> RiskLevel {
    if score < config.low_threshold {
        RiskLevel::Baixo
    } else if score < config.high_threshold {
        RiskLevel::Moderado
    } else {
        RiskLevel::Alto
    }
}

pub fn streak_penalty(streak: usize, config: &RiskConfig) -> f64 {
    (streak as f64 * config.streak_penalty).min(config.streak_penalty_cap)
}

pub fn recency_penalty(gap_days: i64, config: &RiskConfig) -> f64 {
    if gap_days > config.recency_threshold_days {
        config.recency_penalty
    } else {
        0.0
    }
}

/// Maps features to a clamped score, a level and a reason.
///
/// The reason names the dominant factor. Recent behaviour (a qualifying
/// cancellation streak or a disengagement gap) outranks the long-run
/// attendance rate; between the two, the larger penalty wins and a tie goes
/// to the streak.
pub fn classify(features: &FeatureSet, config: &RiskConfig) -> Classification {
    if !features.has_history() {
        return Classification {
            score: 0.0,
            level: level_for(0.0, config),
            factor: RiskFactor::InsufficientData,
            reason: "Histórico de sessões insuficiente para análise".to_string(),
        };
    }

    let attendance = 1.0 - features.attendance_rate;
    let streak = streak_penalty(features.cancellation_streak, config);
    let gap = recency_penalty(features.recency_gap_days, config);
    let score = (attendance + streak + gap).clamp(0.0, 1.0);
    let level = level_for(score, config);

    let streak_counts = features.cancellation_streak >= config.streak_reason_min && streak > 0.0;
    let factor = if streak_counts && streak >= gap {
        RiskFactor::CancellationStreak
    } else if gap > 0.0 {
        RiskFactor::Disengagement
    } else if features.canceled > 0 && level != RiskLevel::Baixo {
        RiskFactor::LowAttendance
    } else {
        RiskFactor::Stable
    };

    let reason = match factor {
        RiskFactor::CancellationStreak => format!(
            "{} cancelamentos consecutivos nas sessões mais recentes",
            features.cancellation_streak
        ),
        RiskFactor::Disengagement => match features.last_session {
            Some(date) => format!(
                "Sem sessões há {} dias (última em {})",
                features.recency_gap_days, date
            ),
            None => format!("Sem sessões há {} dias", features.recency_gap_days),
        },
        RiskFactor::LowAttendance => format!(
            "Taxa de comparecimento de {:.1}%",
            features.attendance_rate * 100.0
        ),
        RiskFactor::Stable | RiskFactor::InsufficientData => {
            "Frequência regular nas sessões".to_string()
        }
    };

    Classification {
        score,
        level,
        factor,
        reason,
    }
}

pub fn assess(
    patient: &PatientRef,
    sessions: &[SessionRecord],
    today: NaiveDate,
    config: &RiskConfig,
) -> RiskAssessment {
    let features = features::extract(sessions, today);
    let classification = classify(&features, config);
    tracing::debug!(
        patient_id = patient.patient_id,
        score = classification.score,
        level = %classification.level,
        factor = ?classification.factor,
        "classified patient"
    );

    RiskAssessment {
        patient_id: patient.patient_id,
        patient_name: patient.patient_name.clone(),
        risk: classification.level,
        score: classification.score,
        reason: classification.reason,
    }
}

/// Descending score, then patient name, then id.
pub fn by_risk(a: &RiskAssessment, b: &RiskAssessment) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.patient_name.cmp(&b.patient_name))
        .then_with(|| a.patient_id.cmp(&b.patient_id))
}

/// Single-patient risk analysis for the authenticated psychologist.
pub async fn assess_patient<R: HistoryReader>(
    reader: &R,
    psychologist_id: i64,
    patient_id: i64,
    today: NaiveDate,
    config: &RiskConfig,
) -> Result<RiskAssessment, EngineError> {
    let patient = reader.fetch_patient(patient_id).await?;
    if patient.psychologist_id != Some(psychologist_id) {
        tracing::warn!(psychologist_id, patient_id, "rejected out-of-scope risk request");
        return Err(EngineError::InvalidScope {
            psychologist_id,
            patient_id: Some(patient_id),
        });
    }

    let sessions = reader.fetch_sessions_by_patient(patient_id).await?;
    let patient = PatientRef {
        patient_id: patient.patient_id,
        patient_name: patient.patient_name,
    };
    Ok(assess(&patient, &sessions, today, config))
}

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Agendado,
    Concluido,
    Cancelado,
    Reagendado,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agendado => "agendado",
            Self::Concluido => "concluido",
            Self::Cancelado => "cancelado",
            Self::Reagendado => "reagendado",
        }
    }

    /// Rescheduled sessions are still pending, so they count as scheduled.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Agendado | Self::Reagendado)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "agendado" => Ok(Self::Agendado),
            "concluido" => Ok(Self::Concluido),
            "cancelado" => Ok(Self::Cancelado),
            "reagendado" => Ok(Self::Reagendado),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub patient_id: i64,
    pub psychologist_id: i64,
    pub date: NaiveDate,
    pub status: SessionStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRef {
    pub patient_id: i64,
    pub patient_name: String,
}

/// A patient row as seen by scope checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientRecord {
    pub patient_id: i64,
    pub patient_name: String,
    pub psychologist_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Baixo,
    Moderado,
    Alto,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baixo => "baixo",
            Self::Moderado => "moderado",
            Self::Alto => "alto",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-patient classification as exposed to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub patient_id: i64,
    pub patient_name: String,
    pub risk: RiskLevel,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    #[serde(flatten)]
    pub assessment: RiskAssessment,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStats {
    pub active_patients: usize,
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub canceled_sessions: usize,
    pub scheduled_sessions: usize,
    pub attendance_rate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub stats: ReportStats,
    pub risk_alerts: Vec<RiskAlert>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub total_patients: usize,
    pub high_risk: usize,
    pub moderate_risk: usize,
    pub low_risk: usize,
    pub risk_distribution: BTreeMap<RiskLevel, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskOverview {
    pub summary: RiskSummary,
    pub patients: Vec<RiskAssessment>,
}

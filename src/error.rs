use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Psychologist(i64),
    Patient(i64),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Psychologist(id) => write!(f, "psychologist {id}"),
            Self::Patient(id) => write!(f, "patient {id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(Scope),

    #[error("failed to read session history: {0:#}")]
    UpstreamReadFailure(#[source] anyhow::Error),

    #[error("{}", scope_message(.psychologist_id, .patient_id))]
    InvalidScope {
        psychologist_id: i64,
        patient_id: Option<i64>,
    },

    #[error("invalid risk configuration: {0}")]
    InvalidConfig(String),
}

fn scope_message(psychologist_id: &i64, patient_id: &Option<i64>) -> String {
    match patient_id {
        Some(patient_id) => {
            format!("patient {patient_id} is outside the scope of psychologist {psychologist_id}")
        }
        None => format!("psychologist {psychologist_id} may only access their own data"),
    }
}

impl EngineError {
    pub fn upstream(err: impl Into<anyhow::Error>) -> Self {
        Self::UpstreamReadFailure(err.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::UpstreamReadFailure(_) => "upstream_read_failure",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::UpstreamReadFailure(_) => 502,
            Self::InvalidScope { .. } => 403,
            Self::InvalidConfig(_) => 400,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.kind(),
            detail: self.to_string(),
        }
    }
}

/// Single structured error handed to the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
}

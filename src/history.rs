use std::future::Future;

use crate::error::EngineError;
use crate::models::{PatientRecord, PatientRef, SessionRecord};

/// Read-only access to persisted appointment history.
///
/// Implementations must tolerate concurrent reads; the engine never writes.
/// Sessions are returned sorted by date ascending.
pub trait HistoryReader {
    /// Fails with `NotFound` when the psychologist does not exist.
    fn fetch_patients_by_psychologist(
        &self,
        psychologist_id: i64,
    ) -> impl Future<Output = Result<Vec<PatientRef>, EngineError>> + Send;

    /// Fails with `NotFound` when the patient does not exist.
    fn fetch_patient(
        &self,
        patient_id: i64,
    ) -> impl Future<Output = Result<PatientRecord, EngineError>> + Send;

    fn fetch_sessions_by_patient(
        &self,
        patient_id: i64,
    ) -> impl Future<Output = Result<Vec<SessionRecord>, EngineError>> + Send;
}

#[cfg(test)]
pub mod memory {
    use std::collections::{BTreeMap, HashSet};

    use chrono::NaiveDate;

    use super::HistoryReader;
    use crate::error::{EngineError, Scope};
    use crate::models::{PatientRecord, PatientRef, SessionRecord, SessionStatus};

    /// In-memory history used by unit tests.
    #[derive(Debug, Default)]
    pub struct MemoryHistory {
        psychologists: Vec<i64>,
        patients: BTreeMap<i64, PatientRecord>,
        sessions: Vec<SessionRecord>,
        failing_patients: HashSet<i64>,
    }

    impl MemoryHistory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn psychologist(mut self, id: i64) -> Self {
            self.psychologists.push(id);
            self
        }

        pub fn patient(mut self, id: i64, name: &str, psychologist_id: i64) -> Self {
            self.patients.insert(
                id,
                PatientRecord {
                    patient_id: id,
                    patient_name: name.to_string(),
                    psychologist_id: Some(psychologist_id),
                },
            );
            self
        }

        pub fn session(mut self, patient_id: i64, date: NaiveDate, status: SessionStatus) -> Self {
            let psychologist_id = self
                .patients
                .get(&patient_id)
                .and_then(|p| p.psychologist_id)
                .unwrap_or_default();
            let id = self.sessions.len() as i64 + 1;
            self.sessions.push(SessionRecord {
                id,
                patient_id,
                psychologist_id,
                date,
                status,
                notes: None,
            });
            self
        }

        pub fn failing_patient(mut self, patient_id: i64) -> Self {
            self.failing_patients.insert(patient_id);
            self
        }
    }

    impl HistoryReader for MemoryHistory {
        async fn fetch_patients_by_psychologist(
            &self,
            psychologist_id: i64,
        ) -> Result<Vec<PatientRef>, EngineError> {
            if !self.psychologists.contains(&psychologist_id) {
                return Err(EngineError::NotFound(Scope::Psychologist(psychologist_id)));
            }
            Ok(self
                .patients
                .values()
                .filter(|p| p.psychologist_id == Some(psychologist_id))
                .map(|p| PatientRef {
                    patient_id: p.patient_id,
                    patient_name: p.patient_name.clone(),
                })
                .collect())
        }

        async fn fetch_patient(&self, patient_id: i64) -> Result<PatientRecord, EngineError> {
            self.patients
                .get(&patient_id)
                .cloned()
                .ok_or(EngineError::NotFound(Scope::Patient(patient_id)))
        }

        async fn fetch_sessions_by_patient(
            &self,
            patient_id: i64,
        ) -> Result<Vec<SessionRecord>, EngineError> {
            if self.failing_patients.contains(&patient_id) {
                return Err(EngineError::upstream(anyhow::anyhow!(
                    "simulated read failure for patient {patient_id}"
                )));
            }
            let mut sessions: Vec<SessionRecord> = self
                .sessions
                .iter()
                .filter(|s| s.patient_id == patient_id)
                .cloned()
                .collect();
            sessions.sort_by_key(|s| (s.date, s.id));
            Ok(sessions)
        }
    }
}

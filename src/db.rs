use anyhow::Context;
use chrono::{Duration, NaiveDate};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{EngineError, Scope};
use crate::history::HistoryReader;
use crate::models::{PatientRecord, PatientRef, SessionRecord, SessionStatus};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_psychologist(pool: &PgPool, name: &str, email: &str) -> anyhow::Result<i64> {
    let id: i64 = sqlx::query(
        r#"
        INSERT INTO clinic.psychologists (full_name, email)
        VALUES ($1, $2)
        ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(email)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_patient(
    pool: &PgPool,
    name: &str,
    email: &str,
    psychologist_id: i64,
) -> anyhow::Result<i64> {
    let id: i64 = sqlx::query(
        r#"
        INSERT INTO clinic.patients (full_name, email, psychologist_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name, psychologist_id = EXCLUDED.psychologist_id
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(email)
    .bind(psychologist_id)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

struct NewAppointment<'a> {
    patient_id: i64,
    psychologist_id: i64,
    date: NaiveDate,
    time: &'a str,
    status: SessionStatus,
    notes: Option<&'a str>,
    source_key: &'a str,
}

/// Re-imports are idempotent on `source_key`; a second appointment in an
/// occupied (patient, date, time) slot fails instead of being dropped.
const INSERT_APPOINTMENT: &str = r#"
    INSERT INTO clinic.appointments
    (patient_id, psychologist_id, date, time, status, notes, source_key)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (source_key) DO NOTHING
    "#;

async fn insert_appointment(pool: &PgPool, row: NewAppointment<'_>) -> anyhow::Result<bool> {
    let source_key = row.source_key;
    let result = sqlx::query(INSERT_APPOINTMENT)
        .bind(row.patient_id)
        .bind(row.psychologist_id)
        .bind(row.date)
        .bind(row.time)
        .bind(row.status.as_str())
        .bind(row.notes)
        .bind(row.source_key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to insert appointment {source_key}"))?;

    let inserted = result.rows_affected() > 0;
    if !inserted {
        tracing::debug!(source_key, "appointment already imported, skipped");
    }
    Ok(inserted)
}

/// Two psychologists and a handful of patients with histories relative to `today`.
pub async fn seed(pool: &PgPool, today: NaiveDate) -> anyhow::Result<()> {
    let ana = upsert_psychologist(pool, "Dra. Ana Costa", "ana@test.com").await?;
    let carlos = upsert_psychologist(pool, "Dr. Carlos Mendes", "carlos@test.com").await?;

    use SessionStatus::{Agendado, Cancelado, Concluido, Reagendado};
    let patients: Vec<(&str, &str, i64, Vec<(i64, SessionStatus, &str)>)> = vec![
        (
            "Maria Santos",
            "maria@test.com",
            ana,
            vec![
                (26, Concluido, "Primeira sessão, boa adesão"),
                (19, Concluido, "Evolução positiva"),
                (12, Concluido, ""),
                (5, Concluido, "Mantém frequência"),
                (-2, Agendado, ""),
            ],
        ),
        (
            "João Silva",
            "joao@test.com",
            ana,
            vec![
                (35, Concluido, "Relata ansiedade no trabalho"),
                (28, Cancelado, "Imprevisto familiar"),
                (21, Cancelado, ""),
                (14, Cancelado, "Sem justificativa"),
            ],
        ),
        (
            "Ana Oliveira",
            "ana.oliveira@test.com",
            ana,
            vec![
                (110, Concluido, ""),
                (96, Cancelado, ""),
                (82, Concluido, "Pausa por viagem"),
            ],
        ),
        (
            "Pedro Costa",
            "pedro@test.com",
            ana,
            vec![(-5, Reagendado, "Remarcado a pedido do paciente")],
        ),
        (
            "Lucas Pereira",
            "lucas@test.com",
            carlos,
            vec![(9, Concluido, ""), (2, Cancelado, "")],
        ),
    ];

    for (name, email, psychologist_id, sessions) in patients {
        let patient_id = upsert_patient(pool, name, email, psychologist_id).await?;
        for (offset, (days_ago, status, note)) in sessions.into_iter().enumerate() {
            let source_key = format!("seed-{email}-{offset}");
            insert_appointment(
                pool,
                NewAppointment {
                    patient_id,
                    psychologist_id,
                    date: today - Duration::days(days_ago),
                    time: "14:00",
                    status,
                    notes: (!note.is_empty()).then_some(note),
                    source_key: &source_key,
                },
            )
            .await?;
        }
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        patient_name: String,
        patient_email: String,
        psychologist_email: String,
        date: NaiveDate,
        time: String,
        status: String,
        notes: Option<String>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let status: SessionStatus = row
            .status
            .parse()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("row {}", line + 1))?;

        let psychologist_id: i64 =
            sqlx::query("SELECT id FROM clinic.psychologists WHERE email = $1")
                .bind(&row.psychologist_email)
                .fetch_optional(pool)
                .await?
                .with_context(|| format!("unknown psychologist {}", row.psychologist_email))?
                .get("id");

        let patient_id =
            upsert_patient(pool, &row.patient_name, &row.patient_email, psychologist_id).await?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let added = insert_appointment(
            pool,
            NewAppointment {
                patient_id,
                psychologist_id,
                date: row.date,
                time: &row.time,
                status,
                notes: row.notes.as_deref().filter(|n| !n.is_empty()),
                source_key: &source_key,
            },
        )
        .await?;

        if added {
            inserted += 1;
        }
    }

    tracing::info!(inserted, path = %csv_path.display(), "csv import finished");
    Ok(inserted)
}

/// [`HistoryReader`] backed by the clinic Postgres schema.
#[derive(Debug, Clone)]
pub struct PgHistory {
    pool: PgPool,
}

impl PgHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl HistoryReader for PgHistory {
    async fn fetch_patients_by_psychologist(
        &self,
        psychologist_id: i64,
    ) -> Result<Vec<PatientRef>, EngineError> {
        tracing::debug!(psychologist_id, "fetching patients");
        let exists = sqlx::query("SELECT 1 FROM clinic.psychologists WHERE id = $1")
            .bind(psychologist_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(EngineError::upstream)?;
        if exists.is_none() {
            return Err(EngineError::NotFound(Scope::Psychologist(psychologist_id)));
        }

        let rows = sqlx::query(
            "SELECT id, full_name FROM clinic.patients \
             WHERE psychologist_id = $1 ORDER BY full_name, id",
        )
        .bind(psychologist_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::upstream)?;

        Ok(rows
            .into_iter()
            .map(|row| PatientRef {
                patient_id: row.get("id"),
                patient_name: row.get("full_name"),
            })
            .collect())
    }

    async fn fetch_patient(&self, patient_id: i64) -> Result<PatientRecord, EngineError> {
        tracing::debug!(patient_id, "fetching patient");
        let row = sqlx::query(
            "SELECT id, full_name, psychologist_id FROM clinic.patients WHERE id = $1",
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(EngineError::upstream)?
        .ok_or(EngineError::NotFound(Scope::Patient(patient_id)))?;

        Ok(PatientRecord {
            patient_id: row.get("id"),
            patient_name: row.get("full_name"),
            psychologist_id: row.get("psychologist_id"),
        })
    }

    async fn fetch_sessions_by_patient(
        &self,
        patient_id: i64,
    ) -> Result<Vec<SessionRecord>, EngineError> {
        tracing::debug!(patient_id, "fetching sessions");
        let rows = sqlx::query(
            "SELECT id, patient_id, psychologist_id, date, status, notes \
             FROM clinic.appointments WHERE patient_id = $1 ORDER BY date, time, id",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::upstream)?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("status");
            let status = status
                .parse::<SessionStatus>()
                .map_err(|err| EngineError::upstream(anyhow::Error::msg(err)))?;
            sessions.push(SessionRecord {
                id: row.get("id"),
                patient_id: row.get("patient_id"),
                psychologist_id: row.get("psychologist_id"),
                date: row.get("date"),
                status,
                notes: row.get("notes"),
            });
        }

        Ok(sessions)
    }
}

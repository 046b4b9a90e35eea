use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::config::RiskConfig;
use crate::error::EngineError;
use crate::features;
use crate::history::HistoryReader;
use crate::models::{
    PatientRef, Report, ReportStats, RiskAlert, RiskAssessment, RiskLevel, RiskOverview,
    RiskSummary, SessionRecord, SessionStatus,
};
use crate::risk;

/// Which assessments become alerts in a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlertGranularity {
    /// Only `moderado` and `alto`.
    #[default]
    Elevated,
    All,
}

impl AlertGranularity {
    fn includes(&self, level: RiskLevel) -> bool {
        match self {
            Self::Elevated => level != RiskLevel::Baixo,
            Self::All => true,
        }
    }
}

struct PatientHistory {
    patient: PatientRef,
    sessions: Vec<SessionRecord>,
}

fn authorize(caller_id: i64, psychologist_id: i64) -> Result<(), EngineError> {
    if caller_id != psychologist_id {
        tracing::warn!(caller_id, psychologist_id, "rejected cross-psychologist request");
        return Err(EngineError::InvalidScope {
            psychologist_id: caller_id,
            patient_id: None,
        });
    }
    Ok(())
}

/// Reads every patient's history; any failed read fails the whole scope.
async fn load_scope<R: HistoryReader>(
    reader: &R,
    psychologist_id: i64,
) -> Result<Vec<PatientHistory>, EngineError> {
    let patients = reader.fetch_patients_by_psychologist(psychologist_id).await?;
    let mut histories = Vec::with_capacity(patients.len());

    for patient in patients {
        let sessions = reader
            .fetch_sessions_by_patient(patient.patient_id)
            .await
            .inspect_err(|err| {
                tracing::warn!(
                    psychologist_id,
                    patient_id = patient.patient_id,
                    error = %err,
                    "history read failed, aborting"
                );
            })?;
        histories.push(PatientHistory { patient, sessions });
    }

    Ok(histories)
}

/// Percentage with one decimal; `"0.0"` when nothing was completed or canceled.
pub fn format_attendance_rate(completed: usize, canceled: usize) -> String {
    let rate = features::attendance_rate(completed, canceled).unwrap_or(0.0);
    format!("{:.1}", rate * 100.0)
}

pub fn summarize_sessions<'a, I>(active_patients: usize, sessions: I) -> ReportStats
where
    I: IntoIterator<Item = &'a SessionRecord>,
{
    let mut stats = ReportStats {
        active_patients,
        ..ReportStats::default()
    };

    for session in sessions {
        stats.total_sessions += 1;
        match session.status {
            SessionStatus::Concluido => stats.completed_sessions += 1,
            SessionStatus::Cancelado => stats.canceled_sessions += 1,
            status if status.is_pending() => stats.scheduled_sessions += 1,
            _ => {}
        }
    }

    stats.attendance_rate =
        format_attendance_rate(stats.completed_sessions, stats.canceled_sessions);
    stats
}

fn assess_all(
    histories: &[PatientHistory],
    today: NaiveDate,
    config: &RiskConfig,
) -> Vec<RiskAssessment> {
    let mut assessments: Vec<RiskAssessment> = histories
        .iter()
        .map(|h| risk::assess(&h.patient, &h.sessions, today, config))
        .collect();
    assessments.sort_by(risk::by_risk);
    assessments
}

pub async fn build_report<R: HistoryReader>(
    reader: &R,
    caller_id: i64,
    psychologist_id: i64,
    today: NaiveDate,
    config: &RiskConfig,
    granularity: AlertGranularity,
) -> Result<Report, EngineError> {
    authorize(caller_id, psychologist_id)?;
    tracing::info!(psychologist_id, %today, "building report");

    let histories = load_scope(reader, psychologist_id).await?;
    let stats = summarize_sessions(
        histories.len(),
        histories.iter().flat_map(|h| h.sessions.iter()),
    );

    let risk_alerts: Vec<RiskAlert> = assess_all(&histories, today, config)
        .into_iter()
        .filter(|assessment| granularity.includes(assessment.risk))
        .map(|assessment| RiskAlert {
            assessment,
            date: today,
        })
        .collect();

    tracing::info!(
        psychologist_id,
        patients = stats.active_patients,
        sessions = stats.total_sessions,
        alerts = risk_alerts.len(),
        "report ready"
    );

    Ok(Report { stats, risk_alerts })
}

fn share(count: usize, total: usize) -> String {
    if total == 0 {
        "0%".to_string()
    } else {
        format!("{:.1}%", count as f64 / total as f64 * 100.0)
    }
}

pub fn summarize_risk(assessments: &[RiskAssessment]) -> RiskSummary {
    let count = |level: RiskLevel| assessments.iter().filter(|a| a.risk == level).count();
    let total_patients = assessments.len();
    let high_risk = count(RiskLevel::Alto);
    let moderate_risk = count(RiskLevel::Moderado);
    let low_risk = count(RiskLevel::Baixo);

    let risk_distribution = BTreeMap::from([
        (RiskLevel::Alto, share(high_risk, total_patients)),
        (RiskLevel::Moderado, share(moderate_risk, total_patients)),
        (RiskLevel::Baixo, share(low_risk, total_patients)),
    ]);

    RiskSummary {
        total_patients,
        high_risk,
        moderate_risk,
        low_risk,
        risk_distribution,
    }
}

/// Every patient's assessment plus the level distribution.
pub async fn risk_overview<R: HistoryReader>(
    reader: &R,
    caller_id: i64,
    psychologist_id: i64,
    today: NaiveDate,
    config: &RiskConfig,
) -> Result<RiskOverview, EngineError> {
    authorize(caller_id, psychologist_id)?;
    let histories = load_scope(reader, psychologist_id).await?;
    let patients = assess_all(&histories, today, config);
    let summary = summarize_risk(&patients);
    tracing::info!(
        psychologist_id,
        patients = summary.total_patients,
        high_risk = summary.high_risk,
        "risk overview ready"
    );
    Ok(RiskOverview { summary, patients })
}

pub fn render_markdown(psychologist_id: i64, today: NaiveDate, report: &Report) -> String {
    let mut output = String::new();
    let stats = &report.stats;

    let _ = writeln!(output, "# Relatório de Atendimento");
    let _ = writeln!(
        output,
        "Psicólogo {} (análise em {})",
        psychologist_id, today
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Estatísticas");
    let _ = writeln!(output, "- Pacientes ativos: {}", stats.active_patients);
    let _ = writeln!(output, "- Sessões: {}", stats.total_sessions);
    let _ = writeln!(output, "- Concluídas: {}", stats.completed_sessions);
    let _ = writeln!(output, "- Canceladas: {}", stats.canceled_sessions);
    let _ = writeln!(output, "- Agendadas: {}", stats.scheduled_sessions);
    let _ = writeln!(output, "- Taxa de comparecimento: {}%", stats.attendance_rate);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alertas de Risco");

    if report.risk_alerts.is_empty() {
        let _ = writeln!(output, "Nenhum paciente com risco elevado.");
    } else {
        for alert in report.risk_alerts.iter() {
            let assessment = &alert.assessment;
            let _ = writeln!(
                output,
                "- {} (#{}) risco {} score {:.2}: {}",
                assessment.patient_name,
                assessment.patient_id,
                assessment.risk,
                assessment.score,
                assessment.reason
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::memory::MemoryHistory;
    use chrono::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
    }

    fn days_ago(days: i64) -> NaiveDate {
        today() - Duration::days(days)
    }

    fn clinic() -> MemoryHistory {
        MemoryHistory::new()
            .psychologist(1)
            .psychologist(2)
            .patient(10, "Maria Santos", 1)
            .patient(11, "Pedro Alves", 1)
            .patient(12, "Ana Rocha", 1)
            .patient(13, "Bruno Dias", 1)
            .patient(20, "Lucas Reis", 2)
            .session(10, days_ago(20), SessionStatus::Concluido)
            .session(10, days_ago(13), SessionStatus::Concluido)
            .session(10, days_ago(6), SessionStatus::Concluido)
            .session(11, days_ago(40), SessionStatus::Concluido)
            .session(11, days_ago(30), SessionStatus::Cancelado)
            .session(11, days_ago(20), SessionStatus::Cancelado)
            .session(11, days_ago(10), SessionStatus::Cancelado)
            .session(12, days_ago(120), SessionStatus::Concluido)
            .session(12, days_ago(100), SessionStatus::Cancelado)
            .session(12, days_ago(90), SessionStatus::Concluido)
            .session(13, days_ago(-7), SessionStatus::Agendado)
            .session(20, days_ago(3), SessionStatus::Cancelado)
    }

    #[test]
    fn attendance_rate_formats_one_decimal() {
        assert_eq!(format_attendance_rate(2, 0), "100.0");
        assert_eq!(format_attendance_rate(2, 1), "66.7");
        assert_eq!(format_attendance_rate(0, 0), "0.0");
    }

    #[test]
    fn stats_totals_match_status_counts() {
        let session = |status| SessionRecord {
            id: 1,
            patient_id: 1,
            psychologist_id: 1,
            date: today(),
            status,
            notes: None,
        };
        let sessions = vec![
            session(SessionStatus::Concluido),
            session(SessionStatus::Cancelado),
            session(SessionStatus::Agendado),
            session(SessionStatus::Reagendado),
        ];
        let stats = summarize_sessions(1, &sessions);
        assert_eq!(stats.total_sessions, 4);
        assert_eq!(
            stats.total_sessions,
            stats.completed_sessions + stats.canceled_sessions + stats.scheduled_sessions
        );
        assert_eq!(stats.scheduled_sessions, 2);
        assert_eq!(stats.attendance_rate, "50.0");
    }

    #[tokio::test]
    async fn small_practice_reports_full_attendance() {
        let reader = MemoryHistory::new()
            .psychologist(1)
            .patient(1, "Maria Santos", 1)
            .patient(2, "Pedro Alves", 1)
            .patient(3, "Ana Rocha", 1)
            .patient(4, "Bruno Dias", 1)
            .session(1, days_ago(14), SessionStatus::Concluido)
            .session(2, days_ago(7), SessionStatus::Concluido)
            .session(3, days_ago(-2), SessionStatus::Agendado);

        let report = build_report(
            &reader,
            1,
            1,
            today(),
            &RiskConfig::default(),
            AlertGranularity::Elevated,
        )
        .await
        .unwrap();

        assert_eq!(report.stats.active_patients, 4);
        assert_eq!(report.stats.total_sessions, 3);
        assert_eq!(report.stats.completed_sessions, 2);
        assert_eq!(report.stats.canceled_sessions, 0);
        assert_eq!(report.stats.scheduled_sessions, 1);
        assert_eq!(report.stats.attendance_rate, "100.0");
        assert!(report.risk_alerts.is_empty());
    }

    #[tokio::test]
    async fn alerts_are_elevated_and_sorted() {
        let report = build_report(
            &clinic(),
            1,
            1,
            today(),
            &RiskConfig::default(),
            AlertGranularity::Elevated,
        )
        .await
        .unwrap();

        let names: Vec<&str> = report
            .risk_alerts
            .iter()
            .map(|a| a.assessment.patient_name.as_str())
            .collect();
        assert_eq!(names, vec!["Pedro Alves", "Ana Rocha"]);
        assert_eq!(report.risk_alerts[0].assessment.risk, RiskLevel::Alto);
        assert_eq!(report.risk_alerts[1].assessment.risk, RiskLevel::Moderado);
        assert!(report.risk_alerts.iter().all(|a| a.date == today()));
        assert!(report
            .risk_alerts
            .windows(2)
            .all(|w| w[0].assessment.score >= w[1].assessment.score));

        assert_eq!(report.stats.active_patients, 4);
        assert_eq!(report.stats.total_sessions, 11);
        assert_eq!(report.stats.completed_sessions, 6);
        assert_eq!(report.stats.canceled_sessions, 4);
        assert_eq!(report.stats.scheduled_sessions, 1);
        assert_eq!(report.stats.attendance_rate, "60.0");
    }

    #[tokio::test]
    async fn all_levels_include_low_risk_patients() {
        let report = build_report(
            &clinic(),
            1,
            1,
            today(),
            &RiskConfig::default(),
            AlertGranularity::All,
        )
        .await
        .unwrap();

        let names: Vec<&str> = report
            .risk_alerts
            .iter()
            .map(|a| a.assessment.patient_name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["Pedro Alves", "Ana Rocha", "Bruno Dias", "Maria Santos"]
        );
    }

    #[tokio::test]
    async fn ties_break_on_patient_name() {
        let reader = MemoryHistory::new()
            .psychologist(1)
            .patient(1, "Zeca Prado", 1)
            .patient(2, "Alice Prado", 1)
            .session(1, days_ago(10), SessionStatus::Cancelado)
            .session(2, days_ago(10), SessionStatus::Cancelado);

        let report = build_report(
            &reader,
            1,
            1,
            today(),
            &RiskConfig::default(),
            AlertGranularity::Elevated,
        )
        .await
        .unwrap();

        let ids: Vec<i64> = report
            .risk_alerts
            .iter()
            .map(|a| a.assessment.patient_id)
            .collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn failed_read_fails_the_report() {
        let reader = clinic().failing_patient(12);
        let err = build_report(
            &reader,
            1,
            1,
            today(),
            &RiskConfig::default(),
            AlertGranularity::Elevated,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::UpstreamReadFailure(_)));
    }

    #[tokio::test]
    async fn unknown_psychologist_is_not_found() {
        let err = build_report(
            &clinic(),
            7,
            7,
            today(),
            &RiskConfig::default(),
            AlertGranularity::Elevated,
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn other_psychologists_report_is_rejected() {
        let err = build_report(
            &clinic(),
            1,
            2,
            today(),
            &RiskConfig::default(),
            AlertGranularity::Elevated,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidScope {
                psychologist_id: 1,
                patient_id: None
            }
        ));
    }

    #[tokio::test]
    async fn empty_scope_yields_zero_rate() {
        let reader = MemoryHistory::new().psychologist(3);
        let report = build_report(
            &reader,
            3,
            3,
            today(),
            &RiskConfig::default(),
            AlertGranularity::All,
        )
        .await
        .unwrap();
        assert_eq!(report.stats, ReportStats {
            attendance_rate: "0.0".to_string(),
            ..ReportStats::default()
        });
        assert!(report.risk_alerts.is_empty());
    }

    #[tokio::test]
    async fn overview_counts_levels() {
        let overview = risk_overview(&clinic(), 1, 1, today(), &RiskConfig::default())
            .await
            .unwrap();
        assert_eq!(overview.summary.total_patients, 4);
        assert_eq!(overview.summary.high_risk, 1);
        assert_eq!(overview.summary.moderate_risk, 1);
        assert_eq!(overview.summary.low_risk, 2);
        assert_eq!(overview.summary.risk_distribution[&RiskLevel::Baixo], "50.0%");
        assert_eq!(overview.patients.len(), 4);

        let json = serde_json::to_value(&overview).unwrap();
        assert_eq!(json["summary"]["risk_distribution"]["alto"], "25.0%");
    }

    #[test]
    fn empty_distribution_uses_zero_percent() {
        let summary = summarize_risk(&[]);
        assert_eq!(summary.total_patients, 0);
        assert!(summary.risk_distribution.values().all(|v| v == "0%"));
    }

    #[test]
    fn markdown_lists_alerts() {
        let report = Report {
            stats: summarize_sessions(0, std::iter::empty()),
            risk_alerts: vec![RiskAlert {
                assessment: RiskAssessment {
                    patient_id: 11,
                    patient_name: "Pedro Alves".to_string(),
                    risk: RiskLevel::Alto,
                    score: 1.0,
                    reason: "3 cancelamentos consecutivos nas sessões mais recentes".to_string(),
                },
                date: today(),
            }],
        };
        let markdown = render_markdown(1, today(), &report);
        assert!(markdown.starts_with("# Relatório de Atendimento"));
        assert!(markdown.contains("Taxa de comparecimento: 0.0%"));
        assert!(markdown.contains("- Pedro Alves (#11) risco alto score 1.00"));
    }
}

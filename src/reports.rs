use itertools::Itertools;
use std::io::Write;

use crate::model::{EndReason, SessionStatus, UserBalance};
use crate::store::SessionSummary;
use crate::util::{format_clock, mean};

/// Totals shown on the reports screen.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSummary {
    pub completed: usize,
    pub abandoned: usize,
    pub timed_out: usize,
    pub practice_minutes: u64,
    pub mean_answered: Option<f64>,
    pub preps_used: u32,
    pub preps_remaining: u32,
    pub preps_purchased: u32,
}

impl ReportSummary {
    pub fn build(rows: &[SessionSummary], balance: &UserBalance) -> Self {
        let completed: Vec<&SessionSummary> = rows
            .iter()
            .filter(|r| r.status == SessionStatus::Ended)
            .collect();
        let answered: Vec<f64> = completed
            .iter()
            .map(|r| r.questions_answered as f64)
            .collect();
        let preps_used = rows
            .iter()
            .filter(|r| !r.credit_refunded)
            .count() as u32;

        Self {
            completed: completed.len(),
            abandoned: rows
                .iter()
                .filter(|r| r.status == SessionStatus::Abandoned)
                .count(),
            timed_out: completed
                .iter()
                .filter(|r| r.end_reason == Some(EndReason::TimeExpired))
                .count(),
            practice_minutes: rows.iter().map(|r| r.elapsed_secs).sum::<u64>() / 60,
            mean_answered: mean(&answered),
            preps_used,
            preps_remaining: balance.remaining,
            preps_purchased: balance.total_purchased,
        }
    }
}

/// Plain-text report for the terminal.
pub fn render_text(rows: &[SessionSummary], summary: &ReportSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Preps: {} remaining / {} purchased / {} used\n",
        summary.preps_remaining, summary.preps_purchased, summary.preps_used
    ));
    out.push_str(&format!(
        "Interviews: {} completed ({} timed out), {} abandoned, {} min practiced",
        summary.completed, summary.timed_out, summary.abandoned, summary.practice_minutes
    ));
    if let Some(avg) = summary.mean_answered {
        out.push_str(&format!(", {avg:.1} answers per interview"));
    }
    out.push('\n');

    if rows.is_empty() {
        out.push_str("\nNo interviews yet.\n");
        return out;
    }

    out.push('\n');
    out.push_str(&format!(
        "{:<17} {:<10} {:<13} {:>8} {:>7}\n",
        "date", "status", "reason", "answered", "time"
    ));
    let lines = rows
        .iter()
        .map(|r| {
            format!(
                "{:<17} {:<10} {:<13} {:>8} {:>7}",
                r.started_at.format("%Y-%m-%d %H:%M"),
                r.status.as_str(),
                r.end_reason.map_or("-", |e| e.as_str()),
                format!("{}/{}", r.questions_answered, r.questions_total),
                format_clock(r.elapsed_secs),
            )
        })
        .join("\n");
    out.push_str(&lines);
    out.push('\n');
    out
}

/// Writes one CSV row per session, with a header.
pub fn export_csv<W: Write>(rows: &[SessionSummary], writer: W) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserId;
    use chrono::{TimeZone, Utc};

    fn row(status: SessionStatus, reason: Option<EndReason>, answered: usize, secs: u64) -> SessionSummary {
        SessionSummary {
            session_id: format!("s-{answered}-{secs}"),
            started_at: Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap(),
            status,
            end_reason: reason,
            questions_answered: answered,
            questions_total: 4,
            elapsed_secs: secs,
            credit_refunded: false,
        }
    }

    fn balance() -> UserBalance {
        UserBalance {
            user_id: UserId::new("alex"),
            remaining: 3,
            total_purchased: 5,
        }
    }

    #[test]
    fn summary_counts_by_outcome() {
        let rows = vec![
            row(SessionStatus::Ended, Some(EndReason::Finished), 4, 1500),
            row(SessionStatus::Ended, Some(EndReason::TimeExpired), 2, 1725),
            row(SessionStatus::Abandoned, Some(EndReason::Abandoned), 1, 135),
        ];
        let s = ReportSummary::build(&rows, &balance());

        assert_eq!(s.completed, 2);
        assert_eq!(s.timed_out, 1);
        assert_eq!(s.abandoned, 1);
        assert_eq!(s.practice_minutes, 56);
        assert_eq!(s.mean_answered, Some(3.0));
        assert_eq!(s.preps_used, 3);
        assert_eq!(s.preps_remaining, 3);
    }

    #[test]
    fn refunded_sessions_do_not_count_as_used() {
        let mut r = row(SessionStatus::Abandoned, Some(EndReason::Abandoned), 0, 10);
        r.credit_refunded = true;
        let s = ReportSummary::build(&[r], &balance());
        assert_eq!(s.preps_used, 0);
        assert_eq!(s.mean_answered, None);
    }

    #[test]
    fn text_report_lists_sessions() {
        let rows = vec![row(SessionStatus::Ended, Some(EndReason::Finished), 4, 1500)];
        let text = render_text(&rows, &ReportSummary::build(&rows, &balance()));

        assert!(text.contains("3 remaining / 5 purchased"));
        assert!(text.contains("2024-01-15 09:30"));
        assert!(text.contains("4/4"));
        assert!(text.contains("25:00"));
    }

    #[test]
    fn empty_history_says_so() {
        let text = render_text(&[], &ReportSummary::build(&[], &balance()));
        assert!(text.contains("No interviews yet."));
    }

    #[test]
    fn csv_export_has_header_and_rows() {
        let rows = vec![
            row(SessionStatus::Ended, Some(EndReason::Finished), 4, 1500),
            row(SessionStatus::Abandoned, None, 0, 20),
        ];
        let mut buf = Vec::new();
        export_csv(&rows, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("session_id,started_at,status,end_reason"));
        assert!(lines[1].contains(",ended,finished,4,4,1500,false"));
        assert!(lines[2].contains(",abandoned,,0,4,20,false"));
    }
}

use std::io::IsTerminal;

use bvat_session::{CaptureEnd, CaptureReport, SessionSummary};
use bvat_transport::PortInfo;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ReportOutput<'a> {
    source: &'a str,
    /// `None` when the capture stopped on an error.
    end: Option<CaptureEnd>,
    #[serde(flatten)]
    report: &'a CaptureReport,
}

pub fn print_report(
    source: &str,
    end: Option<CaptureEnd>,
    report: &CaptureReport,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => {
            let out = ReportOutput {
                source,
                end,
                report,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            if !report.sessions.is_empty() {
                let mut sessions = Table::new();
                sessions
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec![
                        "SESSION", "FILE", "ROWS", "MALFORMED", "STARTED", "CLOSED", "FINALIZED",
                    ]);
                for summary in &report.sessions {
                    sessions.add_row(session_row(summary));
                }
                println!("{sessions}");
            }

            let stats = &report.stats;
            let mut totals = Table::new();
            totals
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METRIC", "VALUE"])
                .add_row(vec!["source".to_string(), source.to_string()])
                .add_row(vec!["end".to_string(), end_label(end).to_string()])
                .add_row(vec!["records".to_string(), report.records.to_string()])
                .add_row(vec![
                    "oversized records".to_string(),
                    report.oversized_records.to_string(),
                ])
                .add_row(vec![
                    "samples written".to_string(),
                    stats.samples_written.to_string(),
                ])
                .add_row(vec![
                    "samples discarded".to_string(),
                    stats.samples_discarded.to_string(),
                ])
                .add_row(vec!["malformed".to_string(), stats.malformed.to_string()])
                .add_row(vec![
                    "extraction failures".to_string(),
                    stats.extraction_failures.to_string(),
                ]);
            for (reason, count) in &stats.malformed_by_reason {
                totals.add_row(vec![format!("  {reason}"), count.to_string()]);
            }
            println!("{totals}");
        }
        OutputFormat::Pretty => {
            for summary in &report.sessions {
                let note = if summary.finalized { "" } else { ", not finalized" };
                println!(
                    "session {} -> {} ({} rows, {} malformed{})",
                    summary.id,
                    summary.path.display(),
                    summary.rows,
                    summary.malformed,
                    note
                );
            }
            println!(
                "source={} end={} records={} written={} discarded={} malformed={} oversized={}",
                source,
                end_label(end),
                report.records,
                report.stats.samples_written,
                report.stats.samples_discarded,
                report.stats.malformed,
                report.oversized_records
            );
        }
    }
}

fn session_row(summary: &SessionSummary) -> Vec<String> {
    vec![
        summary.id.to_string(),
        summary.path.display().to_string(),
        summary.rows.to_string(),
        summary.malformed.to_string(),
        summary.started_at.to_string(),
        summary.closed_at.to_string(),
        if summary.finalized { "yes" } else { "no" }.to_string(),
    ]
}

fn end_label(end: Option<CaptureEnd>) -> &'static str {
    match end {
        Some(CaptureEnd::StreamClosed) => "stream closed",
        Some(CaptureEnd::Cancelled) => "cancelled",
        None => "error",
    }
}

#[derive(Serialize)]
struct PortOutput<'a> {
    name: &'a str,
    kind: &'static str,
    description: &'a str,
    stlink: bool,
}

pub fn print_ports(ports: &[PortInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<PortOutput<'_>> = ports
                .iter()
                .map(|port| PortOutput {
                    name: &port.name,
                    kind: port.kind.as_str(),
                    description: port.description(),
                    stlink: port.is_stlink(),
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "TYPE", "DESCRIPTION", "ST-LINK"]);
            for port in ports {
                table.add_row(vec![
                    port.name.clone(),
                    port.kind.as_str().to_string(),
                    port.description().to_string(),
                    if port.is_stlink() { "yes" } else { "" }.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if ports.is_empty() {
                println!("no serial ports found");
            }
            for port in ports {
                let marker = if port.is_stlink() { " [st-link]" } else { "" };
                println!(
                    "{} ({}) {}{}",
                    port.name,
                    port.kind.as_str(),
                    port.description(),
                    marker
                );
            }
        }
    }
}

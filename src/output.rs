use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RetrieveResult, StudyAction};
use crate::report::ReportResult;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_retrieve(result: &RetrieveResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_report(result: &ReportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => tracing::debug!("{}", event.message),
        }
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub fn print_retrieve_summary(result: &RetrieveResult) {
    println!("{CYAN}VNA retrieval summary{RESET}");
    println!(
        "{GREEN}Downloaded studies: {}{RESET}",
        result.count(StudyAction::Downloaded)
    );
    println!(
        "{YELLOW}Skipped (already present): {}{RESET}",
        result.count(StudyAction::SkippedExisting)
    );
    println!("{RED}Failed: {}{RESET}", result.count(StudyAction::Failed));
    println!(
        "Images loaded: {}, skipped: {}, elapsed: {:.1}s",
        result.images_loaded(),
        result.images_skipped(),
        result.elapsed_ms as f64 / 1000.0
    );

    for study in &result.studies {
        let label = study
            .accession_number
            .as_deref()
            .unwrap_or(study.term.as_str());
        match study.action {
            StudyAction::Downloaded => {
                println!(
                    "{CYAN}  {label}: {}/{} series, {} images ({} skipped) in {:.1}s{RESET}",
                    study.series_loaded,
                    study.series_total,
                    study.images_loaded,
                    study.images_skipped,
                    study.elapsed_ms as f64 / 1000.0
                );
                if !study.series_excluded.is_empty() {
                    println!("     excluded: {}", study.series_excluded.join(", "));
                }
                println!("     folder: {}", study.path);
            }
            StudyAction::SkippedExisting => {
                println!("{YELLOW}  {label}: folder exists, skipped ({}){RESET}", study.path);
            }
            StudyAction::Failed => {
                let reason = study.message.as_deref().unwrap_or("unknown error");
                println!("{RED}  {label}: failed: {reason}{RESET}");
            }
        }
    }

    for skipped in &result.skipped_terms {
        println!("{YELLOW}  {}: {}{RESET}", skipped.term, skipped.reason);
    }
}

pub fn print_report_summary(result: &ReportResult) {
    println!(
        "{GREEN}Saved {} report records from {} queries to {}{RESET}",
        result.records, result.queries, result.path
    );
    for skipped in &result.skipped {
        println!("{YELLOW}  {}: {}{RESET}", skipped.query, skipped.reason);
    }
}

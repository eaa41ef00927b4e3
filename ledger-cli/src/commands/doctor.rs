//! Doctor command - run ledger integrity checks

use anyhow::{bail, Result};
use colored::Colorize;
use comfy_table::{Cell, Color};
use serde_json::{Map, Value};

use super::{get_context, get_logger, log_event};
use crate::output;
use ledger_core::services::CheckResult;
use ledger_core::LogEvent;

fn status_cell(check: &CheckResult) -> Cell {
    match check.status.as_str() {
        "pass" => Cell::new("ok").fg(Color::Green),
        "warning" => Cell::new("warn").fg(Color::Yellow),
        "error" => Cell::new("FAIL").fg(Color::Red),
        other => Cell::new(other),
    }
}

/// `loan #3, remaining 12.50` from `{"loan_id": 3, "remaining": "12.50"}`
fn describe_finding(finding: &Map<String, Value>) -> String {
    finding
        .iter()
        .map(|(key, value)| match (key.strip_suffix("_id"), value) {
            (Some(entity), _) => format!("{} #{}", entity, value),
            (None, Value::String(text)) => format!("{} {}", key, text),
            (None, _) => format!("{} {}", key, value),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn run(verbose: bool, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let report = ctx.doctor_service.run_checks()?;
    log_event(&get_logger(), LogEvent::new("command_executed").with_operation("doctor"));

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut checks: Vec<_> = report.checks.iter().collect();
    checks.sort_by_key(|(name, _)| name.as_str());

    let mut table = output::create_table();
    table.set_header(vec!["Check", "", "Result"]);
    for (name, check) in &checks {
        table.add_row(vec![
            Cell::new(name.replace('_', " ")),
            status_cell(check),
            Cell::new(&check.message),
        ]);
    }
    println!("{}", table);

    if verbose {
        for (name, check) in checks {
            let Some(findings) = &check.details else { continue };
            println!("{}", name.bold());
            for finding in findings {
                let line = match finding {
                    Value::Object(map) => describe_finding(map),
                    other => other.to_string(),
                };
                println!("  {}", line);
            }
        }
    }

    let summary = &report.summary;
    println!(
        "\n{} ok, {} warning(s), {} failed",
        summary.passed, summary.warnings, summary.errors
    );

    if !report.is_healthy() {
        bail!("{} integrity check(s) failed", summary.errors);
    }
    Ok(())
}

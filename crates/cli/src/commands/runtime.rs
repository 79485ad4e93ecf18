//! Runtime reconstruction command

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use engine_lib::TimeWindow;
use tabled::{settings::Style, Table, Tabled};

use super::Session;
use crate::output::{label, print_heading, print_json, print_warning, OutputFormat};

#[derive(Tabled)]
struct IntervalRow {
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "End")]
    end: String,
    #[tabled(rename = "Hours")]
    hours: String,
}

/// Show reconstructed runtime intervals and flags for one resource
pub async fn show_runtime(
    session: &Session,
    resource_id: &str,
    window: TimeWindow,
    format: OutputFormat,
) -> Result<()> {
    let resource = session
        .source
        .snapshot()
        .resources
        .iter()
        .find(|r| r.id == resource_id)
        .cloned()
        .with_context(|| format!("Resource {} not found in snapshot", resource_id))?;

    let reconstruction = session
        .orchestrator
        .reconstruct_runtime(&resource, &window, Utc::now())
        .await?;
    session.close()?;

    match format {
        OutputFormat::Json => print_json(&reconstruction)?,
        OutputFormat::Table => {
            print_heading("Runtime Reconstruction");
            println!("Resource:               {}", resource.id.cyan());
            println!("Type:                   {}", resource.resource_type);
            println!("State:                  {}", label(&resource.state));
            println!("Total hours:            {:.3}", reconstruction.total_hours);
            println!();

            if !reconstruction.has_audit_coverage {
                print_warning("No audit events in window; runtime is unknown, not zero");
            }

            if !reconstruction.intervals.is_empty() {
                let rows: Vec<IntervalRow> = reconstruction
                    .intervals
                    .iter()
                    .map(|i| IntervalRow {
                        start: i.start.format("%Y-%m-%d %H:%M:%S").to_string(),
                        end: i.end.format("%Y-%m-%d %H:%M:%S").to_string(),
                        hours: format!("{:.3}", i.hours()),
                    })
                    .collect();
                println!("{}", Table::new(rows).with(Style::rounded()));
            }

            if !reconstruction.flags.is_empty() {
                let flags: Vec<String> = reconstruction.flags.iter().map(label).collect();
                println!("Flags:                  {}", flags.join(", ").yellow());
            }
        }
    }

    Ok(())
}

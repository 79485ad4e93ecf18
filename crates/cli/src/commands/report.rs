//! Attribution report and scenario commands

use anyhow::Result;
use colored::Colorize;
use engine_lib::{AttributionReport, Scenario, TimeWindow, ValidationFactor};
use serde_json::json;
use tabled::{settings::Style, Table, Tabled};

use super::Session;
use crate::output::{
    color_confidence, color_source_status, color_status, format_currency, format_figure, label,
    print_heading, print_info, print_json, print_warning, OutputFormat,
};

/// Row for the per-resource table
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    id: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Runtime (h)")]
    runtime: String,
    #[tabled(rename = "Util %")]
    utilization: String,
    #[tabled(rename = "Energy (kWh)")]
    energy: String,
    #[tabled(rename = "CO2 (kg)")]
    co2: String,
    #[tabled(rename = "Cost")]
    cost: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Notes")]
    notes: String,
}

/// Row for the scenario table
#[derive(Tabled)]
struct ScenarioRow {
    #[tabled(rename = "Strategy")]
    name: String,
    #[tabled(rename = "Savings %")]
    pct: String,
    #[tabled(rename = "Band")]
    band: String,
    #[tabled(rename = "Cost Saved")]
    cost: String,
    #[tabled(rename = "CO2 Saved (kg)")]
    co2: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Methodology")]
    methodology: String,
}

/// Row for the source health table
#[derive(Tabled)]
struct HealthRow {
    #[tabled(rename = "Source")]
    category: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "OK")]
    available: u32,
    #[tabled(rename = "Stale")]
    stale: u32,
    #[tabled(rename = "Failed")]
    unavailable: u32,
    #[tabled(rename = "Gaps")]
    gaps: u32,
    #[tabled(rename = "Last Message")]
    message: String,
}

/// Run a full attribution and print the report
pub async fn show_report(
    session: &Session,
    region: &str,
    window: TimeWindow,
    format: OutputFormat,
) -> Result<()> {
    let report = session.orchestrator.run(region, window).await?;
    session.close()?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_heading("Footprint Report");
            println!("Region:                 {}", report.region.cyan());
            println!(
                "Window:                 {} .. {}",
                report.window.from.format("%Y-%m-%d %H:%M"),
                report.window.to.format("%Y-%m-%d %H:%M")
            );
            println!(
                "Resources:              {} ({} excluded)",
                report.totals.resources_total, report.totals.resources_excluded
            );
            println!();

            print_resources(&report);
            print_totals(&report);
            print_validation(&report.validation);
            print_scenarios(&report.scenarios);
            print_health(&report);
        }
    }

    Ok(())
}

/// Run an attribution and print only validation and scenarios
pub async fn show_scenarios(
    session: &Session,
    region: &str,
    window: TimeWindow,
    format: OutputFormat,
) -> Result<()> {
    let report = session.orchestrator.run(region, window).await?;
    session.close()?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "region": report.region,
            "window": report.window,
            "validation": report.validation,
            "scenarios": report.scenarios,
        }))?,
        OutputFormat::Table => {
            print_heading("Savings Scenarios");
            println!(
                "Calculated cost:        {}",
                format_currency(report.totals.cost.total)
            );
            println!(
                "Calculated CO2 (kg):    {:.3}",
                report.totals.co2_kg.total
            );
            println!();
            print_validation(&report.validation);
            print_scenarios(&report.scenarios);
        }
    }

    Ok(())
}

fn print_resources(report: &AttributionReport) {
    if report.resources.is_empty() {
        print_warning("No resources found in region");
        return;
    }

    let rows: Vec<ResourceRow> = report
        .resources
        .iter()
        .map(|r| {
            let mut notes: Vec<String> = r.flags.iter().map(label).collect();
            notes.extend(r.failures.iter().map(|f| label(&f.reason)));
            if r.excluded {
                notes.insert(0, "excluded".to_string());
            }
            ResourceRow {
                id: r.resource.id.clone(),
                resource_type: r.resource.resource_type.clone(),
                runtime: format_figure(&r.runtime_hours, 3),
                utilization: format_figure(&r.utilization_pct, 1),
                energy: format_figure(&r.energy_kwh, 3),
                co2: format_figure(&r.co2_kg, 3),
                cost: format_figure(&r.cost, 2),
                confidence: color_confidence(r.confidence),
                notes: notes.join(", "),
            }
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
    println!("{}", "* defaulted input; n/a = unavailable".dimmed());
    println!();
}

fn print_totals(report: &AttributionReport) {
    let totals = &report.totals;
    println!("{}", "Fleet Totals".bold());
    println!("{}", "-".repeat(60));
    println!(
        "Cost:                   {}  ({} included, {} skipped)",
        format_currency(totals.cost.total).green().bold(),
        totals.cost.included,
        totals.cost.skipped
    );
    println!(
        "CO2 (kg):               {:.3}  ({} included, {} skipped)",
        totals.co2_kg.total, totals.co2_kg.included, totals.co2_kg.skipped
    );
    println!("Energy (kWh):           {:.3}", totals.energy_kwh.total);
    println!("Runtime (h):            {:.3}", totals.runtime_hours.total);
    if report.coverage.is_partial() {
        print_warning("Coverage is partial; see notes and source health below");
    }
    println!();
}

fn print_validation(validation: &ValidationFactor) {
    println!("{}", "Ledger Validation".bold());
    println!("{}", "-".repeat(60));
    match (validation.ledger_total, validation.factor) {
        (Some(ledger), Some(factor)) => {
            println!("Ledger total:           {}", format_currency(ledger));
            println!("Factor:                 {:.3}", factor);
        }
        _ => print_info("No ledger total available for comparison"),
    }
    if validation.estimates_excluded > 0 {
        print_info(&format!(
            "{} allocated costs left out of the comparison",
            validation.estimates_excluded
        ));
    }
    println!(
        "Bucket:                 {}",
        color_status(validation.bucket.as_str())
    );
    println!();
}

fn print_scenarios(scenarios: &[Scenario]) {
    if scenarios.is_empty() {
        return;
    }

    let rows: Vec<ScenarioRow> = scenarios
        .iter()
        .map(|s| ScenarioRow {
            name: s.name.clone(),
            pct: format!("{:.2}", s.cost_savings_pct),
            band: format!("{:.2}-{:.2}", s.uncertainty_low_pct, s.uncertainty_high_pct),
            cost: format_currency(s.cost_savings),
            co2: format!("{:.3}", s.co2_savings_kg),
            status: color_status(&label(&s.status)),
            methodology: s.methodology.clone(),
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
    if scenarios.iter().any(|s| s.statistically_unreliable) {
        print_warning("Fleet is below the size threshold; percentages are statistically unreliable");
    }
    println!();
}

fn print_health(report: &AttributionReport) {
    let rows: Vec<HealthRow> = report
        .source_health
        .iter()
        .map(|(category, health)| HealthRow {
            category: category.to_string(),
            status: color_source_status(health.status),
            available: health.available,
            stale: health.stale,
            unavailable: health.unavailable,
            gaps: health.insufficient_coverage,
            message: health.message.clone().unwrap_or_default(),
        })
        .collect();

    println!("{}", "Source Health".bold());
    println!("{}", Table::new(rows).with(Style::rounded()));
}

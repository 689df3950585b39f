//! Output formatting utilities

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use optimizer_lib::{ExecutionResult, RunReport, RunSummary};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Row for the per-resource results table
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Savings/mo")]
    savings: String,
    #[tabled(rename = "Success")]
    success: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&ExecutionResult> for ResultRow {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            resource: result.resource_name.clone(),
            current: result.current.clone(),
            target: result.target.clone().unwrap_or_else(|| "-".to_string()),
            action: color_action(result.outcome.label()),
            savings: format_currency(result.estimated_savings),
            success: if result.success() {
                "yes".green().to_string()
            } else {
                "no".red().to_string()
            },
            message: result.message(),
        }
    }
}

/// Print the run report in the requested format
pub fn print_report(report: &RunReport, simulate: bool, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            if report.results.is_empty() {
                print_warning(&format!("No {} resources found in scope", report.kind));
            } else {
                let rows: Vec<ResultRow> = report.results.iter().map(ResultRow::from).collect();
                let table = Table::new(rows).with(Style::rounded()).to_string();
                println!("{}", table);
            }
            print_summary(&report.summary);
            if simulate {
                print_info("Simulate mode: no resources were changed");
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "Run Summary".bold());
    println!("  Processed:          {}", summary.processed);
    if summary.failed > 0 {
        println!("  Failed:             {}", summary.failed.to_string().red());
    } else {
        println!("  Failed:             0");
    }
    println!(
        "  Identified savings: {}/month",
        format_currency(summary.identified_savings)
    );
    println!(
        "  Applied savings:    {}/month",
        format_currency(summary.applied_savings).green()
    );
    if !summary.outcomes.is_empty() {
        let outcomes: Vec<String> = summary
            .outcomes
            .iter()
            .map(|(label, count)| format!("{}={}", label, count))
            .collect();
        println!("  Outcomes:           {}", outcomes.join(", "));
    }
    println!("  Duration:           {}ms", summary.duration_ms);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format USD amounts
pub fn format_currency(amount: f64) -> String {
    if amount < 0.0 {
        format!("-${:.2}", -amount)
    } else {
        format!("${:.2}", amount)
    }
}

/// Color an outcome label
pub fn color_action(label: &str) -> String {
    match label {
        "Resized" | "Tiered" => label.green().to_string(),
        "Simulated" => label.cyan().to_string(),
        "ApprovalRequired" | "ManualActionRequired" => label.yellow().to_string(),
        "Error" => label.red().to_string(),
        _ => label.to_string(),
    }
}

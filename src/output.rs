use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

use crate::error::Result;
use crate::migration::{MigrationSummary, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
    Minimal,
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub fn print_summary(summary: &MigrationSummary, format: Format) -> Result<()> {
    match format {
        Format::Json => print_json(summary)?,
        Format::Pretty => {
            match summary.outcome {
                Outcome::Migrated => println!(
                    "{} project {} v{} -> v{}",
                    "migrated".green().bold(),
                    summary.project_id,
                    summary.from,
                    summary.to
                ),
                Outcome::Pruned => println!(
                    "{} empty project {} (was v{})",
                    "deleted".yellow().bold(),
                    summary.project_id,
                    summary.from
                ),
            }
            for step in &summary.steps {
                println!(
                    "  v{} -> v{}  backup: {}",
                    step.from,
                    step.to,
                    step.backup.display()
                );
            }
        }
        Format::Minimal => println!(
            "{} {} {} {}",
            summary.project_id,
            outcome_label(summary.outcome),
            summary.from,
            summary.to
        ),
    }
    Ok(())
}

pub fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Migrated => "migrated",
        Outcome::Pruned => "pruned",
    }
}

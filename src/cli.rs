//! `<group>:<operation>` commands and their handlers.

use crate::config::Config;
use crate::forks::{self, ForkReport, ForkReportOptions};
use crate::migrate::{self, EnvironmentMigrator, MigrationSummary};
use crate::report::{self, ReportFormat};
use crate::snapshot;
use crate::store::Store;
use anyhow::Context;
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("expected <group>:<operation>, got '{0}'")]
    Malformed(String),

    #[error("unknown command group '{0}'")]
    UnknownGroup(String),

    #[error("unknown operation '{operation}' in group '{group}'")]
    UnknownOperation { group: String, operation: String },

    #[error("{command} takes {expected} argument(s), got {got}")]
    WrongArity {
        command: &'static str,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ExerciseForks,
    RuntimePipelines { old: String, new: String },
    RuntimeMigrate { old: String, new: String },
}

fn arity(command: &'static str, args: &[String], expected: usize) -> Result<(), CommandError> {
    if args.len() != expected {
        return Err(CommandError::WrongArity {
            command,
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

impl Command {
    pub fn parse(name: &str, args: &[String]) -> Result<Self, CommandError> {
        let Some((group, operation)) = name.split_once(':') else {
            return Err(CommandError::Malformed(name.to_string()));
        };
        let unknown_op = || CommandError::UnknownOperation {
            group: group.to_string(),
            operation: operation.to_string(),
        };
        match group {
            "exercises" => match operation {
                "forks" => {
                    arity("exercises:forks", args, 0)?;
                    Ok(Command::ExerciseForks)
                }
                _ => Err(unknown_op()),
            },
            "runtimes" => {
                let pair = |command: &'static str| -> Result<(String, String), CommandError> {
                    arity(command, args, 2)?;
                    Ok((args[0].clone(), args[1].clone()))
                };
                match operation {
                    "pipelines" => {
                        let (old, new) = pair("runtimes:pipelines")?;
                        Ok(Command::RuntimePipelines { old, new })
                    }
                    "migrate" => {
                        let (old, new) = pair("runtimes:migrate")?;
                        Ok(Command::RuntimeMigrate { old, new })
                    }
                    _ => Err(unknown_op()),
                }
            }
            _ => Err(CommandError::UnknownGroup(group.to_string())),
        }
    }
}

/// Runs a parsed command. Reports go to `out`, diagnostics to `err`.
pub fn execute<W: Write, E: Write>(
    command: &Command,
    store: &mut Store,
    config: &Config,
    format: ReportFormat,
    out: &mut W,
    err: &mut E,
) -> anyhow::Result<()> {
    match command {
        Command::ExerciseForks => exercise_forks(store, config, format, out, err),
        Command::RuntimePipelines { old, new } => runtime_pipelines(store, old, new, format, out),
        Command::RuntimeMigrate { old, new } => runtime_migrate(store, config, old, new, format, out, err),
    }
}

fn exercise_forks<W: Write, E: Write>(
    store: &Store,
    config: &Config,
    format: ReportFormat,
    out: &mut W,
    err: &mut E,
) -> anyhow::Result<()> {
    let options = ForkReportOptions {
        locales: config.locales.clone(),
        link_base_url: config.link_base_url.clone(),
    };
    let report = forks::detect(store.conn(), &options).context("fork detection failed")?;
    for d in &report.diagnostics {
        writeln!(err, "{}", d)?;
    }
    match format {
        ReportFormat::Csv => {
            let rows: Vec<Vec<String>> = report.candidates.iter().map(|c| c.cells()).collect();
            report::write_csv(out, &ForkReport::header(&options.locales), &rows)?;
        }
        ReportFormat::Json => {
            let rows: Vec<serde_json::Value> = report
                .candidates
                .iter()
                .map(|c| c.to_json(&options.locales))
                .collect();
            report::write_json_lines(out, &rows)?;
        }
    }
    Ok(())
}

fn runtime_pipelines<W: Write>(
    store: &Store,
    old: &str,
    new: &str,
    format: ReportFormat,
    out: &mut W,
) -> anyhow::Result<()> {
    let plan = migrate::plan_migration(store.conn(), old, new)?;
    match format {
        ReportFormat::Csv => {
            let header: Vec<String> = ["old_id", "old_name", "new_id", "new_name"]
                .iter()
                .map(|s| s.to_string())
                .collect();
            let rows: Vec<Vec<String>> = plan
                .named
                .iter()
                .map(|p| {
                    vec![
                        p.old_id.clone(),
                        p.old_name.clone(),
                        p.new_id.clone(),
                        p.new_name.clone(),
                    ]
                })
                .collect();
            report::write_csv(out, &header, &rows)?;
        }
        ReportFormat::Json => report::write_json_lines(out, &plan.named)?,
    }
    Ok(())
}

fn runtime_migrate<W: Write, E: Write>(
    store: &mut Store,
    config: &Config,
    old: &str,
    new: &str,
    format: ReportFormat,
    out: &mut W,
    err: &mut E,
) -> anyhow::Result<()> {
    let db_path = store.path().map(|p| p.to_path_buf());
    let mut migrator = EnvironmentMigrator::new(store);
    let plan = migrator.plan(old, new)?;

    if let (Some(dir), Some(db_path)) = (config.snapshot_dir.as_deref(), db_path.as_deref()) {
        let snap = snapshot::write_snapshot(db_path, dir, migrator.run_id())
            .context("failed to snapshot the store before migrating")?;
        writeln!(err, "snapshot: {}", snap.path.to_string_lossy())?;
    }

    let summary = migrator.execute(&plan)?;
    for d in &summary.diagnostics {
        writeln!(err, "{}", d)?;
    }
    match format {
        ReportFormat::Csv => write_migration_text(out, &summary)?,
        ReportFormat::Json => report::write_json_lines(out, std::slice::from_ref(&summary))?,
    }
    Ok(())
}

fn write_migration_text<W: Write>(out: &mut W, summary: &MigrationSummary) -> std::io::Result<()> {
    writeln!(
        out,
        "Migration {} ({} -> {})",
        summary.run_id, summary.old_env, summary.new_env
    )?;
    for p in &summary.pipelines {
        writeln!(out, "  {} -> {}", p.old_name, p.new_name)?;
    }
    for t in &summary.tables {
        writeln!(out, "{}: {} rows", t.table, t.rows)?;
    }
    writeln!(
        out,
        "exercise_config: {} documents rewritten, {} skipped",
        summary.documents_rewritten,
        summary.diagnostics.len()
    )?;
    out.flush()
}

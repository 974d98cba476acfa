//! NextStat template CLI

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use ns_templates::{Severity, ValidationReport};
use std::path::{Path, PathBuf};

mod job;

#[derive(Parser)]
#[command(name = "nextstat-templates")]
#[command(about = "NextStat - Systematic template building and validation")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build templates for every sample of a job
    Build {
        /// Input job (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto). Use 1 for deterministic parity.
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Sanitize and validate the inputs of a job without building templates
    Validate {
        /// Input job (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for the report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Build { input, output, threads } => cmd_build(&input, output.as_ref(), threads),
        Commands::Validate { input, output } => cmd_validate(&input, output.as_ref()),
    }
}

fn cmd_build(input: &Path, output: Option<&PathBuf>, threads: usize) -> Result<()> {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }

    let job = job::read_job(input)?;
    let mut engine = job.engine(input)?;
    let results = engine.finalize_all();

    let mut records = Vec::new();
    let mut errors = Vec::new();
    for ((region, sample), result) in results {
        match result {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::error!(region = %region, sample = %sample, "{e}");
                errors.push(serde_json::json!({
                    "region": region,
                    "sample": sample,
                    "category": e.category(),
                    "message": e.to_string(),
                }));
            }
        }
    }

    let n_samples = records.len();
    let n_templates: usize = records.iter().map(|r| r.systematics().len()).sum();
    let n_failures: usize = records.iter().map(|r| r.failures().len()).sum();
    tracing::info!(
        samples = n_samples,
        templates = n_templates,
        unit_failures = n_failures,
        "build complete"
    );

    let output_json = serde_json::json!({
        "summary": {
            "samples": n_samples,
            "templates": n_templates,
            "unit_failures": n_failures,
            "sample_errors": errors.len(),
        },
        "samples": records,
        "errors": errors,
    });
    write_json(output, output_json)?;

    if !errors.is_empty() {
        bail!("{} sample(s) failed to build", errors.len());
    }
    Ok(())
}

fn cmd_validate(input: &Path, output: Option<&PathBuf>) -> Result<()> {
    let job = job::read_job(input)?;
    let engine = job.engine(input)?;

    let mut report = ValidationReport::new();
    for (_, sample_report) in engine.check_all() {
        report.merge(sample_report);
    }
    let n_fatal = report.count(Severity::Fatal);

    let output_json = serde_json::json!({
        "ok": n_fatal == 0,
        "fatal": n_fatal,
        "warnings": report.count(Severity::Warning),
        "issues": report.issues(),
    });
    write_json(output, output_json)?;

    if n_fatal > 0 {
        bail!("validation found {n_fatal} fatal issue(s)");
    }
    Ok(())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

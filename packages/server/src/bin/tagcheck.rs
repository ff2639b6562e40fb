//! Command-line validator runner.
//!
//! Runs a single validator or the whole suite against a captured dataset
//! file. Exits 0 only when every validator that ran passed.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tagcheck_core::{
    Dataset, DatasetFileCrawler, EcidScope, EventStatus, EventType, ProgressEvent, RunController,
    RunRequest, ValidationResult, ValidatorRegistry, ValidatorSettings,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tagcheck")]
#[command(about = "Validate captured tracking events")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all registered validators
    List,

    /// Run one validator against a dataset file
    Validate {
        validator_id: String,
        dataset: PathBuf,
        #[command(flatten)]
        settings: SettingsArgs,
        /// Print every violation with its context
        #[arg(long)]
        verbose: bool,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the validator suite against a dataset file
    Suite {
        dataset: PathBuf,
        #[command(flatten)]
        settings: SettingsArgs,
        /// Comma-separated validator ids (default: all default-enabled)
        #[arg(long, value_delimiter = ',')]
        only: Option<Vec<String>>,
        /// Print every violation with its context
        #[arg(long)]
        verbose: bool,
    },
}

#[derive(Args)]
struct SettingsArgs {
    /// Duplicate-detection window in seconds
    #[arg(long, default_value_t = 1.0)]
    window: f64,
    /// Payload size limit in kilobytes
    #[arg(long = "limit-kb", default_value_t = 32.0)]
    limit_kb: f64,
    /// Where to look for ECIDs: post_data or all
    #[arg(long, default_value = "post_data")]
    scope: EcidScope,
}

impl SettingsArgs {
    fn registry(&self) -> Result<ValidatorRegistry> {
        let settings = ValidatorSettings::default()
            .with_duplicate_window(self.window)
            .with_payload_limit_kb(self.limit_kb)
            .with_ecid_scope(self.scope);
        ValidatorRegistry::with_defaults(&settings).context("Invalid validator settings")
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every executed validator passed.
async fn run(command: Commands) -> Result<bool> {
    match command {
        Commands::List => {
            list()?;
            Ok(true)
        }
        Commands::Validate {
            validator_id,
            dataset,
            settings,
            verbose,
            json,
        } => validate(&validator_id, &dataset, &settings, verbose, json),
        Commands::Suite {
            dataset,
            settings,
            only,
            verbose,
        } => suite(&dataset, &settings, only, verbose).await,
    }
}

fn list() -> Result<()> {
    let registry = ValidatorRegistry::with_defaults(&ValidatorSettings::default())?;
    println!("{}", "Registered validators".bold());
    for descriptor in registry.descriptors() {
        println!(
            "  {:<22} {}",
            descriptor.id.bright_blue(),
            descriptor.description
        );
    }
    Ok(())
}

fn validate(
    validator_id: &str,
    dataset_path: &Path,
    settings: &SettingsArgs,
    verbose: bool,
    json: bool,
) -> Result<bool> {
    let registry = settings.registry()?;
    let validator = registry
        .select(&[validator_id])
        .context("Cannot run validator")?
        .into_iter()
        .next()
        .context("No validator selected")?;

    let dataset = Dataset::from_path(dataset_path).context("Failed to load dataset")?;
    let result = validator
        .validate(&dataset)
        .unwrap_or_else(|e| ValidationResult::execution_fault(validator.id(), e.to_string()));

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(validator.descriptor().name, &result, verbose);
    }
    Ok(result.passed)
}

async fn suite(
    dataset_path: &Path,
    settings: &SettingsArgs,
    only: Option<Vec<String>>,
    verbose: bool,
) -> Result<bool> {
    let registry = Arc::new(settings.registry()?);
    let controller = RunController::new(
        registry.clone(),
        Arc::new(DatasetFileCrawler::new(dataset_path)),
    );

    let mut request = RunRequest::new(format!("file://{}", dataset_path.display()));
    if let Some(ids) = only {
        request = request.with_validators(ids);
    }

    let prepared = controller
        .prepare(request)
        .await
        .context("Cannot start the suite")?;
    let mut events = prepared.bus().subscribe();
    let run = tokio::spawn({
        let controller = controller.clone();
        async move { controller.execute(prepared).await }
    });

    while let Some(event) = events.next().await {
        print_event(&event);
    }

    let summary = run
        .await
        .context("Suite task failed")?
        .context("Suite did not complete")?;

    println!();
    for result in &summary.results {
        let name = registry
            .get(&result.validator_id)
            .map(|v| v.descriptor().name)
            .unwrap_or("Unknown validator");
        print_result(name, result, verbose);
    }

    let line = format!("{}/{} validators passed", summary.passed, summary.total);
    if summary.all_passed() {
        println!("{}", line.bright_green().bold());
    } else {
        println!("{}", line.bright_red().bold());
    }
    Ok(summary.all_passed())
}

fn print_event(event: &ProgressEvent) {
    let marker = match (event.event_type, event.status) {
        (EventType::Error, _) | (_, EventStatus::Failed) => "✗".red(),
        (_, EventStatus::Success) => "✓".green(),
        (_, EventStatus::Running) => "…".yellow(),
        (_, EventStatus::Pending) => "○".dimmed(),
    };
    println!("{} [{}] {}", marker, event.stage.bold(), event.message);
}

fn print_result(name: &str, result: &ValidationResult, verbose: bool) {
    let rule = "=".repeat(70);
    println!("{}", rule);
    println!("{}", name.to_uppercase().bold());
    println!("{}", rule);
    println!("\n{}\n", result.message);

    for (metric, value) in &result.metrics {
        println!("  {:<28} {}", format!("{}:", metric), value);
    }

    let violations = &result.details.violations;
    if !violations.is_empty() {
        println!("\n{} violation(s):", violations.len());
        for (i, violation) in violations.iter().enumerate() {
            let page = violation.page_url.as_deref().unwrap_or("-");
            println!(
                "  [{}] {} {} ({})",
                i + 1,
                violation.kind.yellow(),
                violation.message,
                page
            );
            if verbose && !violation.context.is_null() {
                let context = serde_json::to_string_pretty(&violation.context)
                    .unwrap_or_else(|_| violation.context.to_string());
                for line in context.lines() {
                    println!("      {}", line.dimmed());
                }
            }
        }
    }

    println!();
    if result.passed {
        println!("{}", "VALIDATION: PASSED ✓".bright_green().bold());
    } else {
        println!("{}", "VALIDATION: FAILED ✗".bright_red().bold());
    }
    println!("{}\n", rule);
}

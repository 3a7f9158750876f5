use clap::{Parser, Subcommand};
use harness::{
    load_scenarios, AppConfig, BatchSummary, ConfigOverrides, HttpRespondent, LogSink,
    OutcomeReport, ScenarioAgent, ScenarioOutcome, ScenarioSpec, Scheduler,
};
use model::ProviderKind;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "Scenario-driven evaluation of conversational assistants")]
struct Cli {
    /// Reasoning backend (openai, gemini, cohere, ollama)
    #[arg(long, global = true)]
    provider: Option<ProviderKind>,
    /// Backend model identifier
    #[arg(long, global = true)]
    model: Option<String>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a single scenario
    Run {
        /// What the simulated user wants to get done
        #[arg(short, long)]
        scenario: String,
        /// What success looks like
        #[arg(short, long)]
        expected: String,
        /// Respondent project identifier
        #[arg(short, long)]
        project: String,
        /// Turn budget for this run
        #[arg(long)]
        max_turns: Option<u32>,
    },
    /// Evaluate every scenario in a TOML or JSON file
    Batch {
        /// Scenario file
        #[arg(short, long)]
        file: PathBuf,
        /// Respondent project identifier
        #[arg(short, long)]
        project: String,
        /// Scenario runs allowed in flight at once
        #[arg(long)]
        concurrency: Option<usize>,
        /// Default turn budget for scenarios without their own
        #[arg(long)]
        max_turns: Option<u32>,
    },
    /// Validate configuration and show the selected backend
    Check,
}

#[derive(Serialize)]
struct BatchOutput {
    summary: BatchSummary,
    results: Vec<OutcomeReport>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut overrides = ConfigOverrides {
        provider: cli.provider,
        model: cli.model.clone(),
        ..ConfigOverrides::default()
    };
    if let Commands::Batch {
        concurrency,
        max_turns,
        ..
    } = &cli.command
    {
        overrides.concurrency = *concurrency;
        overrides.max_turns = *max_turns;
    }

    let config = AppConfig::from_env(&overrides)?;

    match cli.command {
        Commands::Check => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            info!(
                provider = %config.provider.kind,
                model = %config.provider.model,
                credentials = config.respondent.client_id.is_some()
                    && config.respondent.client_secret.is_some(),
                "configuration is valid"
            );
        }
        Commands::Run {
            scenario,
            expected,
            project,
            max_turns,
        } => {
            let agent = build_agent(&config)?;
            let spec = ScenarioSpec::new(
                "scenario-1",
                scenario,
                expected,
                max_turns.unwrap_or(config.scheduler.default_turn_budget),
                project,
            );
            spec.validate()?;

            let outcome = match agent.run(&spec).await {
                Ok(run) => ScenarioOutcome::Completed(run),
                Err(failure) => ScenarioOutcome::Failed(failure),
            };
            println!("{}", serde_json::to_string_pretty(&outcome.report())?);
            if let ScenarioOutcome::Failed(failure) = outcome {
                error!("{}", failure);
                return Err(failure.into());
            }
        }
        Commands::Batch { file, project, .. } => {
            let specs = load_scenarios(&file, &project, config.scheduler.default_turn_budget)?;
            let agent = build_agent(&config)?;
            let scheduler = Scheduler::new(agent, config.scheduler.clone());

            let cancel = scheduler.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, finishing in-flight scenarios");
                    cancel.cancel();
                }
            });

            let outcomes = scheduler.run_specs(specs).await?;
            let output = BatchOutput {
                summary: BatchSummary::from_outcomes(&outcomes),
                results: outcomes.iter().map(ScenarioOutcome::report).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_agent(config: &AppConfig) -> Result<Arc<ScenarioAgent>, Box<dyn std::error::Error>> {
    let generator = model::provider_from_config(config.provider.clone())?;
    let respondent = Arc::new(HttpRespondent::new(config.respondent.clone())?);
    Ok(Arc::new(ScenarioAgent::new(
        generator,
        respondent,
        Arc::new(LogSink),
    )))
}

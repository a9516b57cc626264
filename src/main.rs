//! Player CLI - evaluate expressions, resolve and validate flow views

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;

use player_core::config::ENV_LOG;
use player_core::{
    BindingLike, BindingParser, DataController, DataModelOptions, ExpressionEvaluator, FixSuggestion, FlowDocument,
    FlowSession, PlayerConfig, PlayerError,
};

#[derive(Parser)]
#[command(name = "player")]
#[command(about = "Player - data-driven view resolution engine")]
#[command(version)]
struct Cli {
    /// Engine config (YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an expression against some data
    Eval {
        /// Expression, e.g. "{{count}} + 1"
        expression: String,

        /// JSON or YAML data file
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Allow `await` in the expression
        #[arg(long = "async")]
        is_async: bool,
    },

    /// Resolve a view of a flow
    Resolve {
        /// Flow file (JSON or YAML)
        flow: PathBuf,

        /// View id (defaults to the first view)
        #[arg(long)]
        view: Option<String>,

        /// Data to set before printing, as path=json
        #[arg(long = "set", value_name = "PATH=JSON")]
        sets: Vec<String>,
    },

    /// Run navigation validation on a view of a flow
    Validate {
        /// Flow file (JSON or YAML)
        flow: PathBuf,

        #[arg(long)]
        view: Option<String>,

        #[arg(long = "set", value_name = "PATH=JSON")]
        sets: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match PlayerConfig::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => report(&anyhow::Error::new(e)),
    };
    init_tracing(&config);

    let result = match cli.command {
        Commands::Eval {
            expression,
            data,
            is_async,
        } => eval(&expression, data.as_deref(), is_async, &config).await,
        Commands::Resolve { flow, view, sets } => resolve(&flow, view.as_deref(), &sets, &config),
        Commands::Validate { flow, view, sets } => validate(&flow, view.as_deref(), &sets, &config),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => report(&e),
    }
}

/// `PLAYER_LOG` (already folded into the config) beats `RUST_LOG`, which beats the config file
fn init_tracing(config: &PlayerConfig) {
    let filter = match (std::env::var(ENV_LOG).ok(), std::env::var("RUST_LOG").ok()) {
        (None, Some(rust_log)) => rust_log,
        _ => config.log_filter.clone(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn report(e: &anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Error:".red().bold(), e);
    if let Some(suggestion) = e.downcast_ref::<PlayerError>().and_then(|p| p.fix_suggestion()) {
        eprintln!("  {} {}", "Fix:".yellow(), suggestion);
    }
    std::process::exit(1);
}

fn read_value(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(_) => serde_yaml::from_str(&content).map_err(PlayerError::from)?,
    };
    Ok(value)
}

fn load_flow(path: &Path) -> anyhow::Result<FlowDocument> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(FlowDocument::parse(&content)?)
}

/// `path=json`; values that are not JSON are taken as strings
fn parse_set(raw: &str) -> anyhow::Result<(BindingLike, Value)> {
    let Some((path, value)) = raw.split_once('=') else {
        bail!("--set expects PATH=JSON, got '{raw}'");
    };
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((path.trim().into(), value))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

async fn eval(expression: &str, data: Option<&Path>, is_async: bool, config: &PlayerConfig) -> anyhow::Result<bool> {
    let initial = match data {
        Some(path) => read_value(path)?,
        None => Value::Object(Default::default()),
    };

    let controller = DataController::new(initial, Arc::new(BindingParser::new()), Vec::new());
    let evaluator = ExpressionEvaluator::new(controller.clone());
    controller.set_evaluator(&evaluator);

    let mut options = evaluator.default_options();
    options.throw_errors = true;
    options.strict = config.strict_expressions;

    let result = if is_async {
        evaluator.evaluate_async(expression, options).await?
    } else {
        let eval = evaluator.evaluate_with(expression, options)?;
        if eval.is_pending() {
            println!("{} expression is pending; waiting for it", "→".cyan());
        }
        eval.resolve().await?
    };

    println!("{}", "Result:".cyan().bold());
    println!("{}", pretty(&result));
    println!("{}", "Data:".cyan().bold());
    println!("{}", pretty(&controller.serialize()?));

    Ok(true)
}

fn start_session(
    flow: &Path,
    view: Option<&str>,
    sets: &[String],
    config: &PlayerConfig,
) -> anyhow::Result<FlowSession> {
    let document = load_flow(flow)?;
    let session = FlowSession::new(document, config)?;
    session.start(view)?;

    if !sets.is_empty() {
        let transaction = sets.iter().map(|s| parse_set(s)).collect::<anyhow::Result<Vec<_>>>()?;
        session.set(transaction, &DataModelOptions::default())?;
    }

    Ok(session)
}

fn resolve(flow: &Path, view: Option<&str>, sets: &[String], config: &PlayerConfig) -> anyhow::Result<bool> {
    let session = start_session(flow, view, sets, config)?;
    let resolved = session
        .current_view()
        .and_then(|v| v.last_update())
        .unwrap_or(Value::Null);

    println!("{}", pretty(&resolved));
    Ok(true)
}

fn validate(flow: &Path, view: Option<&str>, sets: &[String], config: &PlayerConfig) -> anyhow::Result<bool> {
    let session = start_session(flow, view, sets, config)?;
    let result = session.attempt_transition()?;

    let Some(validations) = result.validations else {
        println!("{} View can transition", "✓".green());
        return Ok(true);
    };

    println!("{} Navigation blocked by {} validation(s)", "✗".red(), validations.len());
    let mut entries: Vec<_> = validations.into_iter().collect();
    entries.sort_by(|a, b| a.0.as_string().cmp(b.0.as_string()));
    for (binding, response) in entries {
        println!(
            "  {} {} [{}] {}",
            binding.to_string().yellow(),
            response.validator.dimmed(),
            format!("{:?}", response.severity).to_lowercase(),
            response.message
        );
    }

    Ok(false)
}

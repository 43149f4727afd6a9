use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use statewalk_core::{
    AppGraph, CancelFlag, Engine, EngineConfig, History, ModelReport, Outcome, StopReason, to_dot,
};
use statewalk_scanner::{FormFiller, HttpNavigator};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
    Dot,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "dot" | "graphviz" => Ok(ReportFormat::Dot),
            _ => Err(format!("Invalid report format: {}", s)),
        }
    }
}

pub fn print_banner() {
    println!(
        "{}",
        r#"
     _        _                      _ _
 ___| |_ __ _| |_ _____      ____ _| | | __
/ __| __/ _` | __/ _ \ \ /\ / / _` | | |/ /
\__ \ || (_| | ||  __/\ V  V / (_| | |   <
|___/\__\__,_|\__\___| \_/\_/ \__,_|_|_|\_\
"#
        .bright_cyan()
        .bold()
    );
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

/// Split a `NAME=VALUE` form parameter. The value may be empty.
pub fn parse_named_param(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected NAME=VALUE, got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("Parameter name is empty in '{}'", raw);
    }
    Ok((name.to_string(), value.to_string()))
}

/// Read an engine configuration file. Missing keys keep their defaults.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
    let content = fs::read_to_string(&expanded)
        .with_context(|| format!("Failed to read config file {}", expanded))?;
    EngineConfig::from_json(&content)
        .with_context(|| format!("Invalid config file {}", expanded))
}

/// Configuration file first, then command line overrides.
pub fn build_engine_config(args: &ArgMatches) -> Result<EngineConfig> {
    let mut config = load_config(args.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    if let Some(max) = args.get_one::<usize>("max-steps") {
        config = config.with_max_observations(*max);
    }
    if let Some(seed) = args.get_one::<u64>("seed") {
        config = config.with_seed(*seed);
    }
    Ok(config)
}

pub fn build_form_filler(seed: u64, params: &[(String, String)]) -> FormFiller {
    let mut filler = FormFiller::with_seed(seed);
    for (name, value) in params {
        filler.add_named_param(name, &[value.as_str()]);
    }
    filler
}

pub fn render_report(
    entry: &str,
    graph: Option<&AppGraph>,
    history: &History,
    outcome: Option<Outcome>,
    format: ReportFormat,
) -> Result<String> {
    let mut report = ModelReport::new(entry, graph, history);
    if let Some(outcome) = outcome {
        report = report.with_outcome(outcome);
    }
    match format {
        ReportFormat::Text => Ok(report.render_text()),
        ReportFormat::Json => Ok(report.to_json()?),
        ReportFormat::Dot => match graph {
            Some(graph) => Ok(to_dot(graph, history)),
            None => Ok("digraph {\n}\n".to_string()),
        },
    }
}

/// Write to `path` when given, otherwise print to stdout.
pub fn write_output(content: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
            fs::write(&expanded, content)
                .with_context(|| format!("Failed to write report to {}", expanded))?;
            println!("{} Report saved to {}", "✓".green().bold(), expanded.bright_white());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn print_summary(outcome: &Outcome) {
    print_divider();
    let status = match outcome.reason {
        StopReason::Completed => "COMPLETED".green().bold(),
        StopReason::Cancelled => "CANCELLED".yellow().bold(),
        StopReason::BudgetExhausted => "BUDGET EXHAUSTED".yellow().bold(),
    };
    println!("  {} {}", "Exploration".bright_white().bold(), status);
    print_divider();
    println!("  {} {}", "Observations:".bright_white(), outcome.observations);
    println!("  {} {}", "States:      ".bright_white(), outcome.states);
    println!("  {} {}", "Pages:       ".bright_white(), outcome.pages);
    println!("  {} {}", "Requests:    ".bright_white(), outcome.requests);
    println!(
        "  {} {} restarts, {} rebuilds",
        "Effort:      ".bright_white(),
        outcome.restarts,
        outcome.rebuilds
    );
    println!();
}

pub async fn handle_explore(args: &ArgMatches, quiet: bool) -> Result<()> {
    let url = args
        .get_one::<Url>("url")
        .ok_or_else(|| anyhow!("--url is required"))?;
    let timeout = args.get_one::<u64>("timeout").copied().unwrap_or(10);
    let format = args
        .get_one::<String>("format")
        .map(|f| ReportFormat::from_str(f))
        .transpose()
        .map_err(|e| anyhow!(e))?
        .unwrap_or(ReportFormat::Text);
    let output = args.get_one::<PathBuf>("output");

    let config = build_engine_config(args)?;
    let params = args
        .get_many::<String>("param")
        .map(|values| values.map(|v| parse_named_param(v)).collect::<Result<Vec<_>>>())
        .transpose()?
        .unwrap_or_default();
    let forms = build_form_filler(config.seed, &params);
    let navigator = HttpNavigator::with_timeout(timeout)?;

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current step");
            on_signal.cancel();
        }
    });

    let spinner = ProgressBar::new_spinner();
    if quiet {
        spinner.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Exploring {}", url));

    let mut engine = Engine::new(navigator, forms, config).with_cancel_flag(cancel);
    let result = engine.run(url.as_str()).await;
    spinner.finish_and_clear();

    let outcome = result.context("Exploration failed")?;
    info!("Exploration of {} stopped: {:?}", url, outcome.reason);
    if !quiet {
        print_summary(&outcome);
    }

    let rendered = render_report(
        url.as_str(),
        engine.graph(),
        engine.history(),
        Some(outcome),
        format,
    )?;
    write_output(&rendered, output.map(PathBuf::as_path))
}

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::{json, Value};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sweep_runner::{
    BarProgress, JsonlSink, ProcessLauncher, RunnerCommand, SweepConfig, SweepError, SweepPlan,
    SweepRunner,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "sweep",
    version,
    about = "Runs a learning benchmark across a parameter sweep"
)]
struct Cli {
    /// Which learning algorithm to use: LSTAR / KV / TTT (the runner also
    /// accepts LSHARP; other names are passed through unchecked)
    algorithm: String,
    /// YAML sweep configuration; built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSONL output file, `-` for stdout
    #[arg(long)]
    out: Option<PathBuf>,
    /// Runner invocations per sweep point
    #[arg(long)]
    repeats: Option<usize>,
    /// Kill a runner invocation that takes longer than this
    #[arg(long)]
    timeout_seconds: Option<u64>,
    /// Directory searched for target models, replacing any configured list
    #[arg(long)]
    targets_dir: Option<PathBuf>,
    /// Runner artifact passed to `-jar`
    #[arg(long)]
    runner: Option<PathBuf>,
    /// Runtime executable that launches the runner
    #[arg(long)]
    runtime: Option<PathBuf>,
    /// Print the sweep plan without launching anything
    #[arg(long)]
    dry_run: bool,
    /// Print a JSON summary (or JSON error) on stdout instead of text
    #[arg(long)]
    json: bool,
    /// Log each runner invocation
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let json_mode = cli.json;
    match run_command(cli) {
        Ok(payload) => {
            if json_mode {
                emit_json(&payload);
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                let (code, details) = error_details(&err);
                emit_json(&json_error(code, format!("{:#}", err), details));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

fn run_command(cli: Cli) -> Result<Value> {
    let config = resolve_config(&cli)?;
    let plan = SweepPlan::from_config(&config).context("failed to build sweep plan")?;

    if cli.dry_run {
        let payload = plan_to_json(&config, &plan, &cli.algorithm);
        if !cli.json {
            print_plan(&payload);
        }
        return Ok(payload);
    }

    let out_path = resolve_out_path(&cli)?;
    let writer = open_output(&out_path)?;
    let mut sink = JsonlSink::new(writer);
    let launcher = ProcessLauncher::new(config.timeout_seconds.map(Duration::from_secs));
    let progress = BarProgress::new(!cli.json);
    let mut runner = SweepRunner::new(&config, &cli.algorithm, launcher, progress);
    let summary = runner.run_sweep(&plan, &mut sink)?;

    let payload = json!({
        "ok": true,
        "algorithm": cli.algorithm,
        "points": summary.points,
        "invocations": summary.invocations,
        "records": sink.written(),
        "out": out_path.display().to_string(),
    });
    if !cli.json && !is_stdout(&out_path) {
        println!("points: {}", summary.points);
        println!("invocations: {}", summary.invocations);
        println!("out: {}", out_path.display());
    }
    Ok(payload)
}

fn resolve_config(cli: &Cli) -> Result<SweepConfig> {
    let mut config = match &cli.config {
        Some(path) => SweepConfig::load(path)?,
        None => SweepConfig::default(),
    };
    if let Some(repeats) = cli.repeats {
        config.repeats = repeats;
    }
    if let Some(seconds) = cli.timeout_seconds {
        config.timeout_seconds = Some(seconds);
    }
    if let Some(dir) = &cli.targets_dir {
        config.targets_directory = dir.clone();
        config.targets.clear();
    }
    if let Some(runner) = &cli.runner {
        config.runner_artifact_path = runner.clone();
    }
    if let Some(runtime) = &cli.runtime {
        config.runtime_executable_path = runtime.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Records and the `--json` summary cannot share stdout.
fn resolve_out_path(cli: &Cli) -> Result<PathBuf> {
    let out_path = cli
        .out
        .clone()
        .unwrap_or_else(|| default_out_path(&cli.algorithm));
    if cli.json && is_stdout(&out_path) {
        anyhow::bail!(
            "--json cannot be combined with --out -: records and summary would share stdout"
        );
    }
    Ok(out_path)
}

fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if is_stdout(path) {
        return Ok(Box::new(io::stdout()));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let file = fs::File::create(path)
        .with_context(|| format!("failed to create output {}", path.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}

fn default_out_path(algorithm: &str) -> PathBuf {
    let slug: String = algorithm
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    PathBuf::from("results").join(format!(
        "sweep_{}_{}.jsonl",
        slug,
        Utc::now().format("%Y%m%d_%H%M%S")
    ))
}

fn plan_to_json(config: &SweepConfig, plan: &SweepPlan, algorithm: &str) -> Value {
    let points = plan.point_count();
    let first_command = plan
        .points()
        .next()
        .map(|p| RunnerCommand::build(config, algorithm, &p, config.base_seed).render());
    json!({
        "ok": true,
        "dry_run": true,
        "algorithm": algorithm,
        "frameworks": plan.frameworks,
        "noise_kinds": plan.noise_kinds,
        "noise_levels": plan.noise_levels,
        "size_bounds": plan.size_bounds.len(),
        "targets": plan.targets.len(),
        "points": points,
        "repeats": config.repeats,
        "invocations": points as u64 * config.repeats as u64,
        "first_command": first_command,
    })
}

fn print_plan(payload: &Value) {
    for key in [
        "algorithm",
        "frameworks",
        "noise_kinds",
        "noise_levels",
        "size_bounds",
        "targets",
        "points",
        "repeats",
        "invocations",
    ] {
        println!("{}: {}", key, payload[key]);
    }
    if let Some(cmd) = payload["first_command"].as_str() {
        println!("first_command: {}", cmd);
    }
}

fn error_details(err: &anyhow::Error) -> (&'static str, Value) {
    match err.downcast_ref::<SweepError>() {
        Some(
            sweep_err @ SweepError::PointFailed {
                point,
                repeat,
                repeats,
                ..
            },
        ) => (
            sweep_err.code(),
            json!({ "point": point, "repeat": repeat, "repeats": repeats }),
        ),
        Some(other) => (other.code(), json!({})),
        None => ("command_failed", json!({})),
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

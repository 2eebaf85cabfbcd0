use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use dialflow::{
    compiler::{Compiler, HoursMode},
    deploy::{build_flow, undeploy_flow, write_dialplan},
    error::FlowError,
    loader::load_flow_from_path,
    model::QueueMap,
    platform::{AsteriskCli, PlatformClient},
    settings::Settings,
    synth::{cleanup_cache, synthesizer_for},
    validate::validate,
};

#[derive(Parser, Debug)]
#[command(
    name = "dialflow",
    about = "IVR flow validation, compilation, and deployment"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate flow documents.
    Validate(ValidateArgs),
    /// Compile a flow to dialplan text without touching the system.
    Compile(CompileArgs),
    /// Build and deploy a flow against a live platform.
    Deploy(DeployArgs),
    /// Remove a deployed flow's dialplan and reload the engine.
    Undeploy(UndeployArgs),
    /// Evict stale synthesis cache entries.
    Cleanup(CleanupArgs),
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Flow documents, or directories containing them.
    #[arg(required = true)]
    targets: Vec<PathBuf>,
    /// Emit a machine-readable JSON report.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct CompileArgs {
    /// Path to the flow document.
    #[arg(long = "flow")]
    flow_path: PathBuf,
    /// Write the dialplan here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
    /// JSON file holding a queue map (queue name to attributes).
    #[arg(long)]
    queues: Option<PathBuf>,
    /// How business-hours gating is emitted.
    #[arg(long = "hours-mode", value_enum, default_value_t = HoursModeArg::PerCall)]
    hours_mode: HoursModeArg,
    /// Pin the embedded generation timestamp (RFC 3339) for reproducible
    /// output.
    #[arg(long = "generated-at")]
    generated_at: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
struct DeployArgs {
    /// Path to the flow document.
    #[arg(long = "flow")]
    flow_path: PathBuf,
    /// Telephony platform hostname.
    #[arg(long)]
    host: String,
    /// Platform authentication token.
    #[arg(long)]
    token: String,
    /// Accept self-signed TLS certificates.
    #[arg(long)]
    insecure: bool,
}

#[derive(Args, Debug)]
struct UndeployArgs {
    /// Flow id whose dialplan should be removed.
    #[arg(long = "id")]
    flow_id: String,
}

#[derive(Args, Debug)]
struct CleanupArgs {
    /// Evict cache entries older than this many days.
    #[arg(long = "max-age-days", default_value_t = 30)]
    max_age_days: u64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum HoursModeArg {
    /// Emit time conditions the engine evaluates on every call.
    PerCall,
    /// Bake the open/closed answer in at compile time.
    RenderTime,
}

impl From<HoursModeArg> for HoursMode {
    fn from(arg: HoursModeArg) -> Self {
        match arg {
            HoursModeArg::PerCall => HoursMode::PerCall,
            HoursModeArg::RenderTime => HoursMode::RenderTime,
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate(args) => handle_validate(args),
        Commands::Compile(args) => handle_compile(args),
        Commands::Deploy(args) => handle_deploy(args),
        Commands::Undeploy(args) => handle_undeploy(args),
        Commands::Cleanup(args) => handle_cleanup(args),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dialflow=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Serialize)]
struct ValidationReport {
    failures: usize,
    results: Vec<FileReport>,
}

#[derive(Serialize)]
struct FileReport {
    path: String,
    ok: bool,
    violations: Vec<String>,
}

fn handle_validate(args: ValidateArgs) -> Result<()> {
    let mut results = Vec::new();
    for target in &args.targets {
        for path in collect_flow_documents(target)? {
            results.push(validate_document(&path));
        }
    }
    let failures = results.iter().filter(|r| !r.ok).count();

    if args.json {
        let report = ValidationReport { failures, results };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for result in &results {
            if result.ok {
                println!("{}: OK", result.path);
            } else {
                println!("{}: FAILED", result.path);
                for violation in &result.violations {
                    println!("  - {violation}");
                }
            }
        }
        if failures == 0 {
            println!("All flows valid");
        }
    }

    if failures == 0 {
        Ok(())
    } else {
        Err(anyhow::anyhow!("{failures} flow(s) failed validation"))
    }
}

fn validate_document(path: &Path) -> FileReport {
    match load_flow_from_path(path) {
        Ok(flow) => {
            let violations = validate(&flow);
            FileReport {
                path: path.display().to_string(),
                ok: violations.is_empty(),
                violations,
            }
        }
        Err(err) => FileReport {
            path: path.display().to_string(),
            ok: false,
            violations: vec![err.to_string()],
        },
    }
}

/// A file target is taken as-is; a directory contributes its flow documents
/// one level deep, sorted by name.
fn collect_flow_documents(target: &Path) -> Result<Vec<PathBuf>> {
    if !target.is_dir() {
        return Ok(vec![target.to_path_buf()]);
    }
    let entries = fs::read_dir(target)
        .with_context(|| format!("failed to read directory {}", target.display()))?;
    let mut documents = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let supported = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml" | "yaml" | "json")
        );
        if path.is_file() && supported {
            documents.push(path);
        }
    }
    documents.sort();
    Ok(documents)
}

fn handle_compile(args: CompileArgs) -> Result<()> {
    let flow = load_flow_from_path(&args.flow_path)
        .with_context(|| format!("failed to load {}", args.flow_path.display()))?;
    let violations = validate(&flow);
    if !violations.is_empty() {
        anyhow::bail!(FlowError::Validation {
            id: flow.id.clone(),
            violations,
        });
    }

    let queues = match &args.queues {
        Some(path) => read_queue_map(path)?,
        None => QueueMap::new(),
    };
    let mut compiler = Compiler::new()
        .with_queues(queues)
        .with_hours_mode(args.hours_mode.into());
    if let Some(at) = args.generated_at {
        compiler = compiler.with_generated_at(at);
    }
    let dialplan = compiler.compile_to_string(&flow)?;

    match &args.out {
        Some(out) => {
            write_dialplan(out, &dialplan)?;
            println!("Wrote {}", out.display());
        }
        None => print!("{dialplan}"),
    }
    Ok(())
}

fn read_queue_map(path: &Path) -> Result<QueueMap> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read queue map {}", path.display()))?;
    let queues = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse queue map {}", path.display()))?;
    Ok(queues)
}

fn handle_deploy(args: DeployArgs) -> Result<()> {
    let settings = Settings::from_env();
    let flow = load_flow_from_path(&args.flow_path)
        .with_context(|| format!("failed to load {}", args.flow_path.display()))?;
    let platform = PlatformClient::for_host(&args.host, args.token, args.insecure)?;
    let synthesizer = synthesizer_for(flow.tts_backend);
    let engine = AsteriskCli::new();

    let outcome = build_flow(&flow, &platform, synthesizer.as_ref(), &engine, &settings)?;
    for warning in &outcome.engine_warnings {
        eprintln!("warning: {warning}");
    }
    if outcome.reloaded {
        println!(
            "Deployed flow '{}' ({} prompt files, {})",
            outcome.flow_id,
            outcome.assets_written,
            outcome.dialplan_path.display()
        );
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "engine refused to reload after deploying '{}'",
            outcome.flow_id
        ))
    }
}

fn handle_undeploy(args: UndeployArgs) -> Result<()> {
    let settings = Settings::from_env();
    let engine = AsteriskCli::new();
    if undeploy_flow(&args.flow_id, &engine, &settings)? {
        println!("Undeployed flow '{}'", args.flow_id);
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "engine refused to reload after removing '{}'",
            args.flow_id
        ))
    }
}

fn handle_cleanup(args: CleanupArgs) -> Result<()> {
    let settings = Settings::from_env();
    let removed = cleanup_cache(&settings.cache_dir, args.max_age_days)?;
    println!("Removed {removed} cached file(s)");
    Ok(())
}

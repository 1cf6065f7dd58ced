use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cpl_artifacts::{CheckpointStore, StagePayload};
use cpl_core::{RunId, Script};
use cpl_runner::{Collaborators, Orchestrator, PipelineConfig};
use cpl_validate::{GateEngine, GateParams, DEFAULT_MIN_EVIDENCE, DEFAULT_MIN_STABILITY};

const EXIT_PASS: u8 = 0;
const EXIT_RUNTIME: u8 = 1;
const EXIT_GATES_FAILED: u8 = 2;

#[derive(Parser)]
#[command(name = "cpl", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write .cpl/cpl.toml with defaults
    Init,

    /// Create a run from a script JSON and drive it to DONE
    Start {
        #[arg(long)]
        script: PathBuf,
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Continue a run from its last checkpoint
    Resume {
        #[arg(long)]
        run: String,
    },

    /// Show a run's checkpoint
    Status {
        #[arg(long)]
        run: String,
    },

    /// Evaluate publish gates over <run_dir>/manifest.json
    Validate {
        run_dir: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MIN_EVIDENCE)]
        min_evidence: usize,
        #[arg(long, default_value_t = DEFAULT_MIN_STABILITY)]
        min_stability: f64,
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        require_video: bool,
        #[arg(long)]
        min_output_bytes: Option<u64>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let outcome = std::env::current_dir().map_err(anyhow::Error::from).and_then(|root| run(cli, &root));
    if let Err(e) = &outcome {
        eprintln!("error: {e:#}");
    }
    ExitCode::from(exit_code(&outcome))
}

/// 0 when every gate passed, 2 when a gate failed, 1 on any runtime error.
fn exit_code(outcome: &anyhow::Result<u8>) -> u8 {
    match outcome {
        Ok(code) => *code,
        Err(_) => EXIT_RUNTIME,
    }
}

fn orchestrator(root: &Path) -> anyhow::Result<Orchestrator> {
    let cfg = PipelineConfig::load_or_default(root)?;
    let collab = Collaborators::from_config(&cfg, root);
    Ok(Orchestrator::new(cfg, root, collab))
}

fn run(cli: Cli, root: &Path) -> anyhow::Result<u8> {
    match cli.cmd {
        Command::Init => {
            let path = PipelineConfig::config_path(root);
            if path.exists() {
                println!("Config already present at {}", path.display());
            } else {
                let project_id = root.file_name().and_then(|s| s.to_str()).unwrap_or("project");
                PipelineConfig::default_for(project_id).save_to(&path)?;
                println!("Initialized cpl in {}", root.display());
            }
        }
        Command::Start { script, run_id } => {
            let raw = std::fs::read_to_string(&script).with_context(|| format!("read {}", script.display()))?;
            let parsed: Script = serde_json::from_str(&raw).with_context(|| format!("parse {}", script.display()))?;
            let orch = orchestrator(root)?;
            let run = orch.start(parsed, run_id.map(RunId::from_str))?;
            print_done(&run.id, &run.payload);
        }
        Command::Resume { run } => {
            let orch = orchestrator(root)?;
            let run = orch.resume(&RunId::from_str(run))?;
            print_done(&run.id, &run.payload);
        }
        Command::Status { run } => {
            let cfg = PipelineConfig::load_or_default(root)?;
            let run_dir = cfg.runs_root(root).join(&run);
            let cp = CheckpointStore::new(&run_dir).load()?;
            println!("run {} stage={} updated_at={}", cp.run_id, cp.stage, cp.updated_at);
            if let StagePayload::Synthesize(prepared) = cp.payload()? {
                for item in &prepared.repair.items {
                    println!("  needs repair: {} ({}) over by {:.3}s", item.segment_id, item.kind, item.overage_sec);
                }
            }
        }
        Command::Validate { run_dir, min_evidence, min_stability, require_video, min_output_bytes } => {
            let defaults = GateParams::default();
            let params = GateParams {
                min_evidence,
                min_stability,
                require_video,
                min_output_bytes: min_output_bytes.unwrap_or(defaults.min_output_bytes),
                ..defaults
            };
            return validate(&run_dir, params, &mut std::io::stdout().lock());
        }
    }

    Ok(EXIT_PASS)
}

/// Print the verdict summary and one line per failing gate.
fn validate(run_dir: &Path, params: GateParams, out: &mut impl Write) -> anyhow::Result<u8> {
    let verdict = GateEngine::new(params).validate_run(run_dir)?;
    writeln!(out, "{}", verdict.summary_line())?;
    for gate in verdict.failing() {
        writeln!(out, "  {}: {}", gate.name, gate.detail)?;
    }
    Ok(if verdict.overall_pass { EXIT_PASS } else { EXIT_GATES_FAILED })
}

fn print_done(run_id: &RunId, payload: &StagePayload) {
    match payload {
        StagePayload::Done(report) => {
            let probe = match (report.degraded, report.duration_sec) {
                (false, Some(d)) => format!("{d:.1}s"),
                _ => "size-only".to_string(),
            };
            println!("run {run_id} DONE: {} ({} bytes, probe {probe})", report.output_path, report.size_bytes);
        }
        other => println!("run {run_id} stopped at {}", other.stage()),
    }
}

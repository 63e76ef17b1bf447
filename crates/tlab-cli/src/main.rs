use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tlab_runner::{catalog, config::HarnessConfig, fixtures, verify};

#[derive(Parser)]
#[command(
    name = "tlab",
    version,
    about = "End-to-end test harness for the matrix transpose pipeline"
)]
struct Cli {
    /// Config file (defaults to harness.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate fixtures, run all workers against the server, verify
    Run {
        /// Override the configured worker count
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Generate missing fixture matrices only
    Generate {
        #[arg(long)]
        json: bool,
    },
    /// Verify downloaded matrices from a previous run
    Verify {
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved configuration
    Describe {
        #[arg(long)]
        json: bool,
    },
    /// Write a template harness.yaml into the current directory
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Remove generated fixtures, downloads and logs
    Clean {
        #[arg(long)]
        fixtures: bool,
        #[arg(long)]
        downloads: bool,
        #[arg(long)]
        logs: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string()));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(cli: Cli) -> Result<Option<Value>> {
    let load_cfg = || HarnessConfig::load_or_default(cli.config.as_deref());
    match cli.command {
        Commands::Run { workers, json } => {
            let mut cfg = load_cfg()?;
            if let Some(workers) = workers {
                cfg.workers = workers;
                cfg.validate()?;
            }
            let catalog = catalog::catalog(&cfg.fixtures_dir);
            let result = tlab_runner::run_harness(&cfg, &catalog)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "run_id": result.run_id,
                    "workers": result.workers,
                    "fixtures": result.fixtures,
                    "verified_pairs": result.verified_pairs,
                    "manifest": result.manifest_path.display().to_string(),
                })));
            }
            println!("run_id: {}", result.run_id);
            println!("workers: {}", result.workers);
            println!("fixtures: {}", result.fixtures);
            println!("verified_pairs: {}", result.verified_pairs);
            println!("manifest: {}", result.manifest_path.display());
        }
        Commands::Generate { json } => {
            let cfg = load_cfg()?;
            let catalog = catalog::catalog(&cfg.fixtures_dir);
            fixtures::generate_all(&catalog)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "generate",
                    "fixtures": catalog.len(),
                    "fixtures_dir": cfg.fixtures_dir.display().to_string(),
                })));
            }
            println!("fixtures: {}", catalog.len());
            println!("fixtures_dir: {}", cfg.fixtures_dir.display());
        }
        Commands::Verify { json } => {
            let cfg = load_cfg()?;
            let catalog = catalog::catalog(&cfg.fixtures_dir);
            let summary = verify::verify_all(&cfg.downloads_dir, &catalog)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "verify",
                    "worker_dirs": summary.worker_dirs,
                    "verified_pairs": summary.verified_pairs,
                })));
            }
            println!("worker_dirs: {}", summary.worker_dirs);
            println!("verified_pairs: {}", summary.verified_pairs);
        }
        Commands::Describe { json } => {
            let cfg = load_cfg()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "server": { "command": cfg.server.command, "workdir": cfg.server.workdir.display().to_string() },
                    "client": { "command": cfg.client.command, "workdir": cfg.client.workdir.display().to_string() },
                    "workers": cfg.workers,
                    "fixtures_dir": cfg.fixtures_dir.display().to_string(),
                    "downloads_dir": cfg.downloads_dir.display().to_string(),
                    "results_dir": cfg.results_dir.display().to_string(),
                    "server_log": cfg.server_log.display().to_string(),
                })));
            }
            println!("server: {:?} (in {})", cfg.server.command, cfg.server.workdir.display());
            println!("client: {:?} (in {})", cfg.client.command, cfg.client.workdir.display());
            println!("workers: {}", cfg.workers);
            println!("fixtures_dir: {}", cfg.fixtures_dir.display());
            println!("downloads_dir: {}", cfg.downloads_dir.display());
            println!("results_dir: {}", cfg.results_dir.display());
            println!("server_log: {}", cfg.server_log.display());
        }
        Commands::Init { force } => {
            let path = std::path::Path::new(tlab_runner::config::DEFAULT_CONFIG_FILE);
            if path.exists() && !force {
                anyhow::bail!("config already exists (use --force): {}", path.display());
            }
            let template = "\
server:
  command: [cargo, run, --release]     # must print 'Listening on port ' once ready
  workdir: ../server
client:
  command: [dotnet, run, -c, Release, --no-build]
  workdir: ../client                   # produced result paths resolve here
workers: 4
fixtures_dir: test_matrices
downloads_dir: downloaded_matrices
results_dir: .
server_log: server.log
";
            fs::write(path, template)?;
            println!("wrote: {}", path.display());
            println!("next: tlab describe");
        }
        Commands::Clean {
            fixtures,
            downloads,
            logs,
        } => {
            let cfg = load_cfg()?;
            let all = !fixtures && !downloads && !logs;
            if fixtures || all {
                remove_tree(&cfg.fixtures_dir);
            }
            if downloads || all {
                remove_tree(&cfg.downloads_dir);
            }
            if logs || all {
                remove_timing_logs(&cfg)?;
                if cfg.server_log.exists() {
                    let _ = fs::remove_file(&cfg.server_log);
                    println!("removed: {}", cfg.server_log.display());
                }
            }
        }
    }
    Ok(None)
}

fn remove_tree(path: &std::path::Path) {
    if path.exists() {
        match fs::remove_dir_all(path) {
            Ok(()) => println!("removed: {}", path.display()),
            Err(err) => eprintln!("unable to remove {}: {}", path.display(), err),
        }
    }
}

fn remove_timing_logs(cfg: &HarnessConfig) -> Result<()> {
    if !cfg.results_dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(&cfg.results_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(prefix) = name.strip_suffix("_test_results.csv") {
            if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) {
                let _ = fs::remove_file(entry.path());
                println!("removed: {}", entry.path().display());
            }
        }
    }
    Ok(())
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\"}}}}"
        ),
    }
}

fn json_error(code: &str, message: String) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Generate { json, .. }
        | Commands::Verify { json, .. }
        | Commands::Describe { json, .. } => *json,
        Commands::Init { .. } | Commands::Clean { .. } => false,
    }
}

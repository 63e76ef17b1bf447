use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "harness.yaml";
pub const DEFAULT_WORKERS: usize = 4;

/// External process launched by the harness: the shared server or one
/// client session.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessConfig {
    pub command: Vec<String>,
    pub workdir: PathBuf,
}

impl ProcessConfig {
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("")
    }

    pub fn args(&self) -> &[String] {
        if self.command.is_empty() {
            &[]
        } else {
            &self.command[1..]
        }
    }
}

/// Harness configuration, loaded from a YAML file with full defaults so a
/// missing file yields a runnable config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub server: ProcessConfig,
    pub client: ProcessConfig,
    pub workers: usize,
    pub fixtures_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub results_dir: PathBuf,
    pub server_log: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server: ProcessConfig {
                command: vec!["cargo".into(), "run".into(), "--release".into()],
                workdir: PathBuf::from("../server"),
            },
            client: ProcessConfig {
                command: vec![
                    "dotnet".into(),
                    "run".into(),
                    "-c".into(),
                    "Release".into(),
                    "--no-build".into(),
                ],
                workdir: PathBuf::from("../client"),
            },
            workers: DEFAULT_WORKERS,
            fixtures_dir: PathBuf::from("test_matrices"),
            downloads_dir: PathBuf::from("downloaded_matrices"),
            results_dir: PathBuf::from("."),
            server_log: PathBuf::from("server.log"),
        }
    }
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("unable to read config {}", path.display()))?;
        let cfg: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid config {}", path.display()))?;
        cfg.validate()?;
        cfg.resolved()
    }

    /// Loads the given path, else `harness.yaml` if present, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let fallback = Path::new(DEFAULT_CONFIG_FILE);
        if fallback.exists() {
            return Self::load(fallback);
        }
        Self::default().resolved()
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.workers == 0 {
            problems.push("workers must be at least 1");
        }
        if self.server.command.is_empty() {
            problems.push("server.command must not be empty");
        }
        if self.client.command.is_empty() {
            problems.push("client.command must not be empty");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "invalid harness config:\n{}",
                problems
                    .iter()
                    .map(|p| format!("  - {}", p))
                    .collect::<Vec<_>>()
                    .join("\n")
            ))
        }
    }

    // The protocol requires absolute fixture paths in send_data, so the
    // fixtures dir is anchored to the working directory up front.
    fn resolved(mut self) -> Result<Self> {
        if self.fixtures_dir.is_relative() {
            let cwd = env::current_dir().context("resolving working directory")?;
            self.fixtures_dir = cwd.join(&self.fixtures_dir);
        }
        Ok(self)
    }

    pub fn timing_log_path(&self, worker_index: usize) -> PathBuf {
        self.results_dir
            .join(format!("{}_test_results.csv", worker_index))
    }

    pub fn worker_results_dir(&self, worker_index: usize) -> PathBuf {
        self.downloads_dir.join(worker_index.to_string())
    }
}

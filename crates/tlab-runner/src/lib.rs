//! End-to-end harness for a client-server matrix-transpose pipeline.
//!
//! The server and client are opaque external processes. The harness
//! generates fixture matrices, starts the shared server, drives N
//! concurrent client sessions through an interactive stdin/stdout command
//! protocol, and verifies every downloaded result against the transpose of
//! its source fixture.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

pub mod catalog;
pub mod config;
pub mod fixtures;
pub mod grid;
pub mod report;
pub mod server;
pub mod session;
pub mod verify;
pub mod worker;

pub use catalog::{catalog as fixture_catalog, FixtureDescriptor, MatrixType};
pub use config::{HarnessConfig, ProcessConfig};
pub use server::ServerHandle;
pub use verify::VerifySummary;
pub use worker::WorkerReport;

/// Outcome of one full harness run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub workers: usize,
    pub fixtures: usize,
    pub verified_pairs: usize,
    pub manifest_path: PathBuf,
    pub worker_reports: Vec<WorkerReport>,
}

/// Runs the whole pipeline: generate fixtures, start the server and wait
/// for readiness, run all workers to completion, stop the server, verify
/// every downloaded matrix, and write the run manifest.
pub fn run_harness(cfg: &HarnessConfig, catalog: &[FixtureDescriptor]) -> Result<RunReport> {
    let started_at = Utc::now();
    let run_id = format!("run_{}", started_at.format("%Y%m%d_%H%M%S"));
    info!(
        run_id = %run_id,
        workers = cfg.workers,
        fixtures = catalog.len(),
        "starting harness run"
    );

    fixtures::generate_all(catalog)?;
    report::ensure_dir(&cfg.downloads_dir)?;

    let server = ServerHandle::start(&cfg.server, &cfg.server_log)?;
    // The server must be stopped even when a worker fails, and only after
    // every worker has joined.
    let worker_result = worker::run_workers(cfg, catalog);
    let stop_result = server.stop();
    let worker_reports = worker_result?;
    stop_result?;

    let summary = verify::verify_all(&cfg.downloads_dir, catalog)?;

    let records_per_worker: BTreeMap<String, usize> = worker_reports
        .iter()
        .map(|r| (r.index.to_string(), r.records.len()))
        .collect();
    let manifest = json!({
        "schema_version": "run_manifest_v1",
        "run_id": run_id,
        "started_at": started_at.to_rfc3339(),
        "finished_at": Utc::now().to_rfc3339(),
        "workers": cfg.workers,
        "fixtures": catalog.len(),
        "records_per_worker": records_per_worker,
        "verified_pairs": summary.verified_pairs,
    });
    let manifest_path = report::write_run_manifest(&cfg.downloads_dir, &manifest)?;

    info!(run_id = %run_id, "testing complete");
    Ok(RunReport {
        run_id,
        workers: cfg.workers,
        fixtures: catalog.len(),
        verified_pairs: summary.verified_pairs,
        manifest_path,
        worker_reports,
    })
}

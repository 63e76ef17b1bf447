use anyhow::{anyhow, Context, Result};
use std::fs;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::catalog::{FixtureDescriptor, MatrixType};
use crate::config::HarnessConfig;
use crate::session::{poll_to_completion, ClientSession};

/// One completed (worker, fixture) measurement.
#[derive(Debug, Clone)]
pub struct TimingRecord {
    pub dimension: usize,
    pub mtype: MatrixType,
    pub elapsed: Duration,
}

/// Everything one worker produced over the full catalog.
#[derive(Debug)]
pub struct WorkerReport {
    pub index: usize,
    pub records: Vec<TimingRecord>,
}

/// Runs the configured number of workers fully in parallel against the
/// shared server, one OS thread each with a pre-assigned index. Returns
/// after every worker has joined; the first failure wins but never
/// preempts the others.
pub fn run_workers(cfg: &HarnessConfig, catalog: &[FixtureDescriptor]) -> Result<Vec<WorkerReport>> {
    thread::scope(|scope| {
        let handles: Vec<_> = (0..cfg.workers)
            .map(|index| scope.spawn(move || run_worker(index, cfg, catalog)))
            .collect();

        let mut reports = Vec::with_capacity(cfg.workers);
        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error = Some(anyhow!("worker thread panicked"));
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(reports),
        }
    })
}

fn run_worker(
    index: usize,
    cfg: &HarnessConfig,
    catalog: &[FixtureDescriptor],
) -> Result<WorkerReport> {
    let results_dir = cfg.worker_results_dir(index);
    if results_dir.exists() {
        fs::remove_dir_all(&results_dir)
            .with_context(|| format!("unable to clear {}", results_dir.display()))?;
    }
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("unable to create {}", results_dir.display()))?;

    let log_path = cfg.timing_log_path(index);
    let mut timing_log = csv::Writer::from_path(&log_path)
        .with_context(|| format!("unable to create {}", log_path.display()))?;
    timing_log.write_record(["dimension", "type", "time_ns"])?;

    let mut records = Vec::with_capacity(catalog.len());
    for desc in catalog {
        let record = run_fixture(index, cfg, desc)
            .with_context(|| format!("worker {} failed on fixture {}", index, desc.name))?;
        timing_log.write_record([
            record.dimension.to_string(),
            record.mtype.to_string(),
            record.elapsed.as_nanos().to_string(),
        ])?;
        timing_log.flush()?;
        records.push(record);
    }

    info!(worker = index, fixtures = records.len(), "worker finished");
    Ok(WorkerReport { index, records })
}

/// Drives one fresh client session through a single fixture: send the
/// data, start the calculation, poll to completion, then move the result
/// into this worker's directory under the fixture's name.
fn run_fixture(index: usize, cfg: &HarnessConfig, desc: &FixtureDescriptor) -> Result<TimingRecord> {
    let mut session = ClientSession::spawn(&cfg.client)?;
    info!(worker = index, fixture = %desc.name, "client session started");

    session.read_to_prompt()?;

    session.write_command(&format!("send_data {}", desc.file_path.display()))?;
    session.read_to_prompt()?;

    session.write_command("start_calculation")?;
    let started = Instant::now();
    session.read_to_prompt()?;

    let completion = poll_to_completion(&mut session, &cfg.client.workdir, started)?;

    let destination = cfg.worker_results_dir(index).join(&desc.name);
    fs::rename(&completion.produced_path, &destination).with_context(|| {
        format!(
            "unable to move {} to {}",
            completion.produced_path.display(),
            destination.display()
        )
    })?;
    debug!(worker = index, destination = %destination.display(), "result file moved");

    session.write_command("exit")?;
    session.close()?;

    Ok(TimingRecord {
        dimension: desc.dimension,
        mtype: desc.mtype,
        elapsed: completion.elapsed,
    })
}

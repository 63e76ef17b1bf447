//! Full-pipeline test against scripted peer processes: a shell server that
//! announces readiness and sleeps until signalled, and a shell client that
//! speaks the prompt protocol and transposes with awk.

use std::fs;
use std::path::{Path, PathBuf};

use tlab_runner::{
    run_harness, FixtureDescriptor, HarnessConfig, MatrixType, ProcessConfig,
};

const SERVER_SCRIPT: &str = "echo 'Server starting'\necho 'Listening on port 7878'\nexec sleep 600\n";

const TRANSPOSING_CLIENT: &str = r#"printf 'Welcome to the matrix transposer!\n> '
data=""
while IFS= read -r line; do
  case "$line" in
    "send_data "*)
      data="${line#send_data }"
      printf 'The matrix has been sent to the server.\n> '
      ;;
    start_calculation)
      printf 'The job has been started.\n> '
      ;;
    get_status)
      mkdir -p downloaded_matrices
      out="downloaded_matrices/result_$$.csv"
      awk -F',' '
        { for (i = 1; i <= NF; i++) cell[i "," NR] = $i; rows = NR; cols = NF }
        END {
          for (i = 1; i <= cols; i++) {
            row = cell[i "," 1]
            for (j = 2; j <= rows; j++) row = row "," cell[i "," j]
            print row
          }
        }' "$data" > "$out"
      printf 'Calculation complete! Downloading the result...\n'
      printf 'The transposed matrix has been downloaded to file %s.\n> ' "$out"
      ;;
    exit)
      exit 0
      ;;
    *)
      printf 'unrecognized command\n> '
      ;;
  esac
done
"#;

const IDENTITY_CLIENT: &str = r#"printf 'Welcome to the matrix transposer!\n> '
data=""
while IFS= read -r line; do
  case "$line" in
    "send_data "*)
      data="${line#send_data }"
      printf 'The matrix has been sent to the server.\n> '
      ;;
    start_calculation)
      printf 'The job has been started.\n> '
      ;;
    get_status)
      mkdir -p downloaded_matrices
      out="downloaded_matrices/result_$$.csv"
      cp "$data" "$out"
      printf 'Calculation complete! Downloading the result...\n'
      printf 'The transposed matrix has been downloaded to file %s.\n> ' "$out"
      ;;
    exit)
      exit 0
      ;;
    *)
      printf 'unrecognized command\n> '
      ;;
  esac
done
"#;

fn temp_root(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "tlab_pipeline_{}_{}_{}",
        tag,
        std::process::id(),
        chrono::Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&dir).expect("temp root");
    dir
}

fn scripted(root: &Path, name: &str, script: &str) -> ProcessConfig {
    let path = root.join(name);
    fs::write(&path, script).expect("write script");
    ProcessConfig {
        command: vec!["sh".into(), path.to_string_lossy().into_owned()],
        workdir: root.to_path_buf(),
    }
}

fn harness_config(root: &Path, client_script: &str, workers: usize) -> HarnessConfig {
    HarnessConfig {
        server: scripted(root, "server.sh", SERVER_SCRIPT),
        client: scripted(root, "client.sh", client_script),
        workers,
        fixtures_dir: root.join("test_matrices"),
        downloads_dir: root.join("downloaded_matrices"),
        results_dir: root.to_path_buf(),
        server_log: root.join("server.log"),
    }
}

fn small_catalog(fixtures_dir: &Path) -> Vec<FixtureDescriptor> {
    vec![
        FixtureDescriptor::new("tiny", 4, MatrixType::Bool, fixtures_dir),
        FixtureDescriptor::new("tiny", 4, MatrixType::I16, fixtures_dir),
        FixtureDescriptor::new("tiny", 4, MatrixType::F64, fixtures_dir),
        FixtureDescriptor::new("small", 12, MatrixType::U8, fixtures_dir),
    ]
}

#[test]
fn full_run_with_four_workers_verifies_and_partitions_results() {
    let root = temp_root("full");
    let cfg = harness_config(&root, TRANSPOSING_CLIENT, 4);
    let catalog = small_catalog(&cfg.fixtures_dir);

    let result = run_harness(&cfg, &catalog).expect("pipeline must pass");

    assert_eq!(result.workers, 4);
    assert_eq!(result.fixtures, catalog.len());
    assert_eq!(result.verified_pairs, 4 * catalog.len());
    assert_eq!(result.worker_reports.len(), 4);

    for report in &result.worker_reports {
        // Every worker logs exactly one record per fixture.
        assert_eq!(report.records.len(), catalog.len());

        // Each worker's results directory holds exactly its own files.
        let dir = cfg.downloads_dir.join(report.index.to_string());
        let mut files: Vec<String> = fs::read_dir(&dir)
            .expect("worker dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        let mut expected: Vec<String> = catalog.iter().map(|d| d.name.clone()).collect();
        expected.sort();
        assert_eq!(files, expected, "worker {}", report.index);

        // Timing log: header plus one row per fixture.
        let log = fs::read_to_string(cfg.timing_log_path(report.index)).expect("timing log");
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines[0], "dimension,type,time_ns");
        assert_eq!(lines.len(), catalog.len() + 1, "worker {}", report.index);
        for line in &lines[1..] {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 3, "timing row {:?}", line);
            fields[0].parse::<usize>().expect("dimension field");
            fields[2].parse::<u128>().expect("time_ns field");
        }
    }

    // The server's output was drained into the log sink.
    let server_log = fs::read_to_string(&cfg.server_log).expect("server log");
    assert!(server_log.contains("Listening on port 7878"));

    // The run manifest records the verified outcome.
    let manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(&result.manifest_path).expect("manifest"))
            .expect("manifest json");
    assert_eq!(manifest["workers"], 4);
    assert_eq!(manifest["verified_pairs"], 4 * catalog.len());
    for report in &result.worker_reports {
        assert_eq!(
            manifest["records_per_worker"][report.index.to_string()],
            catalog.len()
        );
    }

    let _ = fs::remove_dir_all(root);
}

#[test]
fn client_returning_untransposed_matrices_fails_verification() {
    let root = temp_root("identity");
    let cfg = harness_config(&root, IDENTITY_CLIENT, 1);

    // A pre-written asymmetric fixture: generation skips existing files, so
    // the identity client's output is deterministically wrong.
    fs::create_dir_all(&cfg.fixtures_dir).expect("fixtures dir");
    let desc = FixtureDescriptor::new("tiny", 2, MatrixType::U8, &cfg.fixtures_dir);
    fs::write(&desc.file_path, "1,2\n3,4\n").expect("fixture");

    let err = run_harness(&cfg, std::slice::from_ref(&desc))
        .expect_err("identity results must fail verification");
    assert!(err.to_string().contains("not the transpose"), "{}", err);

    let _ = fs::remove_dir_all(root);
}

#[test]
fn rerun_reuses_fixtures_and_replaces_worker_results() {
    let root = temp_root("rerun");
    let cfg = harness_config(&root, TRANSPOSING_CLIENT, 1);
    let catalog = vec![FixtureDescriptor::new(
        "tiny",
        4,
        MatrixType::U8,
        &cfg.fixtures_dir,
    )];

    run_harness(&cfg, &catalog).expect("first run");
    let fixture_before = fs::read(&catalog[0].file_path).expect("fixture bytes");

    run_harness(&cfg, &catalog).expect("second run");
    let fixture_after = fs::read(&catalog[0].file_path).expect("fixture bytes");
    assert_eq!(fixture_before, fixture_after, "fixtures must be reused");

    // The worker directory was cleared and repopulated, not accumulated.
    let files: Vec<_> = fs::read_dir(cfg.downloads_dir.join("0"))
        .expect("worker dir")
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(files.len(), 1);

    let _ = fs::remove_dir_all(root);
}

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;

use zillow_connector::config::R2Credentials;
use zillow_connector::observe::RUNS;
use zillow_connector::supervisor::{ERROR_LOG, OUTPUT_LOG, Supervisor, SupervisorConfig};

fn config(temp: &tempfile::TempDir, script: &str) -> SupervisorConfig {
    SupervisorConfig {
        program: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), script.to_string()],
        run_id: "test-run".to_string(),
        log_dir: Utf8PathBuf::from_path_buf(temp.path().join("logs")).unwrap(),
        connector: "zillow".to_string(),
        cloud: false,
        trigger: "manual".to_string(),
        r2: None,
        grace_period: Duration::from_millis(300),
    }
}

fn terminate_after(supervisor: Supervisor, delay: Duration) -> i32 {
    let terminate = supervisor.terminate_handle();
    let handle = thread::spawn(move || supervisor.run().unwrap());
    thread::sleep(delay);
    terminate.store(true, Ordering::SeqCst);
    handle.join().unwrap()
}

#[test]
fn successful_child_leaves_no_error_file() {
    let temp = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::new(config(&temp, "echo \"run $RUN_ID\"; echo oops >&2"));
    assert_eq!(supervisor.run().unwrap(), 0);

    let logs = temp.path().join("logs");
    let output = fs::read_to_string(logs.join(OUTPUT_LOG)).unwrap();
    assert!(output.contains("run test-run\n"));
    assert!(output.contains("oops\n"));
    assert!(!logs.join(ERROR_LOG).exists());
    let runs = fs::read_to_string(logs.join(RUNS)).unwrap();
    assert!(runs.lines().last().unwrap().contains(",end,completed,local,manual,"));
}

#[test]
fn failure_code_is_propagated_with_tail() {
    let temp = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::new(config(&temp, "echo step; exit 3"));
    assert_eq!(supervisor.run().unwrap(), 3);

    let error = fs::read_to_string(temp.path().join("logs").join(ERROR_LOG)).unwrap();
    assert!(error.starts_with("Exit code: 3\n"));
    assert!(error.contains("step"));
}

#[test]
fn killed_child_reports_signal_exit_code() {
    let temp = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::new(config(&temp, "kill -9 $$"));
    assert_eq!(supervisor.run().unwrap(), 137);

    let runs = fs::read_to_string(temp.path().join("logs").join(RUNS)).unwrap();
    assert!(runs.contains(",end,oom,"));
}

#[test]
fn termination_is_forwarded_to_child() {
    let temp = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::new(config(&temp, "exec sleep 30"));
    let started = Instant::now();
    assert_eq!(terminate_after(supervisor, Duration::from_millis(500)), 143);
    assert!(started.elapsed() < Duration::from_secs(10));

    let runs = fs::read_to_string(temp.path().join("logs").join(RUNS)).unwrap();
    assert!(runs.contains(",end,timeout,"));
}

#[test]
fn child_ignoring_sigterm_is_killed_after_grace_period() {
    let temp = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::new(config(&temp, "trap '' TERM; exec sleep 30"));
    let started = Instant::now();
    assert_eq!(terminate_after(supervisor, Duration::from_millis(500)), 137);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(800));
    assert!(elapsed < Duration::from_secs(10));

    let runs = fs::read_to_string(temp.path().join("logs").join(RUNS)).unwrap();
    assert!(runs.contains(",end,oom,"));
}

#[test]
fn log_upload_failure_keeps_child_exit_code() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = config(&temp, "rm -rf \"$LOG_DIR\"; echo gone > \"$LOG_DIR\"; exit 3");
    config.cloud = true;
    config.r2 = Some(R2Credentials {
        account_id: "acct".to_string(),
        access_key_id: "key".to_string(),
        secret_access_key: "secret".to_string(),
        bucket: "bucket".to_string(),
    });
    assert_eq!(Supervisor::new(config).run().unwrap(), 3);
}

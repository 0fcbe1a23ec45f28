//! Runs the pipeline as a child process and keeps a postmortem bundle for it.
//!
//! The supervisor tees the child's output into `output.log`, samples memory
//! into `memory.csv`, forwards termination signals, classifies the exit code
//! and, in cloud mode, uploads the whole log directory.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use sysinfo::{Pid, System};

use crate::blob::{BlobStore, ObjectStore};
use crate::config::R2Credentials;
use crate::error::ConnectorError;
use crate::fs_util::{tail_lines, walk_files};
use crate::observe::RunLog;

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);
pub const ERROR_TAIL_LINES: usize = 100;
pub const MEMORY_LOG: &str = "memory.csv";
pub const OUTPUT_LOG: &str = "output.log";
pub const ERROR_LOG: &str = "error.txt";

static TERMINATE: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    OomKilled,
    TimedOut,
    Failed(i32),
}

impl RunOutcome {
    pub fn classify(exit_code: i32) -> Self {
        match exit_code {
            0 => RunOutcome::Completed,
            137 => RunOutcome::OomKilled,
            143 => RunOutcome::TimedOut,
            code => RunOutcome::Failed(code),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::OomKilled => "oom",
            RunOutcome::TimedOut => "timeout",
            RunOutcome::Failed(_) => "failed",
        }
    }

    pub fn error(&self) -> Option<String> {
        match self {
            RunOutcome::Completed => None,
            RunOutcome::OomKilled => Some("Exit code 137 - Out of memory".to_string()),
            RunOutcome::TimedOut => Some("Exit code 143 - SIGTERM".to_string()),
            RunOutcome::Failed(code) => Some(format!("Exit code {code}")),
        }
    }
}

/// Exit code of a finished child; death by signal `s` maps to `128 + s`.
pub fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub run_id: String,
    pub log_dir: Utf8PathBuf,
    pub connector: String,
    pub cloud: bool,
    pub trigger: String,
    pub r2: Option<R2Credentials>,
    /// How long a terminated child may take to exit before it is killed.
    pub grace_period: Duration,
}

impl SupervisorConfig {
    pub fn from_lookup<F>(lookup: F, program: PathBuf, args: Vec<String>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let cloud = get("CI").is_some_and(|value| value.eq_ignore_ascii_case("true"));
        let run_id = get("RUN_ID")
            .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string());
        let log_dir = match get("LOG_DIR") {
            Some(dir) => Utf8PathBuf::from(dir),
            None if cloud => Utf8PathBuf::from("/tmp/logs").join(&run_id),
            None => Utf8PathBuf::from("logs").join(&run_id),
        };
        let r2 = match (
            get("R2_ACCOUNT_ID"),
            get("R2_ACCESS_KEY_ID"),
            get("R2_SECRET_ACCESS_KEY"),
            get("R2_BUCKET_NAME"),
        ) {
            (Some(account_id), Some(access_key_id), Some(secret_access_key), Some(bucket)) => {
                Some(R2Credentials {
                    account_id,
                    access_key_id,
                    secret_access_key,
                    bucket,
                })
            }
            _ => None,
        };
        Self {
            program,
            args,
            run_id,
            log_dir,
            connector: get("CONNECTOR_NAME").unwrap_or_else(|| "zillow".to_string()),
            cloud,
            trigger: get("GITHUB_EVENT_NAME").unwrap_or_else(|| "manual".to_string()),
            r2,
            grace_period: GRACE_PERIOD,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct MemoryRow {
    timestamp: String,
    rss_mb: f64,
    vms_mb: f64,
    pct: f64,
}

/// Background sampler of a process tree's memory.
pub struct MemorySampler {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MemorySampler {
    pub fn start(pid: u32, path: Utf8PathBuf, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            if let Err(err) = sample_loop(pid, &path, interval, &flag) {
                tracing::warn!(error = %err, "memory sampling stopped");
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn sample_loop(
    pid: u32,
    path: &Utf8Path,
    interval: Duration,
    stop: &AtomicBool,
) -> Result<(), ConnectorError> {
    let file = File::create(path.as_std_path())
        .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
    let mut writer = csv::Writer::from_writer(file);
    let mut system = System::new();
    system.refresh_memory();
    let total = system.total_memory().max(1) as f64;
    let root = Pid::from_u32(pid);

    while !stop.load(Ordering::SeqCst) {
        system.refresh_processes();
        let Some((rss, vms)) = tree_memory(&system, root) else {
            break;
        };
        writer.serialize(MemoryRow {
            timestamp: chrono::Utc::now().to_rfc3339(),
            rss_mb: round1(rss as f64 / 1024.0 / 1024.0),
            vms_mb: round1(vms as f64 / 1024.0 / 1024.0),
            pct: round1(rss as f64 / total * 100.0),
        })?;
        writer.flush().map_err(|err| ConnectorError::Filesystem(err.to_string()))?;

        let started = Instant::now();
        while started.elapsed() < interval && !stop.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(50));
        }
    }
    Ok(())
}

/// Resident and virtual bytes of `root` plus all of its descendants.
fn tree_memory(system: &System, root: Pid) -> Option<(u64, u64)> {
    let processes = system.processes();
    let process = processes.get(&root)?;
    let mut rss = process.memory();
    let mut vms = process.virtual_memory();
    for candidate in processes.values() {
        let mut parent = candidate.parent();
        while let Some(pid) = parent {
            if pid == root {
                rss += candidate.memory();
                vms += candidate.virtual_memory();
                break;
            }
            parent = processes.get(&pid).and_then(|p| p.parent());
        }
    }
    Some((rss, vms))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

extern "C" fn on_terminate(_signal: libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    let handler = on_terminate as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

fn send_signal(pid: u32, signal: libc::c_int) {
    unsafe {
        libc::kill(pid as libc::pid_t, signal);
    }
}

/// Forwards a received termination to the child, escalating after the grace period.
fn spawn_signal_watcher(
    pid: u32,
    finished: Arc<AtomicBool>,
    terminate: Arc<AtomicBool>,
    grace: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !finished.load(Ordering::SeqCst) {
            if TERMINATE.load(Ordering::SeqCst) || terminate.load(Ordering::SeqCst) {
                println!("\nReceived termination signal, terminating child...");
                send_signal(pid, libc::SIGTERM);
                let started = Instant::now();
                while !finished.load(Ordering::SeqCst) {
                    if started.elapsed() >= grace {
                        tracing::warn!(pid, "child ignored SIGTERM, killing");
                        send_signal(pid, libc::SIGKILL);
                        return;
                    }
                    thread::sleep(Duration::from_millis(100));
                }
                return;
            }
            thread::sleep(Duration::from_millis(100));
        }
    })
}

/// Copies lines from `reader` to the console and the shared log file.
fn spawn_tee<R: Read + Send + 'static>(reader: R, log: Arc<Mutex<File>>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let mut stdout = io::stdout().lock();
                    let _ = stdout.write_all(line.as_bytes());
                    let _ = stdout.flush();
                    drop(stdout);
                    if let Ok(mut file) = log.lock() {
                        let _ = file.write_all(line.as_bytes());
                        let _ = file.flush();
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "stopped reading child output");
                    break;
                }
            }
        }
    })
}

pub fn write_error_log(log_dir: &Utf8Path, exit_code: i32, output: &Path) -> Result<(), ConnectorError> {
    let mut text = format!("Exit code: {exit_code}\n");
    if output.exists() {
        let tail = tail_lines(output, ERROR_TAIL_LINES)?;
        text.push_str(&format!("Last {} lines of output:\n", tail.len()));
        text.push_str(&"-".repeat(60));
        text.push('\n');
        for line in tail {
            text.push_str(&line);
            text.push('\n');
        }
    } else {
        text.push_str("No output captured.\n");
    }
    fs::write(log_dir.join(ERROR_LOG).as_std_path(), text)
        .map_err(|err| ConnectorError::Filesystem(err.to_string()))
}

/// Uploads every file under `log_dir` to `{connector}/logs/{run_id}/...`; returns the keys written.
pub fn upload_logs(
    store: &dyn ObjectStore,
    log_dir: &Utf8Path,
    connector: &str,
    run_id: &str,
) -> Result<Vec<String>, ConnectorError> {
    let mut keys = Vec::new();
    for path in walk_files(log_dir.as_std_path())? {
        let relative = path
            .strip_prefix(log_dir.as_std_path())
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let key = format!("{connector}/logs/{run_id}/{relative}");
        match store.put_file(&key, &path) {
            Ok(_) => {
                println!("  -> {key}");
                keys.push(key);
            }
            Err(err) => println!("  Failed to upload {relative}: {err}"),
        }
    }
    Ok(keys)
}

pub struct Supervisor {
    config: SupervisorConfig,
    log: RunLog,
    terminate: Arc<AtomicBool>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let environment = if config.cloud { "cloud" } else { "local" };
        let log = RunLog::for_run(
            config.log_dir.clone(),
            &config.run_id,
            environment,
            &config.trigger,
        );
        Self {
            config,
            log,
            terminate: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that, once set, terminates the child as a SIGTERM to the supervisor would.
    pub fn terminate_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Runs the child to completion and returns its exit code.
    pub fn run(&self) -> Result<i32, ConnectorError> {
        let config = &self.config;
        fs::create_dir_all(config.log_dir.as_std_path())
            .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;

        println!("Starting connector (RUN_ID: {})", config.run_id);
        println!("Log directory: {}", config.log_dir);
        println!(
            "Command: {} {}",
            config.program.display(),
            config.args.join(" ")
        );
        println!("{}", "-".repeat(60));
        self.log.log_run_start();

        let output_path = config.log_dir.join(OUTPUT_LOG);
        let output = File::create(output_path.as_std_path())
            .map_err(|err| ConnectorError::Filesystem(err.to_string()))?;
        let output = Arc::new(Mutex::new(output));

        let mut child = Command::new(&config.program)
            .args(&config.args)
            .env("RUN_ID", &config.run_id)
            .env("LOG_DIR", config.log_dir.as_str())
            .env("CONNECTOR_NAME", &config.connector)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ConnectorError::Spawn(format!("{}: {err}", config.program.display())))?;
        let pid = child.id();
        tracing::info!(pid, "child started");

        install_signal_handlers();
        let finished = Arc::new(AtomicBool::new(false));
        let watcher = spawn_signal_watcher(
            pid,
            Arc::clone(&finished),
            Arc::clone(&self.terminate),
            config.grace_period,
        );
        let sampler = MemorySampler::start(pid, config.log_dir.join(MEMORY_LOG), SAMPLE_INTERVAL);

        let mut tees = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            tees.push(spawn_tee(stdout, Arc::clone(&output)));
        }
        if let Some(stderr) = child.stderr.take() {
            tees.push(spawn_tee(stderr, Arc::clone(&output)));
        }
        for tee in tees {
            let _ = tee.join();
        }

        let status = child
            .wait()
            .map_err(|err| ConnectorError::Spawn(err.to_string()))?;
        finished.store(true, Ordering::SeqCst);
        let _ = watcher.join();
        sampler.stop();

        let code = exit_code(status);
        let outcome = RunOutcome::classify(code);
        println!("{}", "-".repeat(60));
        match outcome {
            RunOutcome::Completed => println!("Connector completed successfully"),
            RunOutcome::OomKilled => println!("Connector killed by OOM (exit code 137)"),
            RunOutcome::TimedOut => println!("Connector terminated by SIGTERM (exit code 143)"),
            RunOutcome::Failed(code) => println!("Connector failed with exit code {code}"),
        }
        if outcome != RunOutcome::Completed {
            if let Err(err) = write_error_log(&config.log_dir, code, output_path.as_std_path()) {
                tracing::warn!(error = %err, "failed to write error summary");
            }
        }
        self.log.log_run_end(outcome.status(), outcome.error().as_deref());

        if config.cloud {
            if let Err(err) = self.upload() {
                tracing::error!(error = %err, "log upload failed");
                println!("Log upload failed: {err}");
            }
        }
        Ok(code)
    }

    fn upload(&self) -> Result<(), ConnectorError> {
        let Some(credentials) = &self.config.r2 else {
            tracing::warn!("no remote credentials, skipping log upload");
            return Ok(());
        };
        let store = BlobStore::r2(credentials)?;
        println!("Uploading logs...");
        upload_logs(&store, &self.config.log_dir, &self.config.connector, &self.config.run_id)?;
        Ok(())
    }
}

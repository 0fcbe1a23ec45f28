use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunSummary};

/// Line-oriented progress on stdout; the supervisor captures and tees it.
pub struct ConsoleOutput;

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        let mut stdout = io::stdout().lock();
        let result = match event.elapsed {
            Some(elapsed) => writeln!(stdout, "{} [{:.1}s]", event.message, elapsed.as_secs_f64()),
            None => writeln!(stdout, "{}", event.message),
        };
        if result.and_then(|_| stdout.flush()).is_err() {
            tracing::debug!("stdout closed, dropping progress line");
        }
    }
}

/// Silent during the run; prints the run summary as JSON at the end.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

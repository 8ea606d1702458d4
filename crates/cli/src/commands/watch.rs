//! Follow a tracked operation in the terminal

use anyhow::Result;
use ludus_common::{OperationStatus, TrackerHandle, TrackerSnapshot};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::output::{
    colored_status, print_error, print_info, print_item, print_warning, OutputFormat,
    TableDisplay,
};

/// Final state of a followed operation
#[derive(Debug, Serialize)]
pub struct WatchSummary {
    pub owner: String,
    pub status: String,
    pub polls: u64,
    pub log_lines: u64,
    pub error: Option<String>,
    pub gave_up: bool,
    pub interrupted: bool,
}

impl WatchSummary {
    fn new(snapshot: &TrackerSnapshot, label: &str, interrupted: bool) -> Self {
        Self {
            owner: if snapshot.handle.owner_id.is_empty() {
                label.to_string()
            } else {
                snapshot.handle.owner_id.clone()
            },
            status: snapshot
                .handle
                .reported_status
                .clone()
                .unwrap_or_else(|| snapshot.status().as_str().to_string()),
            polls: snapshot.polls,
            log_lines: snapshot.handle.lines_delivered(),
            error: snapshot.error.as_ref().map(|e| e.message.clone()),
            gave_up: snapshot.gave_up,
            interrupted,
        }
    }
}

impl TableDisplay for WatchSummary {
    fn headers() -> Vec<&'static str> {
        vec!["Owner", "Status", "Polls", "Log Lines", "Last Error"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.owner.clone(),
            OperationStatus::display_label(&self.status),
            self.polls.to_string(),
            self.log_lines.to_string(),
            self.error.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

async fn next_line(logs: &mut Option<UnboundedReceiver<String>>) -> Option<String> {
    match logs {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Tracks what has already been reported so each change is printed once
#[derive(Default)]
struct Reporter {
    status: Option<String>,
    warned: bool,
}

impl Reporter {
    fn report(&mut self, snapshot: &TrackerSnapshot, label: &str, format: OutputFormat) {
        if format.is_structured() {
            return;
        }

        let text = snapshot.handle.status_label();
        if self.status.as_deref() != Some(text.as_str()) && snapshot.polls > 0 {
            print_info(&format!("{}: {}", label, colored_status(&snapshot.status(), &text)));
            self.status = Some(text);
        }

        match &snapshot.error {
            Some(error) if error.sustained && !self.warned => {
                print_warning(&format!(
                    "{} polls failed in a row, still retrying: {}",
                    error.consecutive_failures, error.message
                ));
                self.warned = true;
            }
            None => self.warned = false,
            _ => {}
        }
    }
}

/// Print status changes and log lines until the operation finishes or
/// the user interrupts. Returns the last snapshot seen.
pub async fn follow(
    mut handle: TrackerHandle,
    label: &str,
    format: OutputFormat,
) -> Result<TrackerSnapshot> {
    let mut logs = handle.take_logs();
    let mut reporter = Reporter::default();
    let print_logs = !format.is_structured();
    let mut interrupted = false;

    let last = loop {
        tokio::select! {
            line = next_line(&mut logs) => match line {
                Some(line) if print_logs => println!("{}", line),
                Some(_) => {}
                None => logs = None,
            },
            snapshot = handle.changed() => {
                let Some(snapshot) = snapshot else {
                    break handle.snapshot();
                };
                reporter.report(&snapshot, label, format);
                if snapshot.is_finished() {
                    break snapshot;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                break handle.snapshot();
            }
        }
    };

    // Lines sent just before the final snapshot
    if let Some(rx) = logs.as_mut() {
        while let Ok(line) = rx.try_recv() {
            if print_logs {
                println!("{}", line);
            }
        }
    }
    handle.shutdown().await;

    if interrupted && !format.is_structured() {
        print_warning("Stopped watching; the operation keeps running on the server");
    }
    if last.gave_up && !format.is_structured() {
        print_error("Gave up polling after repeated failures");
    }
    print_item(&WatchSummary::new(&last, label, interrupted), format);

    Ok(last)
}

/// Turn a finished watch into the process outcome
pub fn ensure_success(snapshot: &TrackerSnapshot) -> Result<()> {
    if snapshot.gave_up {
        anyhow::bail!(
            "status unavailable: {}",
            snapshot
                .error
                .as_ref()
                .map_or("unknown error", |e| e.message.as_str())
        );
    }
    if snapshot.is_error() {
        anyhow::bail!("operation ended with {}", snapshot.status().display_name());
    }
    Ok(())
}

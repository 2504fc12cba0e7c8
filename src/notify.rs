// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Operator notifications and the per-flowcell status log.

use anyhow::{Context, Result};
use log::warn;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::shell::{run_command, CommandInput, ExternalCommand};

/// Something that tells a human about run progress.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str);
}

/// Sends a one-line mail per address with the `mail` command.
/// A failing mail command is logged, never raised.
#[derive(Clone, Debug)]
pub struct MailNotifier {
    addresses: Vec<String>,
}

impl MailNotifier {
    pub fn new(addresses: Vec<String>) -> MailNotifier {
        MailNotifier { addresses }
    }

    pub fn command(title: &str, address: &str) -> ExternalCommand {
        ExternalCommand::new("mail")
            .arg("-s")
            .arg(title)
            .arg(address)
            .stdin(CommandInput::Text("that is all".to_string()))
    }
}

impl Notifier for MailNotifier {
    fn notify(&self, title: &str) {
        for address in &self.addresses {
            let cmd = MailNotifier::command(title, address);
            match run_command(&cmd) {
                Ok(out) if out.success() => (),
                Ok(out) => warn!(
                    "mail to {} exited with {:?}: {}",
                    address,
                    out.status,
                    out.stderr.trim()
                ),
                Err(e) => warn!("mail to {} failed: {:#}", address, e),
            }
        }
    }
}

/// Drops every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _title: &str) {}
}

/// Keeps notification titles in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    titles: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str) {
        if let Ok(mut t) = self.titles.lock() {
            t.push(title.to_string());
        }
    }
}

#[derive(Serialize)]
struct StatusEntry<'a> {
    time: u64,
    message: &'a str,
}

/// Append-only JSON-lines status log at `<logs_path>/<flowcell_id>.log`.
#[derive(Clone, Debug)]
pub struct StatusLog {
    path: PathBuf,
}

impl StatusLog {
    pub fn new(logs_path: &Path, flowcell_id: &str) -> StatusLog {
        StatusLog {
            path: logs_path.join(format!("{}.log", flowcell_id)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, message: &str) -> Result<()> {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut line = serde_json::to_string(&StatusEntry { time, message })?;
        line.push('\n');

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("error opening status log {:?}", self.path))?;
        f.write_all(line.as_bytes())?;
        Ok(())
    }
}

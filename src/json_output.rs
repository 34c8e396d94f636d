//! # JSON Output Module
//!
//! Line-delimited JSON events for callers that drive the CLI from another
//! process (`--json`). One object per line on stdout, tagged by `type`.
//!
//! ## Message types:
//! - `start`: a batch command begins
//! - `container_complete`: one container finished, with its typed report
//! - `task`: a task reached a terminal state
//! - `complete`: the run finished, with totals
//! - `error`: the run failed

use serde::Serialize;
use std::path::PathBuf;

use crate::duplicates::{DuplicateReport, RemovalReport};
use crate::encoding::EncodingReport;
use crate::models::TaskRequest;
use crate::previews::PreviewReport;
use crate::progress::BatchStats;

/// Report carried by a `container_complete` message.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContainerReport<'a> {
    Previews(&'a PreviewReport),
    Encoding(&'a EncodingReport),
    Duplicates(&'a DuplicateReport),
    Removal(&'a RemovalReport),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JsonMessage<'a> {
    Start {
        command: &'a str,
        media_dir: PathBuf,
        containers: usize,
    },
    ContainerComplete {
        container: &'a str,
        report: ContainerReport<'a>,
    },
    Task {
        task: &'a TaskRequest,
    },
    Complete {
        command: &'a str,
        stats: &'a BatchStats,
        duration_seconds: f64,
    },
    Error {
        message: String,
    },
}

impl JsonMessage<'_> {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Prints the message on stdout as a single line.
    pub fn emit(&self) {
        match self.to_line() {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Could not serialize output message: {}", e),
        }
    }
}

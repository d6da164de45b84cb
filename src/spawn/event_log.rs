//! Append-only governance event log.
//!
//! Every record carries the governor clock's timestamp. The file sink writes
//! one JSON object per line and never rewrites earlier lines.

use crate::types::{Time, UnitId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::governor::{RejectionReason, TerminationCause};
use super::policy::DestroyPolicy;

/// A governance event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GovernanceEvent {
    /// A unit was registered.
    Spawn {
        /// New unit.
        unit: UnitId,
        /// Its parent.
        parent: UnitId,
        /// Spawn-site label.
        site: String,
        /// Hierarchy depth.
        depth: u32,
    },
    /// A unit reported liveness.
    Heartbeat {
        /// Reporting unit.
        unit: UnitId,
    },
    /// A child link was recorded.
    HierarchyAdd {
        /// Parent unit.
        parent: UnitId,
        /// Child unit.
        child: UnitId,
    },
    /// A spawn was refused.
    Rejected {
        /// Requesting parent.
        parent: UnitId,
        /// Why.
        reason: RejectionReason,
    },
    /// A unit was removed from the registry.
    Termination {
        /// Terminated unit.
        unit: UnitId,
        /// What triggered it.
        cause: TerminationCause,
        /// Policy applied to its children.
        policy: DestroyPolicy,
    },
    /// A unit entered a graceful drain.
    Draining {
        /// Draining unit.
        unit: UnitId,
        /// Deadline before escalation.
        deadline: Time,
    },
    /// A unit missed its heartbeat window.
    Ghosted {
        /// Ghosted unit.
        unit: UnitId,
        /// Ancestor chain, nearest first.
        lineage: Vec<UnitId>,
    },
    /// A unit was moved under a new parent.
    Reparented {
        /// Moved unit.
        unit: UnitId,
        /// Previous parent.
        from: UnitId,
        /// New parent.
        to: UnitId,
    },
}

/// A timestamped event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Governor clock time.
    pub at: Time,
    /// The event.
    #[serde(flatten)]
    pub event: GovernanceEvent,
}

/// Destination for governance events.
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Appends one record.
    fn record(&self, record: &EventRecord) -> io::Result<()>;

    /// Flushes buffered records.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Appends JSON lines to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonLinesSink {
    fn record(&self, record: &EventRecord) -> io::Result<()> {
        let line = serde_json::to_string(record).map_err(io::Error::other)?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<EventRecord>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the records so far.
    #[must_use]
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    /// Records matching `pred`.
    pub fn matching(&self, pred: impl Fn(&GovernanceEvent) -> bool) -> Vec<EventRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| pred(&r.event))
            .cloned()
            .collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, record: &EventRecord) -> io::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Reads back a JSON-lines log.
pub fn read_json_lines(path: impl AsRef<Path>) -> io::Result<Vec<EventRecord>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(io::Error::other))
        .collect()
}

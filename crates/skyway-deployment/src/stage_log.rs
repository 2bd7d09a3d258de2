//! Staged execution log
//!
//! Every named phase of a run opens its own stage. Messages written through a
//! [`StageLog`] are attributed to that stage and handed to a
//! [`StageLogSink`], which is the log transport.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use skyway_types::CommandStatus;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Named phases of an orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Setup,
    CheckExistingApps,
    Upsize,
    Downsize,
    RenameApplications,
    SwapRoutesForNewApplication,
    SwapRoutesForExistingApplication,
    Rollback,
    RouteMapping,
    DataFetch,
    RunPluginScript,
    Wrapup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "Setup",
            Stage::CheckExistingApps => "CheckExistingApps",
            Stage::Upsize => "Upsize",
            Stage::Downsize => "Downsize",
            Stage::RenameApplications => "RenameApplications",
            Stage::SwapRoutesForNewApplication => "SwapRoutesForNewApplication",
            Stage::SwapRoutesForExistingApplication => "SwapRoutesForExistingApplication",
            Stage::Rollback => "Rollback",
            Stage::RouteMapping => "RouteMapping",
            Stage::DataFetch => "DataFetch",
            Stage::RunPluginScript => "RunPluginScript",
            Stage::Wrapup => "Wrapup",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One line of the staged log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageLogEntry {
    pub stage: Stage,
    pub message: String,
    pub level: LogLevel,
    /// Set on the entry that closes the stage
    pub status: Option<CommandStatus>,
    pub timestamp: DateTime<Utc>,
}

/// Log transport
pub trait StageLogSink: Send + Sync {
    fn emit(&self, entry: StageLogEntry);
}

/// Sink that forwards entries into `tracing`
#[derive(Debug, Default)]
pub struct TracingLogSink;

impl StageLogSink for TracingLogSink {
    fn emit(&self, entry: StageLogEntry) {
        let status = entry.status.map(|s| format!("{:?}", s));
        match entry.level {
            LogLevel::Info => info!(stage = %entry.stage, status = ?status, "{}", entry.message),
            LogLevel::Warn => warn!(stage = %entry.stage, status = ?status, "{}", entry.message),
            LogLevel::Error => error!(stage = %entry.stage, status = ?status, "{}", entry.message),
        }
    }
}

/// In-memory sink for tests and dry runs
pub struct MemoryLogSink {
    entries: RwLock<Vec<StageLogEntry>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<StageLogEntry> {
        self.entries.read().clone()
    }

    /// Stages in the order they were first written to
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        for entry in self.entries.read().iter() {
            if !stages.contains(&entry.stage) {
                stages.push(entry.stage);
            }
        }
        stages
    }

    pub fn messages(&self, stage: Stage) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.stage == stage)
            .map(|e| e.message.clone())
            .collect()
    }

    /// Terminal status recorded for a stage
    pub fn status(&self, stage: Stage) -> Option<CommandStatus> {
        self.entries
            .read()
            .iter()
            .rev()
            .find(|e| e.stage == stage && e.status.is_some())
            .and_then(|e| e.status)
    }
}

impl Default for MemoryLogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StageLogSink for MemoryLogSink {
    fn emit(&self, entry: StageLogEntry) {
        self.entries.write().push(entry);
    }
}

/// Handle attributing messages to one stage
#[derive(Clone)]
pub struct StageLog {
    sink: Arc<dyn StageLogSink>,
    stage: Stage,
}

impl StageLog {
    pub fn open(sink: Arc<dyn StageLogSink>, stage: Stage) -> Self {
        Self { sink, stage }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn info(&self, message: impl Into<String>) {
        self.write(message.into(), LogLevel::Info, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.write(message.into(), LogLevel::Warn, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.write(message.into(), LogLevel::Error, None);
    }

    /// Close the stage with a terminal status
    pub fn finish(&self, status: CommandStatus, message: impl Into<String>) {
        let level = match status {
            CommandStatus::Success => LogLevel::Info,
            CommandStatus::Failure => LogLevel::Error,
        };
        self.write(message.into(), level, Some(status));
    }

    fn write(&self, message: String, level: LogLevel, status: Option<CommandStatus>) {
        self.sink.emit(StageLogEntry {
            stage: self.stage,
            message,
            level,
            status,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_attributed_to_stage() {
        let sink = Arc::new(MemoryLogSink::new());
        let setup = StageLog::open(sink.clone(), Stage::Setup);
        let wrapup = StageLog::open(sink.clone(), Stage::Wrapup);
        setup.info("Resolving previous releases");
        wrapup.info("Removing working directory");
        setup.finish(CommandStatus::Success, "Setup done");

        assert_eq!(sink.stages(), vec![Stage::Setup, Stage::Wrapup]);
        assert_eq!(sink.messages(Stage::Setup).len(), 2);
        assert_eq!(sink.status(Stage::Setup), Some(CommandStatus::Success));
        assert_eq!(sink.status(Stage::Wrapup), None);
    }

    #[test]
    fn test_failure_is_error_level() {
        let sink = Arc::new(MemoryLogSink::new());
        StageLog::open(sink.clone(), Stage::Upsize).finish(CommandStatus::Failure, "timed out");
        let entry = &sink.entries()[0];
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.stage.to_string(), "Upsize");
    }
}

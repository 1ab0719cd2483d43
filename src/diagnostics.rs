use std::fmt;

use tracing::{debug, error, info, warn, Level};

/// The part of the bootstrap pipeline that produced a [`Diagnostic`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Collecting raw credential payloads
    Source,
    /// Parsing a payload as JSON or base64-encoded JSON
    Decode,
    /// Normalizing a private key
    Key,
    /// Choosing an initialization strategy
    Select,
    /// Building the application and its credential
    Construct,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Decode => "decode",
            Self::Key => "key",
            Self::Select => "select",
            Self::Construct => "construct",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A leveled event recorded while bootstrapping
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub level: Level,
    pub stage: Stage,
    pub message: String,
}

/// Ordered record of everything noteworthy that happened during one bootstrap pass
///
/// Every event is also emitted through `tracing` at the same level.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    events: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.events.iter()
    }

    /// Events at `level` or more severe
    pub fn at_least(&self, level: Level) -> impl Iterator<Item = &Diagnostic> {
        // tracing orders levels by verbosity, so ERROR is the smallest
        self.events.iter().filter(move |event| event.level <= level)
    }

    pub(crate) fn debug(&mut self, stage: Stage, message: impl Into<String>) {
        self.record(Level::DEBUG, stage, message.into());
    }

    pub(crate) fn info(&mut self, stage: Stage, message: impl Into<String>) {
        self.record(Level::INFO, stage, message.into());
    }

    pub(crate) fn warn(&mut self, stage: Stage, message: impl Into<String>) {
        self.record(Level::WARN, stage, message.into());
    }

    pub(crate) fn error(&mut self, stage: Stage, message: impl Into<String>) {
        self.record(Level::ERROR, stage, message.into());
    }

    fn record(&mut self, level: Level, stage: Stage, message: String) {
        let stage_name = stage.as_str();
        match level {
            Level::ERROR => error!(stage = stage_name, "{message}"),
            Level::WARN => warn!(stage = stage_name, "{message}"),
            Level::INFO => info!(stage = stage_name, "{message}"),
            _ => debug!(stage = stage_name, "{message}"),
        }

        self.events.push(Diagnostic {
            level,
            stage,
            message,
        });
    }
}

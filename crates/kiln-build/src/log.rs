//! Logging setup and the per-chunk log sink
//!
//! Everything logs through `tracing`. Compilation workers additionally get a
//! [`ChunkLog`] of their own, so output from concurrently running chunks stays
//! attributable and can be handed back with the chunk's result.

use std::fmt;
use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` subscriber filtered by `RUST_LOG`.
///
/// Safe to call multiple times; only the first call has an effect, and only
/// when `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            let _ = tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .try_init();
        }
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warning",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Log sink owned by one unit of compilation work
#[derive(Debug, Clone)]
pub struct ChunkLog {
    chunk_id: String,
    lines: Vec<(LogLevel, String)>,
}

impl ChunkLog {
    pub fn new(chunk_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            lines: Vec::new(),
        }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk_id
    }

    pub fn log(&mut self, level: LogLevel, message: impl fmt::Display) {
        let message = message.to_string();
        let chunk = self.chunk_id.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(chunk, "{}", message),
            LogLevel::Info => tracing::info!(chunk, "{}", message),
            LogLevel::Warn => tracing::warn!(chunk, "{}", message),
            LogLevel::Error => tracing::error!(chunk, "{}", message),
        }
        self.lines.push((level, message));
    }

    pub fn debug(&mut self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&mut self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message);
    }

    pub fn lines(&self) -> &[(LogLevel, String)] {
        &self.lines
    }

    /// Captured lines at `Info` and above, one per line
    pub fn to_text(&self) -> String {
        self.lines
            .iter()
            .filter(|(level, _)| *level >= LogLevel::Info)
            .map(|(level, message)| format!("[{}] {}: {}\n", self.chunk_id, level, message))
            .collect()
    }
}

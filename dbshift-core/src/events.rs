use dbshift_types::serde::Serialize;
use dbshift_types::serde_json;
use dbshift_types::tracing::warn;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Progress events emitted by long-running stages as JSON lines. A UI
/// collaborator forwards them over SSE; the CLI just prints them when asked.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", crate = "dbshift_types::serde")]
pub enum Event {
    Log {
        level: String,
        message: String,
    },
    Progress {
        stage: String,
        table: String,
        rows_done: u64,
        rows_total: u64,
    },
    TableDone {
        stage: String,
        table: String,
    },
    Done {
        stage: String,
    },
    Error {
        stage: String,
        message: String,
    },
}

/// Shared sink for stage events. Cloning is cheap; writers are serialized.
#[derive(Clone)]
pub struct EventSink {
    out: Option<Arc<Mutex<Box<dyn Write + Send>>>>,
}

impl EventSink {
    pub fn stdout() -> Self {
        Self {
            out: Some(Arc::new(Mutex::new(Box::new(std::io::stdout())))),
        }
    }

    pub fn sink_to(writer: Box<dyn Write + Send>) -> Self {
        Self {
            out: Some(Arc::new(Mutex::new(writer))),
        }
    }

    /// Sink that drops everything; used when event output is not requested.
    pub fn disabled() -> Self {
        Self { out: None }
    }

    pub fn emit(&self, event: Event) {
        let Some(out) = &self.out else {
            return;
        };
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("cannot serialize event: {e}");
                return;
            }
        };
        let mut out = match out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A closed stdout is not worth failing a migration over.
        let _ = writeln!(out, "{line}").and_then(|()| out.flush());
    }

    pub fn log(&self, level: &str, message: impl Into<String>) {
        self.emit(Event::Log {
            level: level.to_string(),
            message: message.into(),
        });
    }

    pub fn error(&self, stage: &str, message: impl Into<String>) {
        self.emit(Event::Error {
            stage: stage.to_string(),
            message: message.into(),
        });
    }

    pub fn done(&self, stage: &str) {
        self.emit(Event::Done {
            stage: stage.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::Progress {
            stage: "migrate".into(),
            table: "users".into(),
            rows_done: 10,
            rows_total: 100,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"rows_done\":10"));
    }
}

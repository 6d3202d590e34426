//! Diagnostic collection.
//!
//! Script errors do not abort parsing: they are recorded here and the
//! linker keeps going so one run can surface as many problems as
//! possible. The orchestrator checks `has_errors` before trusting any
//! parse or layout result.

/// Ordered sink of error messages for one link session.
#[derive(Debug, Default)]
pub struct Diagnostics {
    messages: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error. The message is also emitted through `tracing`
    /// so it shows up as soon as it happens.
    pub fn error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::error!("{msg}");
        self.messages.push(msg);
    }

    pub fn has_errors(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.messages.len()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

//! Structured diagnostics raised while stepping.
//!
//! Collision and solver stages never print. They push a [`Diagnostic`] into
//! the [`StepDiagnostics`] accumulator handed to them by reference; the world
//! drains it once the step ends:
//!
//! - every diagnostic is logged through `tracing` at a matching level
//! - every diagnostic goes to the sink callback, if one is installed
//! - `Error` and `UnknownFatal` also go to the driver's error handler
//!
//! The accumulator lives for one step only, so nothing leaks between steps.

use std::fmt;
use std::sync::Arc;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Advisory.
    Info,
    /// Advisory; skipped pairs and similar recoverable conditions.
    Debug,
    /// Forwarded to the error handler.
    Error,
    /// A failure the solver could not classify. Forwarded to the error handler.
    UnknownFatal,
}

impl Severity {
    /// Whether the driver's error handler must see it.
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error | Self::UnknownFatal)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Error => "error",
            Self::UnknownFatal => "unknown",
        })
    }
}

/// One diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// How serious it is.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

/// Thread-safe callback wrapper with a `Debug` impl.
pub struct Callback<F: ?Sized>(pub Arc<F>);

impl<F: ?Sized> Clone for Callback<F> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<F: ?Sized> fmt::Debug for Callback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(<fn>)")
    }
}

/// Receives diagnostics after each step.
pub type DiagnosticCallback = Callback<dyn Fn(&Diagnostic) + Send + Sync>;

impl DiagnosticCallback {
    /// Wrap a closure.
    pub fn new(f: impl Fn(&Diagnostic) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

/// Per-step diagnostic accumulator.
#[derive(Debug, Default)]
pub struct StepDiagnostics {
    entries: Vec<Diagnostic>,
}

impl StepDiagnostics {
    /// Empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic.
    pub fn push(&mut self, severity: Severity, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            severity,
            message: message.into(),
        });
    }

    /// Record an advisory message.
    pub fn debug(&mut self, message: impl Into<String>) {
        self.push(Severity::Debug, message);
    }

    /// Record an error.
    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }

    /// Recorded diagnostics, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Whether any recorded diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity.is_error())
    }

    /// Log, forward and clear everything recorded.
    pub fn flush(
        &mut self,
        sink: Option<&DiagnosticCallback>,
        error_handler: Option<&DiagnosticCallback>,
    ) {
        for diagnostic in self.entries.drain(..) {
            match diagnostic.severity {
                Severity::Info => tracing::info!("{}", diagnostic.message),
                Severity::Debug => tracing::debug!("{}", diagnostic.message),
                Severity::Error | Severity::UnknownFatal => {
                    tracing::error!(severity = %diagnostic.severity, "{}", diagnostic.message);
                }
            }
            if let Some(sink) = sink {
                (sink.0)(&diagnostic);
            }
            if diagnostic.severity.is_error() {
                if let Some(handler) = error_handler {
                    (handler.0)(&diagnostic);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_flush_routes_by_severity() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let sink = {
            let seen = Arc::clone(&seen);
            DiagnosticCallback::new(move |d| seen.lock().unwrap().push(d.severity))
        };
        let handler = {
            let errors = Arc::clone(&errors);
            DiagnosticCallback::new(move |d| errors.lock().unwrap().push(d.message.clone()))
        };

        let mut diagnostics = StepDiagnostics::new();
        diagnostics.debug("skipped cylinder-cylinder");
        diagnostics.error("integration failed");
        diagnostics.push(Severity::UnknownFatal, "solver gave up");
        assert!(diagnostics.has_errors());

        diagnostics.flush(Some(&sink), Some(&handler));

        assert!(diagnostics.entries().is_empty());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Severity::Debug, Severity::Error, Severity::UnknownFatal]
        );
        assert_eq!(
            *errors.lock().unwrap(),
            vec!["integration failed".to_owned(), "solver gave up".to_owned()]
        );
    }

    #[test]
    fn test_display() {
        let d = Diagnostic {
            severity: Severity::UnknownFatal,
            message: "boom".into(),
        };
        assert_eq!(d.to_string(), "[unknown] boom");
        assert!(!Severity::Debug.is_error());
    }
}

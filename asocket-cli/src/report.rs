//! Error reports that carry the tracing spans active when they were created.

use std::fmt;

use eyre::{DefaultHandler, EyreHandler};
use tracing_error::{SpanTrace, SpanTraceStatus};

/// Wraps the default eyre handler and appends the captured [`SpanTrace`] to the debug output.
pub(crate) struct SpanReport {
    inner: Box<dyn EyreHandler>,
    spans: SpanTrace,
}

impl SpanReport {
    /// Hook for [`eyre::set_hook`].
    pub(crate) fn hook(error: &(dyn std::error::Error + 'static)) -> Box<dyn EyreHandler> {
        Box::new(SpanReport {
            inner: DefaultHandler::default_with(error),
            spans: SpanTrace::capture(),
        })
    }
}

impl EyreHandler for SpanReport {
    fn debug(&self, error: &(dyn std::error::Error + 'static), f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.debug(error, f)?;
        if self.spans.status() == SpanTraceStatus::CAPTURED {
            write!(f, "\n\nSpans:\n{}", self.spans)?;
        }
        Ok(())
    }

    fn display(&self, error: &(dyn std::error::Error + 'static), f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.display(error, f)
    }

    fn track_caller(&mut self, location: &'static std::panic::Location<'static>) {
        self.inner.track_caller(location);
    }
}

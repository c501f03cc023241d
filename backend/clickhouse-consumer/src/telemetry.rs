use std::fmt::Display;

use tracing::Span;

/// Mark `span` as failed so the exported span carries an error status
///
/// The span must declare `otel.status_code` and `otel.status_message` as
/// `Empty` fields, otherwise the record is dropped.
pub(crate) fn record_span_error(span: &Span, error: &dyn Display) {
    span.record("otel.status_code", "ERROR");
    span.record("otel.status_message", error.to_string().as_str());
}

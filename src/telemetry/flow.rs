//! Span helpers for workflow operations.

use tracing::Span;

use crate::model::{DocActionId, DocumentId, UserId};

/// Start a span for one `apply` request.
///
/// `flow.outcome` is declared empty and filled by [`record_outcome`].
pub fn start_apply_span(document: DocumentId, user: UserId, action: DocActionId) -> Span {
    tracing::info_span!(
        "flow.apply",
        "flow.document" = document.0,
        "flow.user" = user.0,
        "flow.action" = action.0,
        "flow.outcome" = tracing::field::Empty,
    )
}

/// Record how an `apply` ended on its span.
pub fn record_outcome<T>(span: &Span, result: &crate::error::Result<T>) {
    let outcome = match result {
        Ok(_) => "applied",
        Err(e) if e.is_denial() => "denied",
        Err(crate::error::Error::ConcurrentModification { .. }) => "conflict",
        Err(_) => "error",
    };
    span.record("flow.outcome", outcome);
}

/// Emit a state-transition event scoped to `span`.
pub fn record_state_transition(span: &Span, from: i64, to: i64) {
    span.in_scope(|| {
        tracing::info!(from, to, "state_transition");
    });
}

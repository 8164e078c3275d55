use std::time::Duration;

use tracing::{Span, field};

use super::TraceId;

/// Create a root span for a tick / submission / reload.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id,
        tier = field::Empty,
        signal_id = field::Empty
    )
}

/// Create a child span (inherits trace_id automatically)
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "child",
        name = %name,
        tier = field::Empty,
        signal_id = field::Empty
    )
}

/// Records tier / signal identity on the current span.
pub fn annotate_tier(tier: &str, signal_id: Option<&uuid::Uuid>) {
    let span = Span::current();
    span.record("tier", field::display(tier));
    if let Some(sid) = signal_id {
        span.record("signal_id", field::display(sid));
    }
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn warn_if_slow_returns_inner_output() {
        let out = warn_if_slow("noop", Duration::from_secs(1), async { 7 }).await;
        assert_eq!(out, 7);
    }
}

//! Execution tracing and observability.
//!
//! A [`NodeTrace`] is emitted for every node a run executes, carrying
//! sanitized input/output snapshots rather than raw state: message lists
//! collapse to a count, long strings truncate, and nested objects are walked
//! recursively. This keeps traces cheap to store and safe to log even when
//! state carries large conversation histories.

use crate::graph_def::NodeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

/// Controls how [`sanitize`] summarizes a state snapshot before it's attached
/// to a trace.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotPolicy {
    /// Strings longer than this are truncated with a `"...(N more chars)"` suffix.
    pub max_string_chars: usize,
    /// When true, arrays of message-shaped objects (`{"role": ..., "content": ...}`)
    /// collapse to `"<N messages>"` instead of being fully serialized.
    pub summarize_messages: bool,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            max_string_chars: 2000,
            summarize_messages: true,
        }
    }
}

/// Sanitize a JSON value for inclusion in a trace snapshot, per `policy`.
pub fn sanitize(value: &Value, policy: &SnapshotPolicy) -> Value {
    match value {
        Value::String(s) if s.chars().count() > policy.max_string_chars => {
            let truncated: String = s.chars().take(policy.max_string_chars).collect();
            let remaining = s.chars().count() - policy.max_string_chars;
            Value::String(format!("{truncated}...({remaining} more chars)"))
        }
        Value::Array(items) if policy.summarize_messages && is_message_list(items) => {
            Value::String(format!("<{} messages>", items.len()))
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| sanitize(v, policy)).collect()),
        Value::Object(map) => {
            let sanitized = map.iter().map(|(k, v)| (k.clone(), sanitize(v, policy))).collect();
            Value::Object(sanitized)
        }
        other => other.clone(),
    }
}

fn is_message_list(items: &[Value]) -> bool {
    !items.is_empty()
        && items.iter().all(|item| {
            item.as_object()
                .map(|o| o.contains_key("role") && o.contains_key("content"))
                .unwrap_or(false)
        })
}

/// One node's execution record within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTrace {
    pub node_id: String,
    pub kind: Option<NodeKind>,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub duration_ms: u64,
    pub input_snapshot: Value,
    pub output_snapshot: Option<Value>,
    pub error: Option<String>,
}

impl NodeTrace {
    /// Build a trace for a node that completed successfully (possibly with no delta).
    pub fn ok(node_id: &str, kind: Option<NodeKind>, state_before: &Value, duration: Duration, delta: Option<Value>) -> Self {
        let policy = SnapshotPolicy::default();
        let now = Utc::now();
        Self {
            node_id: node_id.to_string(),
            kind,
            start_ts: now,
            end_ts: now,
            duration_ms: duration.as_millis() as u64,
            input_snapshot: sanitize(state_before, &policy),
            output_snapshot: delta.map(|d| sanitize(&d, &policy)),
            error: None,
        }
    }

    /// Build a trace for a node that failed.
    pub fn error(node_id: &str, kind: Option<NodeKind>, state_before: &Value, duration: Duration, error: String) -> Self {
        let policy = SnapshotPolicy::default();
        let now = Utc::now();
        Self {
            node_id: node_id.to_string(),
            kind,
            start_ts: now,
            end_ts: now,
            duration_ms: duration.as_millis() as u64,
            input_snapshot: sanitize(state_before, &policy),
            output_snapshot: None,
            error: Some(error),
        }
    }
}

/// Sink a runtime reports [`NodeTrace`]s to. Implementors decide what to do
/// with them: append to an in-memory buffer for a test, forward to a
/// `tracing` subscriber, ship to a collector.
pub trait TraceSink: Send + Sync {
    fn record(&self, trace: NodeTrace);
}

/// Reference [`TraceSink`] that logs each trace via `tracing` at `debug`
/// level and keeps nothing in memory.
#[derive(Debug, Default)]
pub struct TracingTraceSink;

impl TraceSink for TracingTraceSink {
    fn record(&self, trace: NodeTrace) {
        if let Some(error) = &trace.error {
            tracing::warn!(node = %trace.node_id, duration_ms = trace.duration_ms, error = %error, "node failed");
        } else {
            tracing::debug!(node = %trace.node_id, duration_ms = trace.duration_ms, "node completed");
        }
    }
}

/// In-memory [`TraceSink`] that retains every trace it receives, for tests
/// and for callers that want the full run trace after the fact.
#[derive(Debug, Default)]
pub struct BufferingTraceSink {
    traces: Mutex<Vec<NodeTrace>>,
}

impl BufferingTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<NodeTrace> {
        self.traces.lock().unwrap().clone()
    }
}

impl TraceSink for BufferingTraceSink {
    fn record(&self, trace: NodeTrace) {
        self.traces.lock().unwrap().push(trace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_truncates_long_strings() {
        let policy = SnapshotPolicy {
            max_string_chars: 5,
            summarize_messages: true,
        };
        let value = json!({"text": "abcdefghij"});
        let sanitized = sanitize(&value, &policy);
        assert_eq!(sanitized["text"], json!("abcde...(5 more chars)"));
    }

    #[test]
    fn sanitize_summarizes_message_lists() {
        let policy = SnapshotPolicy::default();
        let value = json!([
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello"}
        ]);
        assert_eq!(sanitize(&value, &policy), json!("<2 messages>"));
    }

    #[test]
    fn sanitize_leaves_non_message_arrays_alone() {
        let policy = SnapshotPolicy::default();
        let value = json!([1, 2, 3]);
        assert_eq!(sanitize(&value, &policy), json!([1, 2, 3]));
    }

    #[test]
    fn sanitize_recurses_into_nested_objects() {
        let policy = SnapshotPolicy {
            max_string_chars: 3,
            summarize_messages: false,
        };
        let value = json!({"outer": {"inner": "abcdef"}});
        let sanitized = sanitize(&value, &policy);
        assert_eq!(sanitized["outer"]["inner"], json!("abc...(3 more chars)"));
    }

    #[test]
    fn buffering_sink_retains_traces_in_order() {
        let sink = BufferingTraceSink::new();
        sink.record(NodeTrace::ok("a", None, &json!({}), Duration::from_millis(5), None));
        sink.record(NodeTrace::ok("b", None, &json!({}), Duration::from_millis(7), None));
        let traces = sink.traces();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].node_id, "a");
        assert_eq!(traces[1].node_id, "b");
    }
}

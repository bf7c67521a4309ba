//! Per-session metrics: a `metrics_start` line, a delta line per notable
//! event, and a final `metrics_summary` line written when the session ends.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::event_bus::{AgentEvent, EventBus};

#[derive(Debug, Clone, Serialize)]
struct Counters {
    started_at: DateTime<Utc>,
    last_event_at: DateTime<Utc>,
    tool_calls: u64,
    tool_errors: u64,
    turns: u64,
    oscillation_alerts: u64,
}

impl Counters {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            last_event_at: now,
            tool_calls: 0,
            tool_errors: 0,
            turns: 0,
            oscillation_alerts: 0,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MetricsRecord<'a> {
    MetricsStart { session_id: Uuid, at: DateTime<Utc> },
    ToolCallMetric { session_id: Uuid, at: DateTime<Utc>, tool: &'a str, total: u64 },
    ToolResultMetric { session_id: Uuid, at: DateTime<Utc>, ok: bool, total_errors: u64 },
    ModelMetric { session_id: Uuid, at: DateTime<Utc>, turns: u64 },
    OscillationMetric { session_id: Uuid, at: DateTime<Utc>, possible_oscillation: bool, total_alerts: u64 },
    MetricsSummary { session_id: Uuid, at: DateTime<Utc>, totals: Counters },
}

/// Tracks counters per session and appends a metrics JSONL file under
/// `<home>/metrics/<id>.jsonl`.
pub struct MetricsSubscriber {
    metrics_dir: PathBuf,
    counters: Mutex<HashMap<Uuid, Counters>>,
}

impl MetricsSubscriber {
    pub fn new(metrics_dir: PathBuf) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { metrics_dir, counters: Mutex::new(HashMap::new()) })
    }

    pub fn attach(self: &std::sync::Arc<Self>, bus: &EventBus) {
        let this = self.clone();
        bus.subscribe(move |event| this.handle(event));
    }

    fn path_for(&self, session_id: Uuid) -> PathBuf {
        self.metrics_dir.join(format!("{session_id}.jsonl"))
    }

    fn append(&self, session_id: Uuid, record: &MetricsRecord) {
        let Ok(line) = serde_json::to_string(record) else { return };
        let path = self.path_for(session_id);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            use std::io::Write;
            let _ = writeln!(file, "{line}");
        }
    }

    fn handle(&self, event: &AgentEvent) {
        let session_id = event.session_id();
        let now = Utc::now();

        if let AgentEvent::Start { .. } = event {
            self.counters.lock().unwrap().insert(session_id, Counters::new(now));
            self.append(session_id, &MetricsRecord::MetricsStart { session_id, at: now });
            return;
        }

        let mut counters = self.counters.lock().unwrap();
        let entry = counters.entry(session_id).or_insert_with(|| Counters::new(now));
        entry.last_event_at = now;

        match event {
            AgentEvent::Message { role, .. } if role == "user" => {
                entry.turns += 1;
                let turns = entry.turns;
                self.append(session_id, &MetricsRecord::ModelMetric { session_id, at: now, turns });
            }
            AgentEvent::ToolCall { tool, .. } => {
                entry.tool_calls += 1;
                let total = entry.tool_calls;
                self.append(
                    session_id,
                    &MetricsRecord::ToolCallMetric { session_id, at: now, tool, total },
                );
            }
            AgentEvent::ToolResult { ok, .. } => {
                if !ok {
                    entry.tool_errors += 1;
                }
                let total_errors = entry.tool_errors;
                self.append(
                    session_id,
                    &MetricsRecord::ToolResultMetric { session_id, at: now, ok: *ok, total_errors },
                );
            }
            AgentEvent::OscillationObserve { possible_oscillation, .. } => {
                if *possible_oscillation {
                    entry.oscillation_alerts += 1;
                }
                let total_alerts = entry.oscillation_alerts;
                self.append(
                    session_id,
                    &MetricsRecord::OscillationMetric {
                        session_id,
                        at: now,
                        possible_oscillation: *possible_oscillation,
                        total_alerts,
                    },
                );
            }
            AgentEvent::SessionEnd { .. } => {
                let totals = entry.clone();
                self.append(session_id, &MetricsRecord::MetricsSummary { session_id, at: now, totals });
                counters.remove(&session_id);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn start(bus: &EventBus, session_id: Uuid) {
        bus.publish(AgentEvent::Start {
            session_id,
            workspace: "/ws".to_string(),
            log_path: "/tmp/log.jsonl".to_string(),
            model: "mock".to_string(),
        });
    }

    #[test]
    fn metrics_start_written_on_session_start() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new();
        let subscriber = MetricsSubscriber::new(dir.path().to_path_buf());
        subscriber.attach(&bus);

        let session_id = Uuid::new_v4();
        start(&bus, session_id);

        let content = std::fs::read_to_string(subscriber.path_for(session_id)).unwrap();
        assert!(content.contains("metrics_start"));
    }

    #[test]
    fn turns_increment_on_user_messages() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new();
        let subscriber = MetricsSubscriber::new(dir.path().to_path_buf());
        subscriber.attach(&bus);

        let session_id = Uuid::new_v4();
        start(&bus, session_id);
        for _ in 0..3 {
            bus.publish(AgentEvent::Message {
                session_id,
                role: "user".to_string(),
                content: "hi".to_string(),
                tool_call_id: None,
                tool_name: None,
                tool_calls: Vec::new(),
            });
        }
        bus.publish(AgentEvent::SessionEnd { session_id });

        let content = std::fs::read_to_string(subscriber.path_for(session_id)).unwrap();
        assert_eq!(content.matches("model_metric").count(), 3);
        assert!(content.contains("\"turns\":3"));
    }

    #[test]
    fn tool_errors_and_final_summary_recorded() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new();
        let subscriber = MetricsSubscriber::new(dir.path().to_path_buf());
        subscriber.attach(&bus);

        let session_id = Uuid::new_v4();
        start(&bus, session_id);
        bus.publish(AgentEvent::ToolCall {
            session_id,
            tool: "run_shell".to_string(),
            input: serde_json::json!({}),
            call_id: None,
        });
        bus.publish(AgentEvent::ToolResult {
            session_id,
            tool: "run_shell".to_string(),
            ok: false,
            output: "boom".to_string(),
            path: None,
        });
        bus.publish(AgentEvent::SessionEnd { session_id });

        let path = subscriber.path_for(session_id);
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("tool_call_metric"));
        assert!(content.contains("tool_result_metric"));
        assert!(content.contains("metrics_summary"));
        assert!(content.contains("\"tool_errors\":1"));
    }

    #[test]
    fn oscillation_alerts_only_counted_when_possible() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new();
        let subscriber = MetricsSubscriber::new(dir.path().to_path_buf());
        subscriber.attach(&bus);

        let session_id = Uuid::new_v4();
        start(&bus, session_id);
        bus.publish(AgentEvent::OscillationObserve {
            session_id,
            repeat_ratio: 0.1,
            novelty_ratio: 0.9,
            no_mutation_steps: 1,
            possible_oscillation: false,
        });
        bus.publish(AgentEvent::OscillationObserve {
            session_id,
            repeat_ratio: 0.9,
            novelty_ratio: 0.1,
            no_mutation_steps: 5,
            possible_oscillation: true,
        });

        let counters = subscriber.counters.lock().unwrap();
        assert_eq!(counters.get(&session_id).unwrap().oscillation_alerts, 1);
    }

    #[test]
    fn events_before_start_still_accumulate_under_a_default_entry() {
        let dir = TempDir::new().unwrap();
        let bus = EventBus::new();
        let subscriber = MetricsSubscriber::new(dir.path().to_path_buf());
        subscriber.attach(&bus);

        let session_id = Uuid::new_v4();
        bus.publish(AgentEvent::ToolCall {
            session_id,
            tool: "read_file".to_string(),
            input: serde_json::json!({}),
            call_id: None,
        });

        let counters = subscriber.counters.lock().unwrap();
        assert_eq!(counters.get(&session_id).unwrap().tool_calls, 1);
    }
}

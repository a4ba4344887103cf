//! In-memory reader and writer adaptors.
//!
//! The reader plays a scripted snapshot: it emits its configured
//! records namespace by record order, honors resume states (a `sync`
//! namespace is already done, a `copy` identifier resumes mid-
//! snapshot), and flips each namespace to `sync` once its records are
//! exhausted. The writer collects batches into a shared sink and can
//! inject bulk failures, which is how the integration suite exercises
//! the error-log path.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use transporter_types::{Message, Namespace, Op, State, SyncPhase, Value};

use crate::adaptor::{BulkOutcome, EventStream, ReaderAdaptor, ReaderEvent, WriterAdaptor};

fn default_op() -> Op {
    Op::Insert
}

#[derive(Debug, Deserialize)]
struct ScriptedRecord {
    namespace: String,
    #[serde(default = "default_op")]
    op: Op,
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ReaderConfig {
    #[serde(default)]
    messages: Vec<ScriptedRecord>,
}

/// Identifier format for snapshot positions: `idx:<n>`, the per-
/// namespace record index most recently emitted.
fn snapshot_identifier(index: usize) -> String {
    format!("idx:{index}")
}

fn parse_snapshot_identifier(identifier: &str) -> Option<usize> {
    identifier.strip_prefix("idx:")?.parse().ok()
}

/// Scripted snapshot source.
pub struct MemoryReader {
    records: Vec<(Message, usize)>,
    stopped: bool,
}

impl MemoryReader {
    /// Build from a `{"messages": [{namespace, op, data}]}` config
    /// block.
    ///
    /// # Errors
    ///
    /// Fails when the config block does not deserialize.
    pub fn from_config(config: &serde_json::Value) -> anyhow::Result<Self> {
        let config: ReaderConfig = if config.is_null() {
            ReaderConfig::default()
        } else {
            serde_json::from_value(config.clone())?
        };
        let mut per_namespace: HashMap<String, usize> = HashMap::new();
        let records = config
            .messages
            .into_iter()
            .map(|scripted| {
                let index = per_namespace.entry(scripted.namespace.clone()).or_insert(0);
                let current = *index;
                *index += 1;
                let mut message =
                    Message::new(scripted.op, Namespace::new(scripted.namespace));
                for (key, value) in scripted.data {
                    message.data.insert(key, Value::from(value));
                }
                (message, current)
            })
            .collect();
        Ok(Self {
            records,
            stopped: false,
        })
    }

    /// Build directly from messages (test support).
    #[must_use]
    pub fn from_messages(messages: Vec<Message>) -> Self {
        let mut per_namespace: HashMap<String, usize> = HashMap::new();
        let records = messages
            .into_iter()
            .map(|message| {
                let index = per_namespace
                    .entry(message.namespace.as_str().to_string())
                    .or_insert(0);
                let current = *index;
                *index += 1;
                (message, current)
            })
            .collect();
        Self {
            records,
            stopped: false,
        }
    }
}

struct QueuedEvents {
    events: VecDeque<ReaderEvent>,
}

impl EventStream for QueuedEvents {
    fn next_event(&mut self) -> anyhow::Result<Option<ReaderEvent>> {
        Ok(self.events.pop_front())
    }
}

impl ReaderAdaptor for MemoryReader {
    fn start(&mut self, states: Vec<State>) -> anyhow::Result<Box<dyn EventStream>> {
        let resume: HashMap<&str, &State> = states
            .iter()
            .map(|s| (s.namespace.as_str(), s))
            .collect();

        let mut events = VecDeque::new();
        let mut last_index: HashMap<Namespace, usize> = HashMap::new();
        let mut order: Vec<Namespace> = Vec::new();

        for (message, index) in &self.records {
            let skip = match resume.get(message.namespace.as_str()) {
                Some(state) if state.phase == SyncPhase::Sync => true,
                Some(state) => state
                    .identifier
                    .as_deref()
                    .and_then(parse_snapshot_identifier)
                    .is_some_and(|resumed| *index <= resumed),
                None => false,
            };
            if !last_index.contains_key(&message.namespace) {
                order.push(message.namespace.clone());
            }
            last_index.insert(message.namespace.clone(), *index);
            if skip {
                continue;
            }
            events.push_back(ReaderEvent::Record {
                message: message.clone(),
                state_after: State {
                    identifier: Some(snapshot_identifier(*index)),
                    timestamp: 0,
                    namespace: message.namespace.clone(),
                    phase: SyncPhase::Copy,
                },
            });
        }

        // Every namespace that finished its snapshot flips to sync;
        // namespaces already in sync stay untouched.
        for namespace in order {
            let already_synced = resume
                .get(namespace.as_str())
                .is_some_and(|s| s.phase == SyncPhase::Sync);
            if already_synced {
                continue;
            }
            events.push_back(ReaderEvent::PhaseFlip {
                state: State {
                    identifier: Some("cdc:start".to_string()),
                    timestamp: 0,
                    namespace,
                    phase: SyncPhase::Sync,
                },
            });
        }

        Ok(Box::new(QueuedEvents { events }))
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Everything a memory sink has received.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub batches: Vec<Vec<Message>>,
    pub closes: usize,
}

impl MemorySink {
    /// All messages across batches, in arrival order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.batches.iter().flatten().cloned().collect()
    }
}

/// Shared view into a [`MemoryWriter`]'s sink.
pub type SinkHandle = Arc<Mutex<MemorySink>>;

#[derive(Debug, Default, Deserialize)]
struct WriterConfig {
    /// Fail the batch that would carry the sink past this many
    /// messages.
    #[serde(default)]
    fail_after: Option<usize>,
    /// Report the failure as a partial outcome naming the failing
    /// subset instead of failing the whole batch.
    #[serde(default)]
    partial_failures: bool,
}

/// Collecting sink with optional failure injection.
pub struct MemoryWriter {
    sink: SinkHandle,
    fail_after: Option<usize>,
    partial_failures: bool,
    written: usize,
}

impl MemoryWriter {
    /// Build from a `{"fail_after": n, "partial_failures": bool}`
    /// config block.
    ///
    /// # Errors
    ///
    /// Fails when the config block does not deserialize.
    pub fn from_config(config: &serde_json::Value) -> anyhow::Result<Self> {
        let config: WriterConfig = if config.is_null() {
            WriterConfig::default()
        } else {
            serde_json::from_value(config.clone())?
        };
        Ok(Self {
            sink: SinkHandle::default(),
            fail_after: config.fail_after,
            partial_failures: config.partial_failures,
            written: 0,
        })
    }

    /// A writer delivering into an existing shared sink, so the sink
    /// survives writer restarts.
    #[must_use]
    pub fn with_sink(sink: SinkHandle) -> Self {
        Self {
            sink,
            fail_after: None,
            partial_failures: false,
            written: 0,
        }
    }

    /// A writer plus the shared handle tests use to observe it.
    #[must_use]
    pub fn shared() -> (Self, SinkHandle) {
        let sink = SinkHandle::default();
        (Self::with_sink(sink.clone()), sink)
    }

    /// Inject a failure once `n` messages have been written.
    #[must_use]
    pub fn failing_after(mut self, n: usize, partial: bool) -> Self {
        self.fail_after = Some(n);
        self.partial_failures = partial;
        self
    }
}

impl WriterAdaptor for MemoryWriter {
    fn bulk_write(&mut self, batch: &[Message]) -> BulkOutcome {
        if let Some(limit) = self.fail_after {
            if self.written + batch.len() > limit {
                let boundary = limit.saturating_sub(self.written);
                if self.partial_failures {
                    // The prefix landed; the rest is rejected.
                    let mut sink = match self.sink.lock() {
                        Ok(sink) => sink,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    sink.batches.push(batch[..boundary].to_vec());
                    self.written = limit;
                    let failed = (boundary..batch.len())
                        .map(|i| (i, "rejected by sink".to_string()))
                        .collect();
                    return BulkOutcome::Partial { failed };
                }
                return BulkOutcome::Failed {
                    description: "sink unavailable".to_string(),
                };
            }
        }
        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        sink.batches.push(batch.to_vec());
        self.written += batch.len();
        BulkOutcome::Ok
    }

    fn close(&mut self) {
        if let Ok(mut sink) = self.sink.lock() {
            sink.closes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(namespaces: &[&str]) -> MemoryReader {
        let messages = namespaces
            .iter()
            .map(|ns| Message::new(Op::Insert, Namespace::new(*ns)))
            .collect();
        MemoryReader::from_messages(messages)
    }

    fn collect(stream: &mut dyn EventStream) -> Vec<ReaderEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.next_event().unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn fresh_start_emits_records_then_flips() {
        let mut reader = scripted(&["db.a", "db.a", "db.b"]);
        let mut stream = reader.start(Vec::new()).unwrap();
        let events = collect(stream.as_mut());

        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], ReaderEvent::Record { .. }));
        assert!(matches!(events[3], ReaderEvent::PhaseFlip { .. }));
        let ReaderEvent::PhaseFlip { state } = &events[3] else {
            panic!("expected flip");
        };
        assert_eq!(state.namespace.as_str(), "db.a");
        assert_eq!(state.phase, SyncPhase::Sync);
    }

    #[test]
    fn synced_namespace_is_skipped_entirely() {
        let mut reader = scripted(&["db.a", "db.a"]);
        let states = vec![State {
            identifier: Some("cdc:start".into()),
            timestamp: 9,
            namespace: Namespace::new("db.a"),
            phase: SyncPhase::Sync,
        }];
        let mut stream = reader.start(states).unwrap();
        let events = collect(stream.as_mut());
        // No records, and no second flip either.
        assert!(events.is_empty());
    }

    #[test]
    fn copy_state_resumes_mid_snapshot() {
        let mut reader = scripted(&["db.a", "db.a", "db.a"]);
        let states = vec![State {
            identifier: Some(snapshot_identifier(0)),
            timestamp: 1,
            namespace: Namespace::new("db.a"),
            phase: SyncPhase::Copy,
        }];
        let mut stream = reader.start(states).unwrap();
        let events = collect(stream.as_mut());

        // Record 0 already delivered; 1 and 2 remain, then the flip.
        assert_eq!(events.len(), 3);
        let ReaderEvent::Record { state_after, .. } = &events[0] else {
            panic!("expected record");
        };
        assert_eq!(state_after.identifier, Some(snapshot_identifier(1)));
    }

    #[test]
    fn from_config_builds_typed_data() {
        let config = serde_json::json!({
            "messages": [
                {"namespace": "db.users", "data": {"id": 1, "name": "ada"}},
                {"namespace": "db.users", "op": "delete", "data": {"id": 1}},
            ]
        });
        let mut reader = MemoryReader::from_config(&config).unwrap();
        let mut stream = reader.start(Vec::new()).unwrap();
        let events = collect(stream.as_mut());
        assert_eq!(events.len(), 3);
        let ReaderEvent::Record { message, .. } = &events[1] else {
            panic!("expected record");
        };
        assert_eq!(message.op, Op::Delete);
        assert_eq!(message.data.get("id"), Some(&Value::Int(1)));
    }

    #[test]
    fn writer_collects_batches() {
        let (mut writer, sink) = MemoryWriter::shared();
        let batch = vec![Message::new(Op::Insert, Namespace::new("db.a"))];
        assert!(matches!(writer.bulk_write(&batch), BulkOutcome::Ok));
        writer.close();
        writer.close();

        let sink = sink.lock().unwrap();
        assert_eq!(sink.batches.len(), 1);
        assert_eq!(sink.closes, 2);
    }

    #[test]
    fn writer_full_failure() {
        let (writer, sink) = MemoryWriter::shared();
        let mut writer = writer.failing_after(1, false);
        let batch: Vec<Message> = (0..3)
            .map(|_| Message::new(Op::Insert, Namespace::new("db.a")))
            .collect();
        assert!(matches!(
            writer.bulk_write(&batch),
            BulkOutcome::Failed { .. }
        ));
        assert!(sink.lock().unwrap().batches.is_empty());
    }

    #[test]
    fn writer_partial_failure_names_the_tail() {
        let (writer, sink) = MemoryWriter::shared();
        let mut writer = writer.failing_after(2, true);
        let batch: Vec<Message> = (0..4)
            .map(|_| Message::new(Op::Insert, Namespace::new("db.a")))
            .collect();
        let BulkOutcome::Partial { failed } = writer.bulk_write(&batch) else {
            panic!("expected partial failure");
        };
        let indices: Vec<usize> = failed.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![2, 3]);
        // The surviving prefix landed in the sink.
        assert_eq!(sink.lock().unwrap().messages().len(), 2);
    }
}

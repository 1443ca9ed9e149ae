//! Step lifecycle events
//!
//! [`EventEmitter`] is an append-only log shared by every run. Emitting
//! never blocks on subscribers and never fails the workflow. Subscribers
//! read through their own cursor, so a slow reader never loses events that
//! are still retained.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context as TaskContext, Poll};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::PipelineStep;

/// Events kept in memory when no other limit is configured
pub const DEFAULT_EVENT_RETENTION: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    Start,
    Retry,
    Complete,
    Error,
    Skipped,
}

impl StepPhase {
    /// Phases that close a started step
    pub fn is_settled(&self) -> bool {
        matches!(self, StepPhase::Complete | StepPhase::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    /// Position in the emitter's global log
    pub sequence: u64,
    pub workflow_id: Uuid,
    pub step: PipelineStep,
    pub phase: StepPhase,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Default)]
struct EventLog {
    events: VecDeque<StepEvent>,
    /// Sequence of the oldest retained event
    first_sequence: u64,
    next_sequence: u64,
}

/// Shared, ordered sink of step events
#[derive(Debug)]
pub struct EventEmitter {
    log: RwLock<EventLog>,
    retain: Option<usize>,
    notify: watch::Sender<u64>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    /// Emitter that retains every event for its whole lifetime. Long-lived
    /// processes should use [`with_retention`](Self::with_retention).
    pub fn new() -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            log: RwLock::new(EventLog::default()),
            retain: None,
            notify,
        }
    }

    /// Keep at most `limit` events; older ones are discarded on append
    pub fn with_retention(limit: usize) -> Self {
        Self {
            retain: Some(limit.max(1)),
            ..Self::new()
        }
    }

    /// Append an event and return its sequence number
    pub fn emit(
        &self,
        workflow_id: Uuid,
        step: PipelineStep,
        phase: StepPhase,
        payload: Option<Value>,
    ) -> u64 {
        let sequence = {
            let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
            let sequence = log.next_sequence;
            log.next_sequence += 1;
            log.events.push_back(StepEvent {
                sequence,
                workflow_id,
                step,
                phase,
                timestamp: Utc::now(),
                payload,
            });

            if let Some(limit) = self.retain {
                while log.events.len() > limit {
                    log.events.pop_front();
                    log.first_sequence += 1;
                }
            }
            sequence
        };

        debug!(
            "Emitted step event #{} {}:{:?} for workflow {}",
            sequence, step, phase, workflow_id
        );
        self.notify.send_replace(sequence + 1);
        sequence
    }

    /// Number of retained events
    pub fn len(&self) -> usize {
        self.read_log().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every retained event in sequence order
    pub fn snapshot(&self) -> Vec<StepEvent> {
        self.read_log().events.iter().cloned().collect()
    }

    /// Retained events of one workflow run
    pub fn events_for(&self, workflow_id: Uuid) -> Vec<StepEvent> {
        self.read_log()
            .events
            .iter()
            .filter(|event| event.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    /// Open a stream over the log starting at the oldest retained event.
    /// The stream never ends; it waits for new events once caught up.
    pub fn subscribe(self: &Arc<Self>, workflow_id: Option<Uuid>) -> Subscription {
        let cursor = Cursor {
            emitter: Arc::clone(self),
            position: 0,
            filter: workflow_id,
            notify: self.notify.subscribe(),
        };

        let inner = stream::unfold(cursor, |mut cursor| async move {
            loop {
                cursor.notify.borrow_and_update();
                if let Some(event) = cursor.advance() {
                    return Some((event, cursor));
                }
                if cursor.notify.changed().await.is_err() {
                    return None;
                }
            }
        })
        .boxed();

        Subscription { inner }
    }

    fn read_log(&self) -> std::sync::RwLockReadGuard<'_, EventLog> {
        self.log.read().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Cursor {
    emitter: Arc<EventEmitter>,
    position: u64,
    filter: Option<Uuid>,
    notify: watch::Receiver<u64>,
}

impl Cursor {
    fn advance(&mut self) -> Option<StepEvent> {
        let log = self.emitter.read_log();
        let start = self.position.saturating_sub(log.first_sequence) as usize;

        let found = log
            .events
            .iter()
            .skip(start)
            .find(|event| self.filter.map_or(true, |id| id == event.workflow_id))
            .cloned();

        self.position = match &found {
            Some(event) => event.sequence + 1,
            None => log.next_sequence,
        };
        found
    }
}

/// Ordered stream of step events with its own read position
pub struct Subscription {
    inner: BoxStream<'static, StepEvent>,
}

impl Stream for Subscription {
    type Item = StepEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Destination for persisted step events
#[async_trait]
pub trait EventWriter: Send + Sync {
    async fn write(&self, events: &[StepEvent]) -> Result<()>;

    async fn flush(&self) -> Result<()>;
}

/// Appends each event as one JSON line
pub struct JsonlEventWriter {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlEventWriter {
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create event log directory")?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open event log {}", path.display()))?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventWriter for JsonlEventWriter {
    async fn write(&self, events: &[StepEvent]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        for event in events {
            let mut line = serde_json::to_vec(event)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }
}

/// Forward every event of `events` to `writer` in a background task until
/// the stream ends. Write failures are logged and skipped.
pub fn spawn_event_writer<S, W>(mut events: S, writer: W) -> JoinHandle<()>
where
    S: Stream<Item = StepEvent> + Send + Unpin + 'static,
    W: EventWriter + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let written = match writer.write(std::slice::from_ref(&event)).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                warn!("Failed to persist step event #{}: {:#}", event.sequence, e);
            }
        }
        debug!("Event writer stopped");
    })
}

//! List-then-watch change streams over a store prefix.
//!
//! [`ListWatch`] delivers an event-consistent stream of changes for a key
//! prefix and survives transient store disconnects without losing events.
//! Each session snapshots the prefix (emitting the current state), anchors
//! a watch to the revision the snapshot returned, and forwards watch
//! events until the stream breaks. On any failure the session is dropped
//! and, after an exponential backoff, a fresh snapshot re-establishes the
//! baseline, so nothing committed during the outage is silently skipped.
//! Consumers must therefore be idempotent: after a reconnect they may see
//! a state they already observed, re-emitted as Added or Modified.

use std::time::Duration;

use common::retry::{self, RetryOptions};
use etcd_client::{Client, ConnectOptions, EventType as EtcdEventType, GetOptions, WatchOptions};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const ERROR_SEND_ATTEMPTS: u32 = 3;
const ERROR_SEND_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A key that did not exist before, or an existing key seen by the
    /// initial snapshot.
    Added,
    /// A key that was overwritten, or a snapshot entry the store reports
    /// as modified since creation.
    Modified,
    Deleted,
    /// A synthetic event describing a stream interruption; the diagnostic
    /// is carried in `value`.
    Error,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub key: String,
    pub value: Vec<u8>,
    pub prefix: String,
}

impl Event {
    fn error(message: String, prefix: &str) -> Self {
        Self {
            event_type: EventType::Error,
            key: String::new(),
            value: message.into_bytes(),
            prefix: prefix.to_string(),
        }
    }

    /// Every emitted event has a prefix, and a key unless it is an error.
    fn is_valid(&self) -> bool {
        if self.prefix.is_empty() {
            return false;
        }
        self.event_type == EventType::Error || !self.key.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ListWatchOptions {
    pub dial_timeout: Duration,
    pub retry: RetryOptions,
    pub event_channel_buffer: usize,
}

impl Default for ListWatchOptions {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
            retry: RetryOptions::default(),
            event_channel_buffer: 100,
        }
    }
}

/// Knows how to list and watch one key prefix. Each call to
/// [`ListWatch::list_and_watch`] owns an independent store session.
pub struct ListWatch {
    endpoints: Vec<String>,
    prefix: String,
    opts: ListWatchOptions,
}

impl ListWatch {
    pub fn new(
        endpoints: Vec<String>,
        prefix: impl Into<String>,
        opts: ListWatchOptions,
    ) -> anyhow::Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            anyhow::bail!("watch prefix cannot be empty");
        }
        Ok(Self {
            endpoints,
            prefix,
            opts,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Starts the list-then-watch loop on a background task.
    ///
    /// The returned receiver yields events until the handle is cancelled
    /// or dropped; the channel closes only after the loop has released its
    /// store session. The caller owns the handle and must call
    /// [`ListWatchHandle::cancel`] to release resources deterministically.
    pub fn list_and_watch(&self) -> (mpsc::Receiver<Event>, ListWatchHandle) {
        let (tx, rx) = mpsc::channel(self.opts.event_channel_buffer);
        let (stop_tx, stop_rx) = watch::channel(false);
        let session = WatchLoop {
            endpoints: self.endpoints.clone(),
            prefix: self.prefix.clone(),
            opts: self.opts.clone(),
            tx,
            stop: stop_rx,
            client: None,
        };
        let task = tokio::spawn(session.run());
        (
            rx,
            ListWatchHandle {
                stop: stop_tx,
                task: Some(task),
            },
        )
    }
}

/// Cancellation handle for one [`ListWatch::list_and_watch`] loop.
pub struct ListWatchHandle {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ListWatchHandle {
    /// Signals the loop to stop and waits for it to release the store
    /// session and close the event channel. Calling this again is a no-op.
    pub async fn cancel(&mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

enum SessionEnd {
    /// Cancellation was requested or the consumer went away.
    Stopped,
    /// The session broke; `listed` records whether the snapshot succeeded,
    /// which resets the backoff.
    Failed { listed: bool },
}

enum SendOutcome {
    Delivered,
    Stopped,
}

struct WatchLoop {
    endpoints: Vec<String>,
    prefix: String,
    opts: ListWatchOptions,
    tx: mpsc::Sender<Event>,
    stop: watch::Receiver<bool>,
    client: Option<Client>,
}

impl WatchLoop {
    async fn run(mut self) {
        let mut delay = self.opts.retry.initial_delay;
        loop {
            if *self.stop.borrow() {
                break;
            }
            match self.session().await {
                SessionEnd::Stopped => break,
                SessionEnd::Failed { listed } => {
                    self.client = None;
                    if listed {
                        delay = self.opts.retry.initial_delay;
                    }
                    let stopped = tokio::select! {
                        _ = self.stop.changed() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if stopped {
                        break;
                    }
                    delay = self.opts.retry.next_delay(delay);
                }
            }
        }
        // Best-effort terminating event so a consumer blocked on recv
        // learns why the channel is about to close.
        self.try_send_error("listwatch stopped: cancelled".to_string())
            .await;
        self.client = None;
        log::info!(target: "mks::listwatch", "listwatch loop for {} stopped", self.prefix);
    }

    /// One connect-list-watch session. Returns when the session breaks,
    /// the consumer disappears, or cancellation is requested.
    async fn session(&mut self) -> SessionEnd {
        if self.client.is_none() {
            let options = ConnectOptions::new().with_connect_timeout(self.opts.dial_timeout);
            match Client::connect(&self.endpoints, Some(options)).await {
                Ok(client) => self.client = Some(client),
                Err(e) => {
                    log::error!(target: "mks::listwatch", "failed to connect to store: {e}");
                    self.try_send_error(format!("failed to connect to store: {e}"))
                        .await;
                    return SessionEnd::Failed { listed: false };
                }
            }
        }

        // Snapshot the prefix. The response header carries the store-wide
        // revision the snapshot reflects; the watch below starts right
        // after it.
        let listed = {
            let Some(client) = self.client.as_mut() else {
                return SessionEnd::Failed { listed: false };
            };
            client
                .get(self.prefix.clone(), Some(GetOptions::new().with_prefix()))
                .await
        };
        let snapshot = match listed {
            Ok(resp) => resp,
            Err(e) => {
                log::error!(target: "mks::listwatch", "failed to list {}: {e}", self.prefix);
                self.try_send_error(format!("failed to list {}: {e}", self.prefix))
                    .await;
                self.client = None;
                return SessionEnd::Failed { listed: false };
            }
        };
        let revision = snapshot.header().map(|h| h.revision()).unwrap_or(0);
        for kv in snapshot.kvs() {
            let event_type = if kv.create_revision() != kv.mod_revision() {
                EventType::Modified
            } else {
                EventType::Added
            };
            let event = Event {
                event_type,
                key: String::from_utf8_lossy(kv.key()).to_string(),
                value: kv.value().to_vec(),
                prefix: self.prefix.clone(),
            };
            if let SendOutcome::Stopped = self.send(event).await {
                return SessionEnd::Stopped;
            }
        }

        let started = {
            let Some(client) = self.client.as_mut() else {
                return SessionEnd::Failed { listed: true };
            };
            let options = WatchOptions::new()
                .with_prefix()
                .with_prev_key()
                .with_start_revision(revision + 1);
            client.watch(self.prefix.clone(), Some(options)).await
        };
        let (mut watcher, mut stream) = match started {
            Ok(pair) => pair,
            Err(e) => {
                log::error!(target: "mks::listwatch", "failed to start watch on {}: {e}", self.prefix);
                self.try_send_error(format!("failed to start watch on {}: {e}", self.prefix))
                    .await;
                self.client = None;
                return SessionEnd::Failed { listed: true };
            }
        };
        log::info!(
            target: "mks::listwatch",
            "watching {} from revision {}",
            self.prefix,
            revision + 1
        );

        loop {
            let message = tokio::select! {
                _ = self.stop.changed() => None,
                msg = stream.message() => Some(msg),
            };
            let Some(message) = message else {
                let _ = watcher.cancel().await;
                return SessionEnd::Stopped;
            };
            match message {
                Ok(Some(resp)) => {
                    if resp.canceled() {
                        self.try_send_error("watch cancelled by the store".to_string())
                            .await;
                        self.client = None;
                        return SessionEnd::Failed { listed: true };
                    }
                    for raw in resp.events() {
                        let Some(event) = self.convert(raw) else {
                            continue;
                        };
                        if let SendOutcome::Stopped = self.send(event).await {
                            return SessionEnd::Stopped;
                        }
                    }
                }
                Ok(None) => {
                    log::error!(
                        target: "mks::listwatch",
                        "watch channel for {} closed unexpectedly",
                        self.prefix
                    );
                    self.try_send_error("watch channel closed unexpectedly".to_string())
                        .await;
                    self.client = None;
                    return SessionEnd::Failed { listed: true };
                }
                Err(e) => {
                    log::error!(target: "mks::listwatch", "watch stream error on {}: {e}", self.prefix);
                    self.try_send_error(format!("watch stream error: {e}")).await;
                    self.client = None;
                    return SessionEnd::Failed { listed: true };
                }
            }
        }
    }

    fn convert(&self, event: &etcd_client::Event) -> Option<Event> {
        let kv = event.kv()?;
        let event_type = match event.event_type() {
            EtcdEventType::Put => {
                if event.prev_kv().is_some() {
                    EventType::Modified
                } else {
                    EventType::Added
                }
            }
            EtcdEventType::Delete => EventType::Deleted,
        };
        Some(Event {
            event_type,
            key: String::from_utf8_lossy(kv.key()).to_string(),
            value: kv.value().to_vec(),
            prefix: self.prefix.clone(),
        })
    }

    /// Delivers one event, blocking while the channel is full but yielding
    /// to cancellation. Malformed events are dropped instead of sent.
    async fn send(&mut self, event: Event) -> SendOutcome {
        if !event.is_valid() {
            log::warn!(
                target: "mks::listwatch",
                "dropping malformed {:?} event for {}",
                event.event_type,
                self.prefix
            );
            return SendOutcome::Delivered;
        }
        let permit = tokio::select! {
            _ = self.stop.changed() => return SendOutcome::Stopped,
            permit = self.tx.reserve() => permit,
        };
        match permit {
            Ok(permit) => {
                permit.send(event);
                SendOutcome::Delivered
            }
            Err(_) => SendOutcome::Stopped,
        }
    }

    /// Error events must not deadlock a slow consumer: a few quick
    /// non-blocking attempts, then the event is dropped and the session
    /// torn down instead of blocking forever.
    async fn try_send_error(&self, message: String) {
        let event = Event::error(message, &self.prefix);
        let sent = retry::with_retries(ERROR_SEND_ATTEMPTS, ERROR_SEND_DELAY, || {
            let event = event.clone();
            let tx = self.tx.clone();
            async move {
                match tx.try_send(event) {
                    Ok(()) => Ok(()),
                    // Consumer is gone; nothing left to notify.
                    Err(mpsc::error::TrySendError::Closed(_)) => Ok(()),
                    Err(mpsc::error::TrySendError::Full(_)) => Err(()),
                }
            }
        })
        .await;
        if sent.is_err() {
            log::warn!(
                target: "mks::listwatch",
                "dropped error event for {}: consumer not keeping up",
                self.prefix
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_prefix() {
        let result = ListWatch::new(
            vec!["localhost:2379".to_string()],
            "",
            ListWatchOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn default_options() {
        let opts = ListWatchOptions::default();
        assert_eq!(opts.dial_timeout, Duration::from_secs(5));
        assert_eq!(opts.event_channel_buffer, 100);
        assert_eq!(opts.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(opts.retry.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn event_validation() {
        let valid = Event {
            event_type: EventType::Added,
            key: "/t/k1".to_string(),
            value: b"v".to_vec(),
            prefix: "/t/".to_string(),
        };
        assert!(valid.is_valid());

        let keyless = Event {
            key: String::new(),
            ..valid.clone()
        };
        assert!(!keyless.is_valid());

        // Error events have no key by design.
        let error = Event::error("boom".to_string(), "/t/");
        assert!(error.is_valid());

        let prefixless = Event {
            prefix: String::new(),
            ..valid
        };
        assert!(!prefixless.is_valid());
    }

    #[tokio::test]
    async fn unreachable_store_emits_error_events_and_cancel_closes_channel() {
        // Nothing listens on this port; every connect attempt fails fast.
        let opts = ListWatchOptions {
            dial_timeout: Duration::from_millis(200),
            retry: RetryOptions {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
            },
            event_channel_buffer: 10,
        };
        let lw = ListWatch::new(vec!["127.0.0.1:1".to_string()], "/t/", opts).unwrap();
        let (mut events, mut handle) = lw.list_and_watch();

        let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("expected an event before the timeout")
            .expect("channel should stay open while retrying");
        assert_eq!(first.event_type, EventType::Error);
        assert!(first.key.is_empty());
        assert_eq!(first.prefix, "/t/");
        assert!(!first.value.is_empty());

        handle.cancel().await;
        // Cancellation drains to channel close; only error events remain.
        while let Some(event) = events.recv().await {
            assert_eq!(event.event_type, EventType::Error);
        }
        // A second cancel is a no-op.
        handle.cancel().await;
    }
}

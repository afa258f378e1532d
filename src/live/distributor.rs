//! Fan-out of transcript changes to live viewers.
//!
//! Each watched session owns one slot: a single `notify` watcher on its
//! transcript, one dispatch task, and the list of current subscribers. A
//! change is re-parsed once per burst and only the messages beyond the last
//! known count are pushed, followed by a status event when the derived
//! status moved. Slots are reference-counted by their subscribers and torn
//! down when the last [`Subscription`] goes away.
//!
//! Locking: the slot map lock is only held for lookups and removal. All
//! per-session mutation (subscribe, release, dispatch) happens under that
//! slot's own lock, so sessions never wait on each other. When both locks
//! are needed the slot lock is taken first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{WatcherEvent, WatcherEventKind};
use crate::session::status::{evaluate, StatusThresholds};
use crate::session::SessionStatus;
use crate::transcript::{parse_session_file, Message};

type SubscriberId = u64;

/// Shared registry of live session watches.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Distributor {
    inner: Arc<Inner>,
}

struct Inner {
    slots: Mutex<HashMap<String, Arc<WatchSlot>>>,
    thresholds: StatusThresholds,
    next_subscriber: AtomicU64,
    dispatches: AtomicU64,
}

struct WatchSlot {
    session_id: String,
    path: PathBuf,
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<WatcherEvent>>,
    known_count: usize,
    last_status: Option<SessionStatus>,
    watch: Option<ActiveWatch>,
    /// Set once the slot is torn down; a closed slot is never reused.
    closed: bool,
}

/// Keeps the OS watch and the dispatch task alive together.
struct ActiveWatch {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for ActiveWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// What the notify callback forwards to the dispatch task.
enum Signal {
    Changed,
    Failed(String),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Distributor {
    pub fn new(thresholds: StatusThresholds) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                thresholds,
                next_subscriber: AtomicU64::new(1),
                dispatches: AtomicU64::new(0),
            }),
        }
    }

    /// Register interest in a session's transcript.
    ///
    /// The first subscriber for a session starts the watch; later ones share
    /// it. Events cover only what changes after this call. Must be called
    /// from within a tokio runtime.
    pub fn subscribe(&self, session_id: &str, path: &Path) -> Result<Subscription> {
        loop {
            let slot = {
                let mut slots = lock(&self.inner.slots);
                slots
                    .entry(session_id.to_string())
                    .or_insert_with(|| {
                        Arc::new(WatchSlot {
                            session_id: session_id.to_string(),
                            path: path.to_path_buf(),
                            state: Mutex::new(SlotState::default()),
                        })
                    })
                    .clone()
            };

            let mut state = lock(&slot.state);
            if state.closed {
                // Released between lookup and lock; the map no longer holds it.
                continue;
            }

            if state.watch.is_none() {
                if let Err(e) = self.start_watch(&slot, &mut state) {
                    if state.subscribers.is_empty() {
                        self.inner.close_slot(&slot, &mut state);
                    }
                    return Err(e);
                }
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let subscriber_id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
            state.subscribers.insert(subscriber_id, tx);
            info!(
                "session {session_id}: subscriber {subscriber_id} attached ({} total)",
                state.subscribers.len()
            );
            drop(state);

            return Ok(Subscription {
                subscriber_id,
                events: rx,
                slot,
                inner: self.inner.clone(),
            });
        }
    }

    /// Whether a watch is currently held for the session.
    pub fn is_watching(&self, session_id: &str) -> bool {
        lock(&self.inner.slots).contains_key(session_id)
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        let slot = lock(&self.inner.slots).get(session_id).cloned();
        slot.map(|s| lock(&s.state).subscribers.len()).unwrap_or(0)
    }

    /// Number of sessions being watched.
    pub fn watch_count(&self) -> usize {
        lock(&self.inner.slots).len()
    }

    /// Total dispatch passes run so far, across all sessions.
    pub fn dispatch_count(&self) -> u64 {
        self.inner.dispatches.load(Ordering::Relaxed)
    }

    /// Attach the OS watch and spawn the dispatch task, then take the
    /// baseline that later changes are diffed against.
    fn start_watch(&self, slot: &Arc<WatchSlot>, state: &mut SlotState) -> Result<()> {
        // `notify` callbacks are sync; bridge to async with an unbounded channel.
        let (signal_tx, signal_rx) = mpsc::unbounded_channel::<Signal>();
        let session_id = slot.session_id.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = signal_tx.send(Signal::Changed);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("session {session_id}: notify error: {e}");
                    let _ = signal_tx.send(Signal::Failed(e.to_string()));
                }
            }
        })
        .context("failed to create file watcher")?;

        watcher
            .watch(&slot.path, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", slot.path.display()))?;

        let content = std::fs::read_to_string(&slot.path)
            .with_context(|| format!("failed to read {}", slot.path.display()))?;
        let messages = parse_session_file(&content);
        let modified = std::fs::metadata(&slot.path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        state.known_count = messages.len();
        state.last_status = Some(evaluate(
            &messages,
            modified,
            Utc::now(),
            self.inner.thresholds,
        ));

        let task = tokio::spawn(dispatch_loop(slot.clone(), self.inner.clone(), signal_rx));
        state.watch = Some(ActiveWatch {
            _watcher: watcher,
            task,
        });
        debug!(
            "session {}: watching {} ({} messages)",
            slot.session_id,
            slot.path.display(),
            state.known_count
        );
        Ok(())
    }
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new(StatusThresholds::default())
    }
}

impl Inner {
    fn release(&self, slot: &Arc<WatchSlot>, subscriber_id: SubscriberId) {
        let mut state = lock(&slot.state);
        if state.subscribers.remove(&subscriber_id).is_none() {
            return;
        }
        info!(
            "session {}: subscriber {subscriber_id} detached ({} left)",
            slot.session_id,
            state.subscribers.len()
        );

        if state.subscribers.is_empty() {
            self.close_slot(slot, &mut state);
        }
    }

    /// Drop the watch and unregister the slot. Caller holds the slot lock.
    fn close_slot(&self, slot: &Arc<WatchSlot>, state: &mut SlotState) {
        state.closed = true;
        state.watch = None;

        let mut slots = lock(&self.slots);
        if slots
            .get(&slot.session_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(&slot.session_id);
        }
        debug!("session {}: watch released", slot.session_id);
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

async fn dispatch_loop(
    slot: Arc<WatchSlot>,
    inner: Arc<Inner>,
    mut signals: mpsc::UnboundedReceiver<Signal>,
) {
    while let Some(first) = signals.recv().await {
        // Coalesce a burst of notifications into a single pass.
        let mut changed = false;
        let mut failures = Vec::new();
        let mut next = Some(first);
        while let Some(signal) = next {
            match signal {
                Signal::Changed => changed = true,
                Signal::Failed(e) => failures.push(e),
            }
            next = signals.try_recv().ok();
        }

        inner.dispatches.fetch_add(1, Ordering::Relaxed);

        for failure in failures {
            slot.broadcast(vec![WatcherEventKind::Error(failure)]);
        }

        if !changed {
            continue;
        }

        match reload(&slot.path).await {
            Ok((messages, modified)) => slot.apply(&messages, modified, inner.thresholds),
            Err(e) => {
                warn!("session {}: re-parse failed: {e:#}", slot.session_id);
                slot.broadcast(vec![WatcherEventKind::Error(format!("{e:#}"))]);
            }
        }
    }
    debug!("session {}: dispatch loop finished", slot.session_id);
}

async fn reload(path: &Path) -> Result<(Vec<Message>, DateTime<Utc>)> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let modified = tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .with_context(|| format!("no modification time for {}", path.display()))?;
    Ok((parse_session_file(&content), DateTime::<Utc>::from(modified)))
}

impl WatchSlot {
    /// Diff a fresh parse against the last known state and push the result.
    fn apply(&self, messages: &[Message], modified: DateTime<Utc>, thresholds: StatusThresholds) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }

        if messages.len() < state.known_count {
            // Rewritten or truncated; restart the count without replaying history.
            debug!(
                "session {}: transcript shrank from {} to {} messages",
                self.session_id,
                state.known_count,
                messages.len()
            );
            state.known_count = messages.len();
        }

        let mut events: Vec<WatcherEventKind> = messages[state.known_count..]
            .iter()
            .cloned()
            .map(WatcherEventKind::Message)
            .collect();
        state.known_count = messages.len();

        let status = evaluate(messages, Some(modified), Utc::now(), thresholds);
        if state.last_status != Some(status) {
            state.last_status = Some(status);
            events.push(WatcherEventKind::Status(status));
        }

        fan_out(&self.session_id, &state, events);
    }

    fn broadcast(&self, events: Vec<WatcherEventKind>) {
        let state = lock(&self.state);
        if !state.closed {
            fan_out(&self.session_id, &state, events);
        }
    }
}

fn fan_out(session_id: &str, state: &SlotState, events: Vec<WatcherEventKind>) {
    for kind in events {
        let event = WatcherEvent::new(session_id, kind);
        for tx in state.subscribers.values() {
            // A closed receiver is about to be released by its own drop.
            let _ = tx.send(event.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// A live viewer's registration. Dropping it unsubscribes.
pub struct Subscription {
    subscriber_id: SubscriberId,
    events: mpsc::UnboundedReceiver<WatcherEvent>,
    slot: Arc<WatchSlot>,
    inner: Arc<Inner>,
}

impl Subscription {
    pub fn session_id(&self) -> &str {
        &self.slot.session_id
    }

    /// Next event for this subscriber. `None` only if the watch went away.
    pub async fn recv(&mut self) -> Option<WatcherEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.release(&self.slot, self.subscriber_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::time::{sleep, timeout};

    const USER_LINE: &str = r#"{"type":"user","uuid":"u1","message":{"content":"start"}}"#;

    fn transcript(lines: &[&str]) -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s1.jsonl");
        let mut body = lines.join("\n");
        body.push('\n');
        fs::write(&path, body).unwrap();
        (dir, path)
    }

    fn append(path: &Path, line: &str) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(format!("{line}\n").as_bytes()).unwrap();
        file.sync_all().unwrap();
    }

    fn assistant_line(uuid: &str, text: &str) -> String {
        format!(
            r#"{{"type":"assistant","uuid":"{uuid}","message":{{"content":[{{"type":"text","text":"{text}"}}]}}}}"#
        )
    }

    async fn next_message(sub: &mut Subscription) -> Message {
        loop {
            let event = timeout(Duration::from_secs(5), sub.recv())
                .await
                .expect("timed out waiting for event")
                .expect("channel closed");
            if let WatcherEventKind::Message(m) = event.kind {
                return m;
            }
        }
    }

    /// Collect whatever else arrives within a short window.
    async fn drain(sub: &mut Subscription) -> Vec<WatcherEvent> {
        let mut rest = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_millis(300), sub.recv()).await {
            rest.push(event);
        }
        rest
    }

    fn message_ids(events: &[WatcherEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match &e.kind {
                WatcherEventKind::Message(m) => Some(m.id.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn subscribers_share_one_watch_and_each_get_every_message_once() {
        let (_dir, path) = transcript(&[USER_LINE]);
        let distributor = Distributor::default();

        let mut a = distributor.subscribe("s1", &path).unwrap();
        let mut b = distributor.subscribe("s1", &path).unwrap();
        assert_eq!(distributor.watch_count(), 1);
        assert_eq!(distributor.subscriber_count("s1"), 2);

        append(&path, &assistant_line("a1", "first reply"));
        assert_eq!(next_message(&mut a).await.id, "a1");
        assert_eq!(next_message(&mut b).await.id, "a1");

        append(&path, &assistant_line("a2", "second reply"));
        assert_eq!(next_message(&mut a).await.id, "a2");
        assert_eq!(next_message(&mut b).await.id, "a2");

        assert!(message_ids(&drain(&mut a).await).is_empty());
        assert!(message_ids(&drain(&mut b).await).is_empty());
        assert_eq!(a.session_id(), "s1");
    }

    #[tokio::test]
    async fn history_is_never_replayed() {
        let (_dir, path) = transcript(&[USER_LINE, &assistant_line("old", "earlier")]);
        let distributor = Distributor::default();
        let mut sub = distributor.subscribe("s1", &path).unwrap();

        append(&path, &assistant_line("new", "later"));
        assert_eq!(next_message(&mut sub).await.id, "new");
        assert!(message_ids(&drain(&mut sub).await).is_empty());
    }

    #[tokio::test]
    async fn status_transition_is_published() {
        let (_dir, path) = transcript(&[USER_LINE]);
        let distributor = Distributor::default();
        let mut sub = distributor.subscribe("s1", &path).unwrap();

        append(
            &path,
            r#"{"type":"assistant","uuid":"q","message":{"content":[{"type":"tool_use","id":"t1","name":"AskUserQuestion","input":{}}]}}"#,
        );

        assert_eq!(next_message(&mut sub).await.id, "q");
        let rest = drain(&mut sub).await;
        let statuses: Vec<SessionStatus> = rest
            .iter()
            .filter_map(|e| match e.kind {
                WatcherEventKind::Status(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![SessionStatus::Awaiting]);
    }

    #[tokio::test]
    async fn unreadable_update_surfaces_as_error_event() {
        let (_dir, path) = transcript(&[USER_LINE]);
        let distributor = Distributor::default();
        let mut sub = distributor.subscribe("s1", &path).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xff, 0xfe, b'\n']).unwrap();
        file.sync_all().unwrap();

        let event = timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out")
            .expect("closed");
        assert!(matches!(event.kind, WatcherEventKind::Error(_)), "got {event:?}");
        // The watch survives the failure.
        assert!(distributor.is_watching("s1"));
    }

    #[tokio::test]
    async fn last_release_tears_the_watch_down() {
        let (_dir, path) = transcript(&[USER_LINE]);
        let distributor = Distributor::default();

        let a = distributor.subscribe("s1", &path).unwrap();
        let b = distributor.subscribe("s1", &path).unwrap();

        drop(a);
        assert!(distributor.is_watching("s1"));
        assert_eq!(distributor.subscriber_count("s1"), 1);

        b.unsubscribe();
        assert!(!distributor.is_watching("s1"));
        assert_eq!(distributor.watch_count(), 0);

        sleep(Duration::from_millis(100)).await;
        let before = distributor.dispatch_count();
        append(&path, &assistant_line("late", "nobody listening"));
        sleep(Duration::from_millis(500)).await;
        assert_eq!(distributor.dispatch_count(), before);
    }

    #[tokio::test]
    async fn resubscribing_after_release_starts_fresh() {
        let (_dir, path) = transcript(&[USER_LINE]);
        let distributor = Distributor::default();

        drop(distributor.subscribe("s1", &path).unwrap());
        assert!(!distributor.is_watching("s1"));

        let mut sub = distributor.subscribe("s1", &path).unwrap();
        append(&path, &assistant_line("a1", "hello again"));
        assert_eq!(next_message(&mut sub).await.id, "a1");
    }

    #[tokio::test]
    async fn failed_watch_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let distributor = Distributor::default();

        let result = distributor.subscribe("ghost", &dir.path().join("missing.jsonl"));
        assert!(result.is_err());
        assert!(!distributor.is_watching("ghost"));
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let (_d1, p1) = transcript(&[USER_LINE]);
        let (_d2, p2) = transcript(&[USER_LINE]);
        let distributor = Distributor::default();

        let mut one = distributor.subscribe("one", &p1).unwrap();
        let mut two = distributor.subscribe("two", &p2).unwrap();
        assert_eq!(distributor.watch_count(), 2);

        append(&p2, &assistant_line("b1", "for two"));
        let m = next_message(&mut two).await;
        assert_eq!(m.id, "b1");
        assert!(message_ids(&drain(&mut one).await).is_empty());

        drop(two);
        assert!(distributor.is_watching("one"));
        assert!(!distributor.is_watching("two"));
        assert_eq!(one.session_id(), "one");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_subscribe_and_release_settle_to_no_watch() {
        let (_dir, path) = transcript(&[USER_LINE]);
        let distributor = Distributor::default();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let distributor = distributor.clone();
            let path = path.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..5 {
                    let sub = distributor.subscribe("s1", &path).unwrap();
                    tokio::task::yield_now().await;
                    drop(sub);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(!distributor.is_watching("s1"));
        assert_eq!(distributor.subscriber_count("s1"), 0);
    }
}

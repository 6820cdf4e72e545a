//! Server push channel.
//!
//! The server streams page snapshots as Server-Sent Events. This module
//! holds the line decoder, the typed [`PushEvent`]s, the reconnect policy
//! ([`ChannelController`]) and the task that drives a subscription
//! ([`PushChannel`]).
//!
//! ```text
//! bytes ──▶ SseDecoder ──▶ SseFrame ──▶ PushEvent ──▶ ChannelController
//!                                          │               │
//!                                          ▼               ▼
//!                                    pages to session   connect / retry
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use comic_core::PageRecord;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{RemoteError, RemoteResult};

/// Boxed stream of decoded push events.
pub type PushStream = BoxStream<'static, RemoteResult<PushEvent>>;

/// Something that can open a push subscription.
#[async_trait]
pub trait PushSource: Send + Sync {
    /// Open a new subscription.
    async fn subscribe(&self) -> RemoteResult<PushStream>;
}

// ============================================================================
// SSE decoding
// ============================================================================

/// One dispatched Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name, `message` when the stream did not name one.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id and retry carry nothing the session uses
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

/// Typed event from the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// The server's current pages.
    Pages(Vec<PageRecord>),
    /// The server is closing the stream on purpose.
    Keepalive,
    /// The server reported a stream failure.
    Error(String),
}

#[derive(Debug, Deserialize)]
struct PagesPayload {
    #[serde(default)]
    pages: Option<Vec<PageRecord>>,
}

impl PushEvent {
    /// Interpret a frame. Unknown events and empty `pages` frames yield
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Json`] for a `pages` frame whose data is not
    /// a page payload.
    pub fn from_frame(frame: &SseFrame) -> RemoteResult<Option<Self>> {
        match frame.event.as_str() {
            "pages" => {
                if frame.data.trim().is_empty() {
                    return Ok(None);
                }
                let payload: PagesPayload = serde_json::from_str(&frame.data)?;
                Ok(Some(Self::Pages(payload.pages.unwrap_or_default())))
            }
            "keepalive" => Ok(Some(Self::Keepalive)),
            "error" => Ok(Some(Self::Error(frame.data.clone()))),
            other => {
                debug!(event = other, "Ignoring push event");
                Ok(None)
            }
        }
    }
}

/// Turn a byte stream (e.g. an HTTP response body) into push events.
///
/// A malformed `pages` payload is logged and skipped. A transport error is
/// yielded once and ends the stream.
pub fn push_events<S, B, E>(body: S) -> PushStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut body = Box::pin(body);
    Box::pin(async_stream::stream! {
        let mut decoder = SseDecoder::new();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for frame in decoder.feed(bytes.as_ref()) {
                        match PushEvent::from_frame(&frame) {
                            Ok(Some(event)) => yield Ok(event),
                            Ok(None) => {}
                            Err(err) => warn!(error = %err, "Failed to process streaming page update"),
                        }
                    }
                }
                Err(err) => {
                    yield Err(RemoteError::Stream(err.to_string()));
                    break;
                }
            }
        }
    })
}

// ============================================================================
// Reconnect policy
// ============================================================================

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not started, or shut down.
    Closed,
    /// A subscription request is in flight.
    Connecting,
    /// Events are flowing.
    Open,
    /// Waiting to reconnect.
    RetryScheduled {
        /// When to reconnect.
        at: Instant,
    },
    /// Torn down because the view is hidden.
    Suspended,
}

/// What the driver must do after a controller transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAction {
    /// Open a subscription.
    Connect,
    /// Drop the current subscription.
    Disconnect,
    /// Nothing to do.
    None,
}

/// Reconnect policy for the push channel.
///
/// A transport error schedules a reconnect after `retry_delay`, a keepalive
/// after `keepalive_delay`. Hiding the view tears the channel down; showing
/// it again reconnects unless already connected.
#[derive(Debug, Clone)]
pub struct ChannelController {
    state: ChannelState,
    visible: bool,
    retry_delay: Duration,
    keepalive_delay: Duration,
}

impl ChannelController {
    /// Create a closed, visible controller.
    #[must_use]
    pub fn new(retry_delay: Duration, keepalive_delay: Duration) -> Self {
        Self {
            state: ChannelState::Closed,
            visible: true,
            retry_delay,
            keepalive_delay,
        }
    }

    /// Create a controller with the delays from `config`.
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.retry_delay, config.keepalive_reconnect)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether the view is visible.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Begin: connect when visible, otherwise wait suspended.
    pub fn start(&mut self) -> ChannelAction {
        match self.state {
            ChannelState::Closed | ChannelState::Suspended if self.visible => self.connect(),
            ChannelState::Closed => {
                self.transition(ChannelState::Suspended);
                ChannelAction::None
            }
            _ => ChannelAction::None,
        }
    }

    /// The subscription request succeeded.
    pub fn connected(&mut self) {
        if self.state == ChannelState::Connecting {
            self.transition(ChannelState::Open);
        }
    }

    /// The subscription request failed.
    pub fn connect_failed(&mut self, now: Instant) -> ChannelAction {
        self.schedule(now + self.retry_delay)
    }

    /// The open stream failed or ended.
    pub fn stream_failed(&mut self, now: Instant) -> ChannelAction {
        self.schedule(now + self.retry_delay)
    }

    /// React to an event received on the open stream.
    pub fn on_event(&mut self, event: &PushEvent, now: Instant) -> ChannelAction {
        match event {
            PushEvent::Pages(_) => ChannelAction::None,
            PushEvent::Error(message) => {
                warn!(message = %message, "Page stream connection error");
                self.schedule(now + self.retry_delay)
            }
            PushEvent::Keepalive => {
                debug!("Page stream keepalive, reconnecting");
                self.schedule(now + self.keepalive_delay)
            }
        }
    }

    /// A scheduled reconnect time has come.
    pub fn retry_due(&mut self, now: Instant) -> ChannelAction {
        match self.state {
            ChannelState::RetryScheduled { at } if now >= at => {
                if self.visible {
                    self.connect()
                } else {
                    self.transition(ChannelState::Suspended);
                    ChannelAction::None
                }
            }
            _ => ChannelAction::None,
        }
    }

    /// The view was shown or hidden.
    pub fn set_visible(&mut self, visible: bool) -> ChannelAction {
        self.visible = visible;
        match (visible, self.state) {
            (_, ChannelState::Closed) => ChannelAction::None,
            (false, ChannelState::Open | ChannelState::Connecting) => {
                self.transition(ChannelState::Suspended);
                ChannelAction::Disconnect
            }
            (false, ChannelState::RetryScheduled { .. }) => {
                self.transition(ChannelState::Suspended);
                ChannelAction::None
            }
            (true, ChannelState::Suspended | ChannelState::RetryScheduled { .. }) => self.connect(),
            _ => ChannelAction::None,
        }
    }

    /// Close for good.
    pub fn shutdown(&mut self) -> ChannelAction {
        let was_live = matches!(self.state, ChannelState::Open | ChannelState::Connecting);
        self.transition(ChannelState::Closed);
        if was_live {
            ChannelAction::Disconnect
        } else {
            ChannelAction::None
        }
    }

    fn connect(&mut self) -> ChannelAction {
        self.transition(ChannelState::Connecting);
        ChannelAction::Connect
    }

    fn schedule(&mut self, at: Instant) -> ChannelAction {
        let was_live = matches!(self.state, ChannelState::Open | ChannelState::Connecting);
        if self.state == ChannelState::Closed {
            return ChannelAction::None;
        }
        if self.visible {
            self.transition(ChannelState::RetryScheduled { at });
        } else {
            self.transition(ChannelState::Suspended);
        }
        if was_live {
            ChannelAction::Disconnect
        } else {
            ChannelAction::None
        }
    }

    fn transition(&mut self, next: ChannelState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Push channel state");
            self.state = next;
        }
    }
}

// ============================================================================
// Driver
// ============================================================================

/// A running push subscription.
///
/// Incoming pages are forwarded to the channel given to [`PushChannel::spawn`].
/// The task stops when that channel's receiver is dropped or this handle is
/// dropped.
pub struct PushChannel {
    state: watch::Receiver<ChannelState>,
    visibility: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PushChannel {
    /// Start driving `source` under `controller`.
    #[must_use]
    pub fn spawn(
        source: Arc<dyn PushSource>,
        controller: ChannelController,
        pages_tx: mpsc::UnboundedSender<Vec<PageRecord>>,
    ) -> Self {
        let (state_tx, state) = watch::channel(controller.state());
        let (visibility, visibility_rx) = watch::channel(controller.is_visible());
        let handle = tokio::spawn(drive(source, controller, visibility_rx, pages_tx, state_tx));
        Self {
            state,
            visibility,
            handle,
        }
    }

    /// Current channel state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Report view visibility.
    pub fn set_visible(&self, visible: bool) {
        self.visibility.send_replace(visible);
    }

    /// Stop the driver task.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

async fn drive(
    source: Arc<dyn PushSource>,
    mut controller: ChannelController,
    mut visibility: watch::Receiver<bool>,
    pages_tx: mpsc::UnboundedSender<Vec<PageRecord>>,
    state_tx: watch::Sender<ChannelState>,
) {
    let mut stream: Option<PushStream> = None;
    let mut action = controller.start();

    loop {
        state_tx.send_replace(controller.state());
        if action == ChannelAction::Disconnect {
            stream = None;
        }
        action = ChannelAction::None;

        match controller.state() {
            ChannelState::Connecting => match source.subscribe().await {
                Ok(events) => {
                    stream = Some(events);
                    controller.connected();
                    info!("Page stream connected");
                }
                Err(err) => {
                    warn!(error = %err, "Page stream subscribe failed");
                    action = controller.connect_failed(Instant::now());
                }
            },
            ChannelState::Open => {
                let Some(events) = stream.as_mut() else {
                    action = controller.stream_failed(Instant::now());
                    continue;
                };
                tokio::select! {
                    next = events.next() => match next {
                        Some(Ok(event)) => {
                            action = controller.on_event(&event, Instant::now());
                            if let PushEvent::Pages(pages) = event {
                                if pages_tx.send(pages).is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "Page stream failed");
                            action = controller.stream_failed(Instant::now());
                        }
                        None => {
                            debug!("Page stream ended");
                            action = controller.stream_failed(Instant::now());
                        }
                    },
                    changed = visibility.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        action = controller.set_visible(*visibility.borrow_and_update());
                    }
                    () = pages_tx.closed() => break,
                }
            }
            ChannelState::RetryScheduled { at } => {
                tokio::select! {
                    () = sleep_until(at) => {
                        action = controller.retry_due(Instant::now());
                    }
                    changed = visibility.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        action = controller.set_visible(*visibility.borrow_and_update());
                    }
                    () = pages_tx.closed() => break,
                }
            }
            ChannelState::Suspended | ChannelState::Closed => {
                tokio::select! {
                    changed = visibility.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        action = controller.set_visible(*visibility.borrow_and_update());
                    }
                    () = pages_tx.closed() => break,
                }
            }
        }
    }

    controller.shutdown();
    state_tx.send_replace(ChannelState::Closed);
    debug!("Page stream driver stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    fn frames(input: &[&str]) -> Vec<SseFrame> {
        let mut decoder = SseDecoder::new();
        input
            .iter()
            .flat_map(|chunk| decoder.feed(chunk.as_bytes()))
            .collect()
    }

    #[test]
    fn test_decoder_dispatches_on_blank_line() {
        let out = frames(&["event: pages\ndata: {\"pages\":[]}\n\n"]);
        assert_eq!(
            out,
            vec![SseFrame {
                event: "pages".into(),
                data: "{\"pages\":[]}".into()
            }]
        );
    }

    #[test]
    fn test_decoder_handles_split_chunks_and_crlf() {
        let out = frames(&["event: keep", "alive\r\nda", "ta: connection_timeout\r\n", "\r\n"]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event, "keepalive");
        assert_eq!(out[0].data, "connection_timeout");
    }

    #[test]
    fn test_decoder_skips_comments_and_retry() {
        let out = frames(&["retry: 5000\n\n: ping\n\ndata: a\ndata: b\n\n"]);
        assert_eq!(
            out,
            vec![SseFrame {
                event: "message".into(),
                data: "a\nb".into()
            }]
        );
    }

    #[test]
    fn test_decoder_keeps_incomplete_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: pages\ndata: {}\n").is_empty());
        assert_eq!(decoder.feed(b"\n").len(), 1);
    }

    #[test]
    fn test_push_event_parses_pages() {
        let frame = SseFrame {
            event: "pages".into(),
            data: r#"{"pages":[{"layoutName":"four-panel-grid","slots":{"1":"a.png"}}],"pageCount":1,"timestamp":7}"#.into(),
        };
        let Some(PushEvent::Pages(pages)) = PushEvent::from_frame(&frame).expect("parse") else {
            panic!("expected pages");
        };
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].image_in("1"), Some("a.png"));
    }

    #[test]
    fn test_push_event_null_pages_is_empty() {
        let frame = SseFrame {
            event: "pages".into(),
            data: r#"{"pages":null}"#.into(),
        };
        assert_eq!(
            PushEvent::from_frame(&frame).expect("parse"),
            Some(PushEvent::Pages(Vec::new()))
        );
    }

    #[test]
    fn test_push_event_rejects_bad_json() {
        let frame = SseFrame {
            event: "pages".into(),
            data: "{not json".into(),
        };
        assert!(PushEvent::from_frame(&frame).is_err());
    }

    #[test]
    fn test_push_event_ignores_unknown() {
        let frame = SseFrame {
            event: "message".into(),
            data: "hello".into(),
        };
        assert_eq!(PushEvent::from_frame(&frame).expect("parse"), None);
    }

    #[tokio::test]
    async fn test_push_events_skips_malformed_and_ends_on_error() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(b"event: pages\ndata: {bad\n\n".to_vec()),
            Ok(b"event: keepalive\ndata: connection_timeout\n\n".to_vec()),
            Err("reset".to_string()),
            Ok(b"event: keepalive\n\n".to_vec()),
        ];
        let events: Vec<_> = push_events(futures::stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(PushEvent::Keepalive)));
        assert!(matches!(events[1], Err(RemoteError::Stream(_))));
    }

    // =========================================================================
    // Controller
    // =========================================================================

    fn controller() -> ChannelController {
        ChannelController::new(Duration::from_secs(5), Duration::from_secs(1))
    }

    #[test]
    fn test_controller_error_retries_after_five_seconds() {
        let mut c = controller();
        let now = Instant::now();
        assert_eq!(c.start(), ChannelAction::Connect);
        c.connected();
        assert_eq!(c.state(), ChannelState::Open);

        let action = c.on_event(&PushEvent::Error("boom".into()), now);
        assert_eq!(action, ChannelAction::Disconnect);
        assert_eq!(
            c.state(),
            ChannelState::RetryScheduled {
                at: now + Duration::from_secs(5)
            }
        );
        assert_eq!(c.retry_due(now + Duration::from_secs(4)), ChannelAction::None);
        assert_eq!(c.retry_due(now + Duration::from_secs(5)), ChannelAction::Connect);
        assert_eq!(c.state(), ChannelState::Connecting);
    }

    #[test]
    fn test_controller_keepalive_reconnects_after_one_second() {
        let mut c = controller();
        let now = Instant::now();
        c.start();
        c.connected();
        assert_eq!(c.on_event(&PushEvent::Keepalive, now), ChannelAction::Disconnect);
        assert_eq!(
            c.state(),
            ChannelState::RetryScheduled {
                at: now + Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn test_controller_pages_keep_channel_open() {
        let mut c = controller();
        c.start();
        c.connected();
        assert_eq!(
            c.on_event(&PushEvent::Pages(Vec::new()), Instant::now()),
            ChannelAction::None
        );
        assert_eq!(c.state(), ChannelState::Open);
    }

    #[test]
    fn test_controller_hidden_tears_down_and_visible_reconnects() {
        let mut c = controller();
        c.start();
        c.connected();
        assert_eq!(c.set_visible(false), ChannelAction::Disconnect);
        assert_eq!(c.state(), ChannelState::Suspended);
        assert_eq!(c.set_visible(true), ChannelAction::Connect);
        assert_eq!(c.state(), ChannelState::Connecting);
        // Already connecting: no second subscription.
        assert_eq!(c.set_visible(true), ChannelAction::None);
    }

    #[test]
    fn test_controller_retry_while_hidden_suspends() {
        let mut c = controller();
        let now = Instant::now();
        c.start();
        c.connected();
        c.stream_failed(now);
        c.set_visible(false);
        assert_eq!(c.state(), ChannelState::Suspended);
        assert_eq!(c.retry_due(now + Duration::from_secs(10)), ChannelAction::None);
    }

    #[test]
    fn test_controller_start_hidden_waits() {
        let mut c = controller();
        c.set_visible(false);
        assert_eq!(c.start(), ChannelAction::None);
        assert_eq!(c.state(), ChannelState::Suspended);
        assert_eq!(c.set_visible(true), ChannelAction::Connect);
    }

    #[test]
    fn test_controller_shutdown_closes() {
        let mut c = controller();
        c.start();
        c.connected();
        assert_eq!(c.shutdown(), ChannelAction::Disconnect);
        assert_eq!(c.state(), ChannelState::Closed);
        assert_eq!(c.stream_failed(Instant::now()), ChannelAction::None);
        assert_eq!(c.state(), ChannelState::Closed);
    }

    // =========================================================================
    // Driver
    // =========================================================================

    /// Hands out scripted streams, one per subscription.
    struct ScriptedSource {
        streams: Mutex<VecDeque<Vec<RemoteResult<PushEvent>>>>,
        subscriptions: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(streams: Vec<Vec<RemoteResult<PushEvent>>>) -> Self {
            Self {
                streams: Mutex::new(streams.into()),
                subscriptions: Mutex::new(0),
            }
        }

        fn subscriptions(&self) -> u32 {
            *self.subscriptions.lock().expect("lock")
        }
    }

    #[async_trait]
    impl PushSource for ScriptedSource {
        async fn subscribe(&self) -> RemoteResult<PushStream> {
            *self.subscriptions.lock().expect("lock") += 1;
            let next = self.streams.lock().expect("lock").pop_front();
            match next {
                Some(events) => Ok(futures::stream::iter(events)
                    .chain(futures::stream::pending())
                    .boxed()),
                None => Err(RemoteError::Stream("no more scripted streams".into())),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_forwards_pages_and_reconnects_after_keepalive() {
        let page = PageRecord::new("four-panel-grid");
        let source = Arc::new(ScriptedSource::new(vec![
            vec![Ok(PushEvent::Pages(vec![page.clone()])), Ok(PushEvent::Keepalive)],
            vec![Ok(PushEvent::Pages(Vec::new()))],
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = PushChannel::spawn(source.clone(), controller(), tx);

        let first = rx.recv().await.expect("first pages");
        assert_eq!(first, vec![page]);

        // Keepalive closes the stream; the reconnect happens a second later.
        let second = rx.recv().await.expect("second pages");
        assert!(second.is_empty());
        assert_eq!(source.subscriptions(), 2);
        assert_eq!(channel.state(), ChannelState::Open);
        channel.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_hidden_view_suspends() {
        let source = Arc::new(ScriptedSource::new(vec![Vec::new(), Vec::new()]));
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = PushChannel::spawn(source.clone(), controller(), tx);
        let mut state = channel.watch_state();

        state
            .wait_for(|s| *s == ChannelState::Open)
            .await
            .expect("open");
        channel.set_visible(false);
        state
            .wait_for(|s| *s == ChannelState::Suspended)
            .await
            .expect("suspended");
        channel.set_visible(true);
        state
            .wait_for(|s| *s == ChannelState::Open)
            .await
            .expect("reopened");
        assert_eq!(source.subscriptions(), 2);
        channel.shutdown();
    }
}

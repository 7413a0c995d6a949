//! Resilient relay message channel
//!
//! [`RelayChannel`] keeps one connection to the relay alive for a user
//! identity. A single driver task owns the connection, the heartbeat timer
//! and the reconnect timer, so at most one of each exists at any time.
//! Frames sent while the relay is unreachable wait in a bounded
//! [`OutboundQueue`] and are flushed, oldest first, on the next open.

use crate::backoff::Backoff;
use crate::config::RelayConfig;
use crate::protocol::{message_types, Frame, SignalMessage};
use crate::queue::{OutboundQueue, QueuedFrame};
use crate::registry::{HandlerId, HandlerRegistry};
use crate::transport::{RelayConnector, RelayLink, WebSocketConnector};
use crate::Result;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use url::Url;

/// Connection state of the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection and no driver (never connected, or stopped)
    Absent,
    /// Connection attempt in flight
    Connecting,
    /// Connection established
    Open,
    /// Connection lost, reconnect pending
    Closed,
}

/// Resilient message channel to the relay.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct RelayChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    config: RelayConfig,
    connector: Arc<dyn RelayConnector>,
    registry: HandlerRegistry,
    /// Held while a frame is dispatched; stopping waits on it
    dispatch_gate: ReentrantMutex<()>,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ChannelState>,
    connected_tx: watch::Sender<bool>,
}

struct Shared {
    /// Writer of the open connection; `None` unless Open
    writer: Option<mpsc::UnboundedSender<QueuedFrame>>,
    queue: OutboundQueue,
    backoff: Backoff,
    driver: Option<Driver>,
    /// Bumped on every connect and stop; a driver only acts while its epoch is current
    epoch: u64,
}

struct Driver {
    identity: String,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RelayChannel {
    /// Create a channel that connects through `connector`
    pub fn new(config: RelayConfig, connector: Arc<dyn RelayConnector>) -> Result<Self> {
        config.validate()?;

        let (state_tx, _) = watch::channel(ChannelState::Absent);
        let (connected_tx, _) = watch::channel(false);

        let shared = Shared {
            writer: None,
            queue: OutboundQueue::new(config.queue.clone()),
            backoff: Backoff::new(config.reconnect.clone()),
            driver: None,
            epoch: 0,
        };

        Ok(Self {
            inner: Arc::new(ChannelInner {
                config,
                connector,
                registry: HandlerRegistry::new(),
                dispatch_gate: ReentrantMutex::new(()),
                shared: Mutex::new(shared),
                state_tx,
                connected_tx,
            }),
        })
    }

    /// Create a channel that connects over WebSocket
    pub fn websocket(config: RelayConfig) -> Result<Self> {
        Self::new(config, Arc::new(WebSocketConnector::new()))
    }

    /// Start maintaining a connection for `identity`.
    ///
    /// Empty identities are ignored. Calling again with the same identity is a
    /// no-op; a different identity replaces the current connection. Must be
    /// called from within a Tokio runtime.
    pub fn connect(&self, identity: &str) -> Result<()> {
        if identity.is_empty() {
            debug!("Ignoring connect without identity");
            return Ok(());
        }

        let url = self.inner.config.endpoint_for(identity)?;

        let mut shared = self.inner.shared.lock();
        if let Some(driver) = &shared.driver {
            if driver.identity == identity && !driver.handle.is_finished() {
                debug!(identity, "Relay channel already running");
                return Ok(());
            }
        }

        shared.epoch += 1;
        shared.writer = None;
        shared.backoff.reset();

        if let Some(previous) = shared.driver.take() {
            info!(old = %previous.identity, new = identity, "Identity changed, replacing relay connection");
            previous.signal_shutdown();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.run(url, shared.epoch, shutdown_rx));

        shared.driver = Some(Driver {
            identity: identity.to_string(),
            shutdown_tx,
            handle,
        });
        drop(shared);
        self.inner.set_state(ChannelState::Connecting);

        Ok(())
    }

    /// Send a frame of type `kind`.
    ///
    /// Returns `true` when the frame was handed to an open connection. When
    /// the channel is not open the frame is queued (subject to capacity and
    /// expiry) and `false` is returned.
    pub fn send(&self, kind: &str, payload: Value) -> bool {
        self.inner.send_frame(Frame::new(kind, payload))
    }

    /// Alias of [`RelayChannel::send`]
    pub fn emit(&self, kind: &str, payload: Value) -> bool {
        self.send(kind, payload)
    }

    /// Send a typed signaling message
    pub fn send_message(&self, message: &SignalMessage) -> bool {
        match Frame::try_from(message) {
            Ok(frame) => self.inner.send_frame(frame),
            Err(e) => {
                warn!(kind = message.kind(), "Failed to encode message: {}", e);
                false
            }
        }
    }

    /// Register a listener for frames of type `kind`
    pub fn on<F>(&self, kind: &str, handler: F) -> HandlerId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.inner.registry.register(kind, Arc::new(handler))
    }

    /// Remove one listener, or all listeners of `kind` when `id` is `None`
    pub fn off(&self, kind: &str, id: Option<HandlerId>) {
        let removed = self.inner.registry.unregister(kind, id);
        trace!(kind, removed, "Removed listeners");
    }

    /// Number of listeners for `kind`
    pub fn listener_count(&self, kind: &str) -> usize {
        self.inner.registry.listener_count(kind)
    }

    /// True while the connection is open
    pub fn is_connected(&self) -> bool {
        *self.inner.connected_tx.borrow()
    }

    /// Watch the open/closed flag
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.inner.connected_tx.subscribe()
    }

    /// Current connection state
    pub fn state(&self) -> ChannelState {
        *self.inner.state_tx.borrow()
    }

    /// Watch connection state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of frames waiting for the connection
    pub fn queued_len(&self) -> usize {
        self.inner.shared.lock().queue.len()
    }

    /// Delay the next reconnect will wait
    pub fn reconnect_delay(&self) -> Duration {
        self.inner.shared.lock().backoff.current()
    }

    /// Stop the channel: close the connection, cancel timers, never reconnect.
    ///
    /// No frame is dispatched to listeners after this returns.
    pub fn stop(&self) {
        if let Some(driver) = self.inner.begin_stop() {
            driver.signal_shutdown();
        }
    }

    /// Stop the channel and wait for the driver task to finish
    pub async fn shutdown(&self) {
        if let Some(driver) = self.inner.begin_stop() {
            driver.signal_shutdown();
            if let Err(e) = driver.handle.await {
                if !e.is_cancelled() {
                    warn!("Relay driver task failed: {}", e);
                }
            }
        }
    }
}

impl Driver {
    fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl ChannelInner {
    fn begin_stop(&self) -> Option<Driver> {
        let driver = {
            let mut shared = self.shared.lock();
            shared.epoch += 1;
            shared.writer = None;
            shared.driver.take()
        };
        // Wait out a dispatch that passed the epoch check before the bump
        drop(self.dispatch_gate.lock());
        self.set_state(ChannelState::Absent);
        if driver.is_some() {
            info!("Relay channel stopped");
        }
        driver
    }

    fn send_frame(&self, frame: Frame) -> bool {
        let mut shared = self.shared.lock();
        let entry = QueuedFrame {
            frame,
            enqueued_at: Instant::now(),
        };

        let rejected = match shared.writer.as_ref().map(|writer| writer.send(entry.clone())) {
            Some(Ok(())) => return true,
            Some(Err(_)) => {
                debug!(kind = %entry.frame.kind, "Connection writer gone, queueing frame");
                shared.writer = None;
                entry
            }
            None => {
                trace!(kind = %entry.frame.kind, "Relay not open, queueing frame");
                entry
            }
        };

        shared.queue.push(rejected.frame);
        false
    }

    fn set_state(&self, state: ChannelState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        let open = state == ChannelState::Open;
        self.connected_tx.send_if_modified(|current| {
            if *current == open {
                false
            } else {
                *current = open;
                true
            }
        });
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.shared.lock().epoch == epoch
    }

    fn set_state_if_current(&self, epoch: u64, state: ChannelState) {
        if self.is_current(epoch) {
            self.set_state(state);
        }
    }

    /// Driver loop: connect, serve, back off, repeat until shut down
    async fn run(self: Arc<Self>, url: Url, epoch: u64, mut shutdown_rx: watch::Receiver<bool>) {
        let connect_timeout = self.config.connect_timeout();

        loop {
            if *shutdown_rx.borrow() || !self.is_current(epoch) {
                break;
            }

            self.set_state_if_current(epoch, ChannelState::Connecting);
            debug!(url = %url, "Opening relay connection");

            let attempt = timeout(connect_timeout, self.connector.connect(&url));
            let outcome = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                outcome = attempt => outcome,
            };

            match outcome {
                Ok(Ok(link)) => {
                    if self.serve(link, epoch, &mut shutdown_rx).await {
                        break;
                    }
                }
                Ok(Err(e)) => warn!("Relay connection failed: {}", e),
                Err(_) => warn!(
                    timeout_ms = connect_timeout.as_millis() as u64,
                    "Relay connection attempt timed out"
                ),
            }

            let delay = {
                let mut shared = self.shared.lock();
                if shared.epoch != epoch {
                    break;
                }
                shared.writer = None;
                shared.backoff.advance()
            };
            self.set_state_if_current(epoch, ChannelState::Closed);
            info!(delay_ms = delay.as_millis() as u64, "Reconnecting to relay");

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = sleep(delay) => {}
            }
        }

        debug!("Relay driver exiting");
    }

    /// Serve one open connection. Returns `true` when shut down.
    async fn serve(
        &self,
        link: RelayLink,
        epoch: u64,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let RelayLink {
            mut sink,
            mut stream,
        } = link;
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<QueuedFrame>();

        {
            let mut shared = self.shared.lock();
            if shared.epoch != epoch {
                return true;
            }
            shared.backoff.reset();

            for entry in shared.queue.drain_fresh() {
                let _ = writer_tx.send(entry);
            }
            shared.writer = Some(writer_tx);
        }
        self.set_state_if_current(epoch, ChannelState::Open);
        info!("Relay connection open");

        let ttl = self.config.queue.ttl();
        let heartbeat_every = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shut_down = loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    let _ = sink.close().await;
                    break true;
                }
                Some(entry) = writer_rx.recv() => {
                    if entry.is_expired(Instant::now(), ttl) {
                        debug!(kind = %entry.frame.kind, "Dropping expired frame");
                        continue;
                    }
                    let text = match entry.frame.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(kind = %entry.frame.kind, "Dropping unencodable frame: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(text).await {
                        warn!("Relay write failed: {}", e);
                        self.shared.lock().queue.requeue_front(vec![entry]);
                        break false;
                    }
                }
                _ = heartbeat.tick() => {
                    trace!("Sending heartbeat");
                    let ping = Frame::new(message_types::PING, Value::Null);
                    if let Ok(text) = ping.to_json() {
                        if let Err(e) = sink.send(text).await {
                            warn!("Heartbeat failed: {}", e);
                            break false;
                        }
                    }
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(text)) => self.handle_inbound(epoch, &text),
                    Some(Err(e)) => {
                        info!("Relay connection closed: {}", e);
                        break false;
                    }
                    None => {
                        info!("Relay connection closed");
                        break false;
                    }
                },
            }
        };

        // Frames accepted but not yet written go back to the queue
        let mut shared = self.shared.lock();
        if shared.epoch != epoch {
            return true;
        }
        shared.writer = None;
        let mut unsent = Vec::new();
        while let Ok(entry) = writer_rx.try_recv() {
            unsent.push(entry);
        }
        if !unsent.is_empty() {
            debug!(count = unsent.len(), "Returning unsent frames to the queue");
            shared.queue.requeue_front(unsent);
        }

        shut_down
    }

    fn handle_inbound(&self, epoch: u64, text: &str) {
        let _gate = self.dispatch_gate.lock();
        if !self.is_current(epoch) {
            return;
        }

        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Discarding malformed frame: {}", e);
                return;
            }
        };

        match frame.kind.as_str() {
            message_types::PONG | message_types::CONNECTED => {
                trace!(kind = %frame.kind, "Consumed control frame");
            }
            _ => {
                let delivered = self.registry.dispatch(&frame);
                trace!(kind = %frame.kind, delivered, "Dispatched frame");
            }
        }
    }
}

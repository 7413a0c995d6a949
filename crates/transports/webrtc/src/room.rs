//! Room lifecycle coordinator
//!
//! Ties a [`CallEngine`] to the life of one interview room: starts the call
//! once the relay is up, ends it when the partner hangs up, and gives an
//! unreachable partner a fixed window to come back before ending the call.

use crate::config::RoomConfig;
use crate::engine::CallEngine;
use crate::peer::PeerConnectionState;
use crate::Result;
use pairlink_core::protocol::{message_types, Frame, RoomEventMessage, SignalMessage};
use pairlink_core::{HandlerId, RelayChannel};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Why the room finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// This side ended the interview
    Local,
    /// The partner ended the interview
    Partner,
    /// The partner stayed unreachable for the whole reconnect window
    Timeout,
}

/// Observable room state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatus {
    /// The room is over; the call will not be restarted
    pub complete: bool,
    /// Set once `complete` is
    pub end_reason: Option<EndReason>,
    /// The partner is currently unreachable
    pub partner_disconnected: bool,
    /// Seconds left in the reconnect window
    pub reconnect_remaining_secs: u32,
    /// Seconds the call has been active; paused while the partner is away
    pub elapsed_secs: u64,
}

impl RoomStatus {
    fn new(timeout_secs: u32) -> Self {
        Self {
            complete: false,
            end_reason: None,
            partner_disconnected: false,
            reconnect_remaining_secs: timeout_secs,
            elapsed_secs: 0,
        }
    }
}

enum RoomEvent {
    CallEnded(RoomEventMessage),
    PartnerDisconnected(RoomEventMessage),
}

/// Coordinates one room around a call engine
#[derive(Clone)]
pub struct RoomCoordinator {
    inner: Arc<RoomInner>,
}

struct RoomInner {
    room_id: String,
    user_id: String,
    engine: CallEngine,
    channel: RelayChannel,
    config: RoomConfig,
    status: watch::Sender<RoomStatus>,
    events_tx: mpsc::UnboundedSender<RoomEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<RoomEvent>>>,
    listeners: Mutex<Vec<(&'static str, HandlerId)>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RoomCoordinator {
    /// Create a coordinator. Nothing happens until [`start`](Self::start).
    pub fn new(engine: CallEngine, channel: RelayChannel, config: RoomConfig) -> Result<Self> {
        config.validate()?;

        let (status, _) = watch::channel(RoomStatus::new(config.partner_timeout_secs));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            inner: Arc::new(RoomInner {
                room_id: engine.room_id().to_string(),
                user_id: engine.user_id().to_string(),
                engine,
                channel,
                config,
                status,
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                listeners: Mutex::new(Vec::new()),
                task: Mutex::new(None),
            }),
        })
    }

    /// Register the room listeners and start reacting. Calling it again is
    /// a no-op.
    pub fn start(&self) {
        let Some(events_rx) = self.inner.events_rx.lock().take() else {
            return;
        };

        {
            let mut listeners = self.inner.listeners.lock();
            listeners.push(self.inner.forward(message_types::CALL_ENDED, RoomEvent::CallEnded));
            listeners.push(self.inner.forward(
                message_types::PARTNER_DISCONNECTED,
                RoomEvent::PartnerDisconnected,
            ));
        }

        let task = tokio::spawn(Arc::clone(&self.inner).run(events_rx));
        *self.inner.task.lock() = Some(task);
        info!(room_id = %self.inner.room_id, "Room coordinator started");
    }

    /// Current room state
    pub fn status(&self) -> RoomStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch room state
    pub fn subscribe(&self) -> watch::Receiver<RoomStatus> {
        self.inner.status.subscribe()
    }

    /// End the interview from this side and tell the partner
    pub async fn end_interview(&self) {
        if !self.inner.complete(EndReason::Local) {
            return;
        }

        let message = SignalMessage::CallEnded(RoomEventMessage {
            room_id: self.inner.room_id.clone(),
            from: None,
        });
        if !self.inner.channel.send_message(&message) {
            warn!(room_id = %self.inner.room_id, "Relay not open, call_ended queued");
        }
        self.inner.engine.end_call().await;
    }

    /// Remove the room listeners and stop the countdown
    pub fn shutdown(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
        let listeners: Vec<(&'static str, HandlerId)> =
            self.inner.listeners.lock().drain(..).collect();
        for (kind, id) in listeners {
            self.inner.channel.off(kind, Some(id));
        }
        debug!(room_id = %self.inner.room_id, "Room coordinator stopped");
    }
}

impl RoomInner {
    fn forward<F>(&self, kind: &'static str, wrap: F) -> (&'static str, HandlerId)
    where
        F: Fn(RoomEventMessage) -> RoomEvent + Send + Sync + 'static,
    {
        let events = self.events_tx.clone();
        let id = self.channel.on(kind, move |frame: &Frame| {
            match frame.decode::<RoomEventMessage>() {
                Ok(message) => {
                    let _ = events.send(wrap(message));
                }
                Err(e) => debug!(kind, "Discarding malformed room frame: {}", e),
            }
        });
        (kind, id)
    }

    fn is_complete(&self) -> bool {
        self.status.borrow().complete
    }

    fn is_partner_event(&self, message: &RoomEventMessage) -> bool {
        message.room_id == self.room_id && message.from.as_deref() != Some(self.user_id.as_str())
    }

    /// Mark the room complete. Returns false if it already was.
    fn complete(&self, reason: EndReason) -> bool {
        let completed = self.status.send_if_modified(|s| {
            if s.complete {
                return false;
            }
            s.complete = true;
            s.end_reason = Some(reason);
            s.partner_disconnected = false;
            true
        });
        if completed {
            info!(room_id = %self.room_id, ?reason, "Room complete");
        }
        completed
    }

    async fn finish(&self, reason: EndReason) {
        if self.complete(reason) {
            self.engine.end_call().await;
        }
    }

    async fn maybe_start_call(&self, connected: bool) {
        if !connected || !self.config.auto_start || self.is_complete() {
            return;
        }
        if self.engine.is_started() {
            return;
        }
        if let Err(e) = self.engine.start_call().await {
            error!(room_id = %self.room_id, "Failed to start call: {}", e);
        }
    }

    fn start_countdown(&self, countdown: &mut Option<Interval>) {
        if countdown.is_some() || self.is_complete() {
            return;
        }

        let timeout = self.config.partner_timeout_secs;
        self.status.send_modify(|s| {
            s.partner_disconnected = true;
            s.reconnect_remaining_secs = timeout;
        });

        *countdown = Some(one_second_ticker());
        info!(room_id = %self.room_id, timeout_secs = timeout, "Partner unreachable, waiting");
    }

    fn track_call_clock(&self, active: bool, clock: &mut Option<Interval>) {
        if !active || self.is_complete() {
            *clock = None;
        } else if clock.is_none() {
            *clock = Some(one_second_ticker());
        }
    }

    fn cancel_countdown(&self, countdown: &mut Option<Interval>) {
        if countdown.take().is_none() {
            return;
        }
        let timeout = self.config.partner_timeout_secs;
        self.status.send_modify(|s| {
            s.partner_disconnected = false;
            s.reconnect_remaining_secs = timeout;
        });
        info!(room_id = %self.room_id, "Partner reconnected");
    }

    async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<RoomEvent>) {
        let mut connected = self.channel.connected();
        let mut snapshots = self.engine.subscribe();
        let mut last_state = snapshots.borrow_and_update().connection_state;
        let mut countdown: Option<Interval> = None;
        let mut call_clock: Option<Interval> = None;

        let is_connected = *connected.borrow_and_update();
        self.maybe_start_call(is_connected).await;

        loop {
            tokio::select! {
                Some(event) = events.recv() => match event {
                    RoomEvent::CallEnded(message) => {
                        if !self.is_partner_event(&message) {
                            continue;
                        }
                        info!(room_id = %self.room_id, from = ?message.from, "Partner ended the call");
                        countdown = None;
                        call_clock = None;
                        self.finish(EndReason::Partner).await;
                    }
                    RoomEvent::PartnerDisconnected(message) => {
                        if !self.is_partner_event(&message) {
                            continue;
                        }
                        self.start_countdown(&mut countdown);
                    }
                },
                changed = connected.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let is_connected = *connected.borrow_and_update();
                    self.maybe_start_call(is_connected).await;
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let (state, active) = {
                        let snapshot = snapshots.borrow_and_update();
                        (snapshot.connection_state, snapshot.is_call_active)
                    };
                    self.track_call_clock(active, &mut call_clock);
                    if state == last_state {
                        continue;
                    }
                    last_state = state;
                    match state {
                        PeerConnectionState::Disconnected | PeerConnectionState::Failed => {
                            self.start_countdown(&mut countdown);
                        }
                        PeerConnectionState::Connected => self.cancel_countdown(&mut countdown),
                        _ => {}
                    }
                }
                _ = next_tick(&mut countdown), if countdown.is_some() => {
                    if self.is_complete() {
                        countdown = None;
                        continue;
                    }
                    let mut remaining = 0;
                    self.status.send_modify(|s| {
                        s.reconnect_remaining_secs = s.reconnect_remaining_secs.saturating_sub(1);
                        remaining = s.reconnect_remaining_secs;
                    });
                    if remaining == 0 {
                        countdown = None;
                        call_clock = None;
                        warn!(room_id = %self.room_id, "Partner did not come back, ending call");
                        self.finish(EndReason::Timeout).await;
                    }
                }
                _ = next_tick(&mut call_clock), if call_clock.is_some() => {
                    if self.is_complete() {
                        call_clock = None;
                        continue;
                    }
                    self.status.send_modify(|s| s.elapsed_secs += 1);
                }
            }
        }
    }
}

fn one_second_ticker() -> Interval {
    let period = Duration::from_secs(1);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(countdown: &mut Option<Interval>) {
    match countdown {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

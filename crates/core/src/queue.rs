//! Bounded outbound queue for frames sent while the relay is unreachable

use crate::protocol::Frame;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// What to do when a frame arrives at a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the queued frames, drop the incoming one
    #[default]
    DropNewest,
    /// Evict the oldest queued frame to make room
    DropOldest,
}

/// Queue sizing and expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueuePolicy {
    /// Maximum number of queued frames (default: 100)
    pub capacity: usize,
    /// Frames older than this are never delivered (default: 30000ms)
    pub ttl_ms: u64,
    /// Overflow behavior (default: drop newest)
    pub overflow: OverflowPolicy,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl_ms: 30000,
            overflow: OverflowPolicy::DropNewest,
        }
    }
}

impl QueuePolicy {
    /// Validate the policy
    pub fn validate(&self) -> crate::Result<()> {
        if self.capacity == 0 {
            return Err(crate::Error::InvalidConfig(
                "queue capacity must be greater than 0".to_string(),
            ));
        }
        if self.ttl_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "queue ttl_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// A frame waiting for the relay
#[derive(Debug, Clone)]
pub struct QueuedFrame {
    /// The frame to send
    pub frame: Frame,
    /// When it was queued
    pub enqueued_at: Instant,
}

impl QueuedFrame {
    /// Whether the frame has outlived `ttl` at `now`
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.enqueued_at) >= ttl
    }
}

/// FIFO of frames awaiting an open connection
#[derive(Debug)]
pub struct OutboundQueue {
    policy: QueuePolicy,
    entries: VecDeque<QueuedFrame>,
}

impl OutboundQueue {
    /// Create an empty queue
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            entries: VecDeque::with_capacity(policy.capacity),
            policy,
        }
    }

    /// Queue a frame. Returns `false` when the frame was dropped.
    pub fn push(&mut self, frame: Frame) -> bool {
        self.prune_expired(Instant::now());

        if self.entries.len() >= self.policy.capacity {
            match self.policy.overflow {
                OverflowPolicy::DropNewest => {
                    debug!(kind = %frame.kind, "Outbound queue full, dropping frame");
                    return false;
                }
                OverflowPolicy::DropOldest => {
                    if let Some(evicted) = self.entries.pop_front() {
                        debug!(kind = %evicted.frame.kind, "Outbound queue full, evicting oldest frame");
                    }
                }
            }
        }

        self.entries.push_back(QueuedFrame {
            frame,
            enqueued_at: Instant::now(),
        });
        true
    }

    /// Put frames back at the front, preserving their order and original age
    pub fn requeue_front(&mut self, frames: Vec<QueuedFrame>) {
        for entry in frames.into_iter().rev() {
            if self.entries.len() >= self.policy.capacity {
                break;
            }
            self.entries.push_front(entry);
        }
    }

    /// Empty the queue, returning the frames still within their TTL in FIFO
    /// order. Entries keep their original enqueue time.
    pub fn drain_fresh(&mut self) -> Vec<QueuedFrame> {
        let now = Instant::now();
        let ttl = self.policy.ttl();
        let total = self.entries.len();

        let fresh: Vec<QueuedFrame> = self
            .entries
            .drain(..)
            .filter(|entry| !entry.is_expired(now, ttl))
            .collect();

        if fresh.len() < total {
            debug!(
                expired = total - fresh.len(),
                "Dropped expired frames from outbound queue"
            );
        }

        fresh
    }

    /// Number of queued frames
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune_expired(&mut self, now: Instant) {
        let ttl = self.policy.ttl();
        while let Some(front) = self.entries.front() {
            if now.duration_since(front.enqueued_at) < ttl {
                break;
            }
            self.entries.pop_front();
        }
    }
}

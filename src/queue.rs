//! Work queue with at-least-once delivery and dead-lettering
//!
//! An explicit, unit-testable queue component: per-message visibility
//! timeout, receive counting, and automatic routing to a dead-letter channel
//! once the receive budget is exhausted. Built on the tokio clock so tests
//! can drive redelivery with paused time.
//!
//! Delivery guarantees: at-least-once, no FIFO ordering across tasks. A
//! received message is hidden for the visibility window; deleting it before
//! the window elapses acknowledges it, otherwise it becomes receivable again.

use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::types::{QueueStats, TaskId};

/// A message handed to a receiver, hidden from others until the visibility
/// window elapses or the receiver deletes it
#[derive(Clone, Copy, Debug)]
pub struct Delivery {
    /// Acknowledgement handle; only valid for the most recent delivery of
    /// the message
    pub receipt: u64,
    /// The task this message refers to
    pub task_id: TaskId,
    /// How many times the message has been delivered, including this one
    pub receive_count: u32,
}

/// A message quarantined on the dead-letter channel
#[derive(Clone, Copy, Debug)]
pub struct DeadLetter {
    /// The task the message refers to
    pub task_id: TaskId,
    /// Deliveries consumed before the message was routed here
    pub receive_count: u32,
}

#[derive(Debug)]
struct StoredMessage {
    task_id: TaskId,
    receive_count: u32,
    visible_at: Instant,
    /// Receipt of the current in-flight delivery; superseded on redelivery
    receipt: Option<u64>,
}

#[derive(Debug)]
struct DeadEntry {
    task_id: TaskId,
    receive_count: u32,
    dead_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    next_receipt: u64,
    messages: Vec<StoredMessage>,
    dead: Vec<DeadEntry>,
    /// Tasks routed to the dead-letter channel since the last drain
    dead_notices: Vec<TaskId>,
    closed: bool,
}

/// In-process work queue with visibility-timeout delivery semantics
pub struct WorkQueue {
    state: Mutex<QueueState>,
    /// Woken when a new message becomes receivable via enqueue/replay
    notify: Notify,
    /// Woken when a message is routed to the dead-letter channel
    dead_notify: Notify,
    visibility_timeout: Duration,
    max_receive_count: u32,
    dead_letter_retention: Duration,
}

impl WorkQueue {
    /// Create a queue with the given parameters
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            dead_notify: Notify::new(),
            visibility_timeout: config.visibility_timeout,
            max_receive_count: config.max_receive_count,
            dead_letter_retention: config.dead_letter_retention,
        }
    }

    /// Enqueue a message referencing a task
    ///
    /// Fails with [`Error::ShuttingDown`] once the queue has been closed.
    pub async fn enqueue(&self, task_id: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::ShuttingDown);
        }
        state.messages.push(StoredMessage {
            task_id,
            receive_count: 0,
            visible_at: Instant::now(),
            receipt: None,
        });
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Receive up to `max` visible messages
    ///
    /// Each returned message is hidden for the visibility window. A visible
    /// message that has already consumed its receive budget is routed to the
    /// dead-letter channel instead of being returned.
    pub async fn receive(&self, max: usize) -> Vec<Delivery> {
        let (deliveries, _) = self.receive_inner(max).await;
        deliveries
    }

    /// Receive up to `max` messages, waiting up to `wait` for one to become
    /// visible (long poll)
    pub async fn receive_wait(&self, max: usize, wait: Duration) -> Vec<Delivery> {
        let deadline = Instant::now() + wait;
        loop {
            // Register for wakeups before scanning so an enqueue racing the
            // scan is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);

            let (deliveries, next_visible) = self.receive_inner(max).await;
            if !deliveries.is_empty() {
                return deliveries;
            }

            let now = Instant::now();
            if now >= deadline {
                return Vec::new();
            }
            let wake = match next_visible {
                Some(t) if t < deadline => t,
                _ => deadline,
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn receive_inner(&self, max: usize) -> (Vec<Delivery>, Option<Instant>) {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let mut deliveries = Vec::new();
        let mut next_visible: Option<Instant> = None;
        let mut routed_dead = false;
        let mut next_receipt = state.next_receipt;

        let mut i = 0;
        while i < state.messages.len() {
            if deliveries.len() >= max {
                break;
            }
            if state.messages[i].visible_at > now {
                let t = state.messages[i].visible_at;
                next_visible = Some(next_visible.map_or(t, |cur| cur.min(t)));
                i += 1;
                continue;
            }
            if state.messages[i].receive_count >= self.max_receive_count {
                // Receive budget exhausted: quarantine instead of redeliver
                let msg = state.messages.remove(i);
                tracing::warn!(
                    task_id = %msg.task_id,
                    receive_count = msg.receive_count,
                    "Message exceeded receive budget, routing to dead-letter channel"
                );
                state.dead_notices.push(msg.task_id);
                state.dead.push(DeadEntry {
                    task_id: msg.task_id,
                    receive_count: msg.receive_count,
                    dead_at: now,
                });
                routed_dead = true;
                continue;
            }

            let msg = &mut state.messages[i];
            msg.receive_count += 1;
            msg.visible_at = now + self.visibility_timeout;
            msg.receipt = Some(next_receipt);
            deliveries.push(Delivery {
                receipt: next_receipt,
                task_id: msg.task_id,
                receive_count: msg.receive_count,
            });
            next_receipt += 1;
            i += 1;
        }

        state.next_receipt = next_receipt;
        drop(state);

        if routed_dead {
            self.dead_notify.notify_waiters();
        }
        (deliveries, next_visible)
    }

    /// Acknowledge a delivery, removing the message permanently
    ///
    /// Returns false when the receipt no longer matches, typically because
    /// the visibility window elapsed and the message was redelivered, which
    /// means another receiver now owns it.
    pub async fn delete(&self, receipt: u64) -> bool {
        let mut state = self.state.lock().await;
        let before = state.messages.len();
        state.messages.retain(|m| m.receipt != Some(receipt));
        state.messages.len() < before
    }

    /// Wait until at least one task has been routed to the dead-letter
    /// channel, then drain and return the routing notices
    pub async fn wait_dead_letter_notices(&self) -> Vec<TaskId> {
        loop {
            let notified = self.dead_notify.notified();
            tokio::pin!(notified);
            // Register before checking: notify_waiters only reaches futures
            // that are already enabled, and routing can happen between the
            // check and the await
            notified.as_mut().enable();

            let mut state = self.state.lock().await;
            if !state.dead_notices.is_empty() {
                return std::mem::take(&mut state.dead_notices);
            }
            drop(state);

            notified.await;
        }
    }

    /// Drain pending dead-letter routing notices without waiting
    pub async fn take_dead_letter_notices(&self) -> Vec<TaskId> {
        let mut state = self.state.lock().await;
        std::mem::take(&mut state.dead_notices)
    }

    /// List quarantined messages, pruning entries past the retention window
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        let now = Instant::now();
        let retention = self.dead_letter_retention;
        let mut state = self.state.lock().await;
        state.dead.retain(|d| now.duration_since(d.dead_at) < retention);
        state
            .dead
            .iter()
            .map(|d| DeadLetter {
                task_id: d.task_id,
                receive_count: d.receive_count,
            })
            .collect()
    }

    /// Move a quarantined message back onto the main queue with a fresh
    /// receive budget
    ///
    /// Returns false if no dead-lettered message exists for the task (never
    /// routed, already replayed, or expired out of retention).
    pub async fn replay_dead_letter(&self, task_id: TaskId) -> bool {
        let now = Instant::now();
        let retention = self.dead_letter_retention;
        let mut state = self.state.lock().await;
        state.dead.retain(|d| now.duration_since(d.dead_at) < retention);

        let Some(pos) = state.dead.iter().position(|d| d.task_id == task_id) else {
            return false;
        };
        let entry = state.dead.remove(pos);
        tracing::info!(task_id = %entry.task_id, "Replaying dead-lettered message");
        state.messages.push(StoredMessage {
            task_id: entry.task_id,
            receive_count: 0,
            visible_at: now,
            receipt: None,
        });
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Snapshot of queue depth
    pub async fn stats(&self) -> QueueStats {
        let now = Instant::now();
        let retention = self.dead_letter_retention;
        let mut state = self.state.lock().await;
        state.dead.retain(|d| now.duration_since(d.dead_at) < retention);

        let visible = state
            .messages
            .iter()
            .filter(|m| m.visible_at <= now)
            .count();
        QueueStats {
            visible,
            in_flight: state.messages.len() - visible,
            dead_lettered: state.dead.len(),
        }
    }

    /// Stop accepting new messages; in-flight deliveries drain normally
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
    }
}

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::net::protocol::Message;

const DEFAULT_RESEND_INTERVAL_MS: u64 = 150;
const MAX_SEND_COUNT: u32 = 20;
const MAX_SEEN: usize = 256;

#[derive(Debug, Clone)]
struct PendingMessage {
    sequence: u32,
    message: Message,
    last_send: Instant,
    send_count: u32,
}

/// Resend-until-acked delivery for control messages.
///
/// Delivery is at-least-once: receivers deduplicate by sequence and message
/// handlers stay idempotent, so a duplicate spawn or despawn is harmless.
#[derive(Debug)]
pub struct ReliableChannel {
    pending: VecDeque<PendingMessage>,
    resend_interval: Duration,
    seen: VecDeque<u32>,
}

impl Default for ReliableChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliableChannel {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            resend_interval: Duration::from_millis(DEFAULT_RESEND_INTERVAL_MS),
            seen: VecDeque::with_capacity(MAX_SEEN),
        }
    }

    pub fn set_resend_interval(&mut self, interval: Duration) {
        self.resend_interval = interval;
    }

    /// Starts tracking an outgoing reliable message under its sequence.
    pub fn track(&mut self, sequence: u32, message: Message) {
        self.pending.push_back(PendingMessage {
            sequence,
            message,
            last_send: Instant::now(),
            send_count: 1,
        });
    }

    /// Removes the pending entry matching an incoming ack.
    pub fn ack(&mut self, sequence: u32) {
        self.pending.retain(|p| p.sequence != sequence);
    }

    /// Messages due for another send. Entries that exhausted their send
    /// budget are dropped; the session timeout is what ultimately reaps a
    /// peer that never acks.
    pub fn due_resends(&mut self) -> Vec<(u32, Message)> {
        let now = Instant::now();
        let mut due = Vec::new();

        self.pending.retain_mut(|p| {
            if now.duration_since(p.last_send) < self.resend_interval {
                return true;
            }
            if p.send_count >= MAX_SEND_COUNT {
                log::warn!(
                    "dropping reliable {} (seq {}) after {} sends",
                    p.message.name(),
                    p.sequence,
                    p.send_count
                );
                return false;
            }
            p.last_send = now;
            p.send_count += 1;
            due.push((p.sequence, p.message.clone()));
            true
        });

        due
    }

    /// Incoming-side dedup. Returns false when the sequence was already
    /// processed and the message must be ignored (but still acked).
    pub fn accept(&mut self, sequence: u32) -> bool {
        if self.seen.contains(&sequence) {
            return false;
        }
        if self.seen.len() >= MAX_SEEN {
            self.seen.pop_front();
        }
        self.seen.push_back(sequence);
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_clears_pending() {
        let mut channel = ReliableChannel::new();
        channel.track(1, Message::Despawn { id: 9 });
        channel.track(2, Message::Despawn { id: 10 });
        assert_eq!(channel.pending_count(), 2);

        channel.ack(1);
        assert_eq!(channel.pending_count(), 1);
    }

    #[test]
    fn resends_when_due() {
        let mut channel = ReliableChannel::new();
        channel.set_resend_interval(Duration::ZERO);
        channel.track(5, Message::JoinReady);

        let due = channel.due_resends();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, 5);

        // Still pending until acked.
        assert_eq!(channel.pending_count(), 1);
    }

    #[test]
    fn not_due_before_interval() {
        let mut channel = ReliableChannel::new();
        channel.track(5, Message::JoinReady);
        assert!(channel.due_resends().is_empty());
    }

    #[test]
    fn duplicate_sequences_rejected() {
        let mut channel = ReliableChannel::new();
        assert!(channel.accept(3));
        assert!(!channel.accept(3));
        assert!(channel.accept(4));
    }
}

//! Per-viewer replay delay buffer.
//!
//! Decouples local display time from wire arrival time: a message enqueued
//! at time A with delay D becomes ready at A+D. Release is strictly FIFO
//! (`drain` only pops from the front while the head is ready), so changing
//! the delay mid-stream affects when *future* enqueues become ready but can
//! never reorder already-queued messages ahead of newer ones.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use pitwall_core::WireMessage;

/// Default queue bound; oldest messages are dropped beyond it.
pub const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug)]
struct Buffered {
    message: WireMessage,
    ready_at: Instant,
}

/// FIFO delay queue for the subscriber stream.
#[derive(Debug)]
pub struct ReplayBuffer {
    queue: VecDeque<Buffered>,
    delay: Duration,
    capacity: usize,
}

impl ReplayBuffer {
    /// Create a buffer with the given delay (zero means live).
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self::with_capacity(delay, DEFAULT_CAPACITY)
    }

    /// Create a buffer with an explicit queue bound.
    #[must_use]
    pub fn with_capacity(delay: Duration, capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            delay,
            capacity,
        }
    }

    /// Current delay applied to future enqueues.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Change the delay for future enqueues; queued messages keep the
    /// release time they were given on arrival.
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// Set the delay from seconds, guarding against misuse.
    ///
    /// Negative, non-finite, or overflowing values fall back to zero (live)
    /// rather than failing the stream.
    pub fn set_delay_secs(&mut self, secs: f64) {
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => self.set_delay(delay),
            Err(_) => {
                tracing::warn!(secs, "Invalid replay delay, falling back to live");
                self.set_delay(Duration::ZERO);
            }
        }
    }

    /// Queue a message that arrived at `now`.
    pub fn enqueue(&mut self, message: WireMessage, now: Instant) {
        // Clock skew pushing A+D out of range degrades to live delivery.
        let ready_at = now.checked_add(self.delay).unwrap_or(now);
        self.queue.push_back(Buffered { message, ready_at });

        if self.queue.len() > self.capacity {
            let overflow = self.queue.len() - self.capacity;
            self.queue.drain(..overflow);
            tracing::warn!(dropped = overflow, "Replay buffer overflow, dropped oldest messages");
        }
    }

    /// Release every message whose time has come, in enqueue order.
    ///
    /// A not-yet-ready head blocks everything behind it, which is what keeps
    /// release order monotonic across delay changes.
    pub fn drain(&mut self, now: Instant) -> Vec<WireMessage> {
        let mut ready = Vec::new();
        while let Some(head) = self.queue.front() {
            if head.ready_at > now {
                break;
            }
            if let Some(buffered) = self.queue.pop_front() {
                ready.push(buffered.message);
            }
        }
        ready
    }

    /// Drop everything; used on reconnect, before a fresh snapshot.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(seq: u64) -> WireMessage {
        WireMessage::Update {
            update: json!({"lapCount": {"currentLap": seq}}),
            seq,
            produced_at: chrono::Utc::now(),
        }
    }

    fn seq_of(message: &WireMessage) -> u64 {
        match message {
            WireMessage::Update { seq, .. } | WireMessage::FullState { seq, .. } => *seq,
        }
    }

    #[test]
    fn releases_at_arrival_plus_delay() {
        let mut buffer = ReplayBuffer::new(Duration::from_secs(5));
        let t0 = Instant::now();

        buffer.enqueue(message(1), t0);

        assert!(buffer.drain(t0 + Duration::from_secs(4)).is_empty());
        let ready = buffer.drain(t0 + Duration::from_secs(5));
        assert_eq!(ready.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn zero_delay_is_live() {
        let mut buffer = ReplayBuffer::new(Duration::ZERO);
        let t0 = Instant::now();

        buffer.enqueue(message(1), t0);
        assert_eq!(buffer.drain(t0).len(), 1);
    }

    #[test]
    fn delay_change_never_reorders_queued_messages() {
        let mut buffer = ReplayBuffer::new(Duration::from_secs(5));
        let t0 = Instant::now();

        // Enqueued at t=0,1,2 with delay 5: ready at 5,6,7.
        buffer.enqueue(message(0), t0);
        buffer.enqueue(message(1), t0 + Duration::from_secs(1));
        buffer.enqueue(message(2), t0 + Duration::from_secs(2));

        // Delay drops to 1 at t=3; a new message becomes ready at t=4,
        // but it sits behind the earlier ones.
        buffer.set_delay(Duration::from_secs(1));
        buffer.enqueue(message(3), t0 + Duration::from_secs(3));

        // At t=6.5 the head (ready 5) and second (ready 6) are due, the
        // t=2 message (ready 7) is not, and nothing behind it leaks out.
        let ready = buffer.drain(t0 + Duration::from_millis(6500));
        let seqs: Vec<u64> = ready.iter().map(seq_of).collect();
        assert_eq!(seqs, vec![0, 1]);

        // Everything releases in enqueue order once the head is due.
        let rest = buffer.drain(t0 + Duration::from_secs(7));
        let seqs: Vec<u64> = rest.iter().map(seq_of).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn invalid_delay_falls_back_to_live() {
        let mut buffer = ReplayBuffer::new(Duration::from_secs(5));
        buffer.set_delay_secs(-3.0);
        assert_eq!(buffer.delay(), Duration::ZERO);

        buffer.set_delay_secs(f64::NAN);
        assert_eq!(buffer.delay(), Duration::ZERO);

        // Finite but beyond what Duration can represent.
        buffer.set_delay_secs(1e20);
        assert_eq!(buffer.delay(), Duration::ZERO);

        buffer.set_delay_secs(2.0);
        assert_eq!(buffer.delay(), Duration::from_secs(2));
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut buffer = ReplayBuffer::with_capacity(Duration::from_secs(60), 3);
        let t0 = Instant::now();

        for seq in 0..5 {
            buffer.enqueue(message(seq), t0);
        }

        assert_eq!(buffer.len(), 3);
        let ready = buffer.drain(t0 + Duration::from_secs(60));
        let seqs: Vec<u64> = ready.iter().map(seq_of).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn clear_empties_the_queue() {
        let mut buffer = ReplayBuffer::new(Duration::from_secs(5));
        buffer.enqueue(message(1), Instant::now());
        buffer.clear();
        assert!(buffer.is_empty());
    }
}

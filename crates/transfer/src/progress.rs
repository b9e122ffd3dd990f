use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::types::{ProgressSnapshot, UploadEvent};

/// Default minimum gap between two progress events.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Identifies one subscriber of a [`ProgressReporter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Receiving end handed to a subscriber.
///
/// Dropping it unsubscribes; the reporter prunes closed subscribers on the
/// next emission.
#[derive(Debug)]
pub struct ProgressSubscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<UploadEvent>,
}

impl ProgressSubscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next event. Returns `None` once the reporter is gone
    /// or has detached this subscriber.
    pub async fn recv(&mut self) -> Option<UploadEvent> {
        self.rx.recv().await
    }

    /// Returns the next already-delivered event, if any.
    pub fn try_recv(&mut self) -> Option<UploadEvent> {
        self.rx.try_recv().ok()
    }
}

/// Accumulates acknowledged bytes and fans rate-limited progress out to subscribers.
///
/// At most one [`UploadEvent::Progress`] is emitted per interval; the
/// terminal event passed to [`finish`](Self::finish) is always delivered.
pub struct ProgressReporter {
    total_bytes: u64,
    bytes_uploaded: u64,
    interval: Duration,
    last_emit: Option<Instant>,
    /// `bytes_uploaded` of the last snapshot sent.
    last_emitted_bytes: Option<u64>,
    subscribers: Vec<(SubscriberId, mpsc::UnboundedSender<UploadEvent>)>,
    next_id: u64,
    speed: SpeedCalculator,
    finished: bool,
}

impl ProgressReporter {
    /// Creates a reporter with the given emission interval.
    ///
    /// If `interval` is `None`, defaults to 1 s.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            total_bytes: 0,
            bytes_uploaded: 0,
            interval: interval.unwrap_or(DEFAULT_INTERVAL),
            last_emit: None,
            last_emitted_bytes: None,
            subscribers: Vec::new(),
            next_id: 0,
            speed: SpeedCalculator::new(None, None),
            finished: false,
        }
    }

    /// Registers a new subscriber.
    pub fn subscribe(&mut self) -> ProgressSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, tx));
        ProgressSubscription { id, rx }
    }

    /// Removes a subscriber; its receiver sees end of stream.
    pub fn unsubscribe(&mut self, id: SubscriberId) {
        self.subscribers.retain(|(sub, _)| *sub != id);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    /// Sets the upload size and resets accumulated progress.
    pub fn begin(&mut self, total_bytes: u64) {
        self.total_bytes = total_bytes;
        self.bytes_uploaded = 0;
        self.last_emit = None;
        self.last_emitted_bytes = None;
        self.speed.reset();
    }

    /// Adds acknowledged bytes and emits a progress event if one is due.
    ///
    /// Progress never moves backwards and never exceeds the total.
    pub fn advance(&mut self, bytes: u64) {
        if self.finished {
            return;
        }
        self.bytes_uploaded = self
            .bytes_uploaded
            .saturating_add(bytes)
            .min(self.total_bytes);
        self.speed.add_sample(bytes);

        let now = Instant::now();
        let due = self
            .last_emit
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            self.last_emit = Some(now);
            self.emit_snapshot();
        }
    }

    /// Current progress.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let remaining = self.total_bytes - self.bytes_uploaded;
        ProgressSnapshot::new(
            self.bytes_uploaded,
            self.total_bytes,
            self.speed.bytes_per_second(),
        )
        .with_eta(self.speed.eta(remaining))
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    /// Delivers the terminal event, bypassing the rate limit, and detaches
    /// every subscriber.
    ///
    /// A completion is preceded by a final progress snapshot unless the last
    /// one sent already showed the same byte count. Later calls are no-ops.
    pub fn finish(&mut self, terminal: UploadEvent) {
        if self.finished {
            return;
        }
        self.finished = true;
        if matches!(terminal, UploadEvent::Completed { .. })
            && self.last_emitted_bytes != Some(self.bytes_uploaded)
        {
            self.emit_snapshot();
        }
        self.broadcast(terminal);
        self.subscribers.clear();
    }

    fn emit_snapshot(&mut self) {
        self.last_emitted_bytes = Some(self.bytes_uploaded);
        self.broadcast(UploadEvent::Progress(self.snapshot()));
    }

    fn broadcast(&mut self, event: UploadEvent) {
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(None)
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    samples: VecDeque<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.unwrap_or(100),
            window_size: window_size.unwrap_or(Duration::from_secs(5)),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back(SpeedSample {
            bytes,
            timestamp: now,
        });

        while self
            .samples
            .front()
            .is_some_and(|s| now.duration_since(s.timestamp) > self.window_size)
        {
            self.samples.pop_front();
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than 2 samples. The first sample only marks
    /// the start of the window, so its bytes are not counted.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }
        let bytes: u64 = self.samples.iter().skip(1).map(|s| s.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time to transfer `remaining_bytes`, `None` while speed is unknown.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

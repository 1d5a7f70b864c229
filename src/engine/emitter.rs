// ============================================================================
// Trade Emitter
// Hands announcements from the matching thread to a retrying announcer thread
// ============================================================================

use crate::domain::{RetryPolicy, TradeAnnouncement};
use crate::interfaces::TradeAnnouncer;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct Shared {
    announcer: Arc<dyn TradeAnnouncer>,
    retry: RetryPolicy,
    /// Announcements that exhausted their retries
    unresolved: Mutex<Vec<TradeAnnouncement>>,
    delivered: AtomicU64,
    stopping: AtomicBool,
}

impl Shared {
    /// Deliver with exponential backoff. Returns false once the retry budget
    /// is spent, or after a single failed attempt while stopping.
    fn deliver(&self, announcement: &TradeAnnouncement) -> bool {
        let mut attempt = 0;
        loop {
            match self.announcer.announce(announcement) {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    return true;
                },
                Err(err) => {
                    attempt += 1;
                    if !self.retry.allows(attempt) || self.stopping.load(Ordering::Acquire) {
                        tracing::error!(
                            trade_id = %announcement.trade_id,
                            sequence = announcement.sequence_number,
                            attempts = attempt,
                            %err,
                            "trade announcement unresolved"
                        );
                        return false;
                    }
                    let delay = self.retry.backoff(attempt - 1);
                    tracing::warn!(
                        trade_id = %announcement.trade_id,
                        attempt,
                        ?delay,
                        %err,
                        "trade announcement failed, retrying"
                    );
                    thread::sleep(delay);
                },
            }
        }
    }

    fn park(&self, announcement: TradeAnnouncement) {
        self.unresolved.lock().push(announcement);
    }
}

/// Owns the announcer thread. Dropping the sender (via `close`) lets the
/// thread drain whatever is queued and exit.
pub(crate) struct TradeEmitter {
    sender: Option<Sender<TradeAnnouncement>>,
    handle: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl TradeEmitter {
    pub fn spawn(
        symbol: &str,
        announcer: Arc<dyn TradeAnnouncer>,
        retry: RetryPolicy,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            announcer,
            retry,
            unresolved: Mutex::new(Vec::new()),
            delivered: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
        });
        let (sender, receiver) = channel::unbounded();

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("announcer-{}", symbol))
            .spawn(move || run(worker, receiver))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            shared,
        })
    }

    /// Emitting handle for the matching thread.
    pub fn handle(&self) -> Option<EmitHandle> {
        self.sender.as_ref().map(|sender| EmitHandle {
            sender: sender.clone(),
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    pub fn unresolved(&self) -> Vec<TradeAnnouncement> {
        self.shared.unresolved.lock().clone()
    }

    /// One more attempt for every parked announcement, on the caller's
    /// thread. Returns how many were delivered.
    pub fn retry_unresolved(&self) -> usize {
        let parked = std::mem::take(&mut *self.shared.unresolved.lock());
        let mut delivered = 0;
        for announcement in parked {
            match self.shared.announcer.announce(&announcement) {
                Ok(()) => {
                    self.shared.delivered.fetch_add(1, Ordering::Relaxed);
                    delivered += 1;
                },
                Err(err) => {
                    tracing::warn!(trade_id = %announcement.trade_id, %err, "retry failed");
                    self.shared.park(announcement);
                },
            }
        }
        delivered
    }

    /// Stop accepting announcements and join the thread after it drains.
    /// Every `EmitHandle` must be dropped first or the join waits for them.
    pub fn close(&mut self) {
        self.sender = None;
        if self.shared.retry.max_attempts.is_none() {
            self.shared.stopping.store(true, Ordering::Release);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("announcer thread panicked");
            }
        }
    }
}

impl Drop for TradeEmitter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cloneable sending side used by the matching thread.
#[derive(Clone)]
pub(crate) struct EmitHandle {
    sender: Sender<TradeAnnouncement>,
    shared: Arc<Shared>,
}

impl EmitHandle {
    /// Queue an announcement. Never blocks the caller.
    pub fn emit(&self, announcement: TradeAnnouncement) {
        send_or_park(&self.sender, &self.shared, announcement);
    }
}

fn send_or_park(sender: &Sender<TradeAnnouncement>, shared: &Shared, announcement: TradeAnnouncement) {
    if let Err(channel::SendError(announcement)) = sender.send(announcement) {
        tracing::error!(trade_id = %announcement.trade_id, "announcer thread gone");
        shared.park(announcement);
    }
}

fn run(shared: Arc<Shared>, receiver: Receiver<TradeAnnouncement>) {
    for announcement in receiver.iter() {
        if !shared.deliver(&announcement) {
            shared.park(announcement);
        }
    }
    tracing::debug!("announcer thread exiting");
}

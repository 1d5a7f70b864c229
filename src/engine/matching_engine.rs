// ============================================================================
// Matching Engine
// Per-symbol facade: admission, lifecycle and read-side queries
// ============================================================================
//
// Threads:
//
//   callers ──offer──▶ Sequencer ──poll──▶ matching thread (owns the book)
//                                              │            │
//                                    Publisher ◀            ▶ announcer thread
//   callers ◀──snapshot / trades / status──────┘
//
// Shutdown: lifecycle moves to Stopping, the matching thread waits until no
// producer is inside `enqueue`, drains the ring, publishes and exits.

use crate::domain::{
    Command, EngineConfig, NewOrder, Order, OrderBook, OrderBookSnapshot, OrderId, PublishPolicy,
    RejectReason, Side, Trade, TradeAnnouncement,
};
use crate::engine::emitter::{EmitHandle, TradeEmitter};
use crate::engine::errors::{EngineError, SubmitRejection};
use crate::engine::matching_core::{CommandOutcome, MatchingCore};
use crate::engine::publisher::{EngineStats, OrderReport, Publisher};
use crate::engine::recovery::{RecoveryLoader, RecoveryReport};
use crate::interfaces::{EventHandler, OrderEvent, OrderStore, TradeAnnouncer};
use crate::sequencer::{Sequencer, SequencerConsumer, SequencerProducer};
use crate::utils::pin_current_thread;
use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Engine lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Lifecycle {
    Created = 0,
    Recovering = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
    Failed = 5,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Lifecycle::Created,
            1 => Lifecycle::Recovering,
            2 => Lifecycle::Running,
            3 => Lifecycle::Stopping,
            4 => Lifecycle::Stopped,
            _ => Lifecycle::Failed,
        }
    }

    pub fn accepts_commands(self) -> bool {
        self == Lifecycle::Running
    }

    fn is_shutting_down(self) -> bool {
        matches!(
            self,
            Lifecycle::Stopping | Lifecycle::Stopped | Lifecycle::Failed
        )
    }
}

/// Acknowledgement that a command was sequenced. The outcome arrives later
/// through the event handler and `order_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SubmitAck {
    pub order_id: OrderId,
    pub sequence: u64,
}

/// State shared by callers and the matching thread.
struct Shared {
    lifecycle: AtomicU8,
    /// Callers currently between the lifecycle check and the offer
    active_producers: AtomicUsize,
    publisher: Publisher,
}

impl Shared {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::SeqCst))
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.lifecycle.store(lifecycle as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: Lifecycle, to: Lifecycle) -> Result<(), Lifecycle> {
        self.lifecycle
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(Lifecycle::from_u8)
    }
}

/// Matching engine for one symbol.
pub struct MatchingEngine {
    config: EngineConfig,
    shared: Arc<Shared>,
    producer: OnceLock<SequencerProducer>,
    worker: Mutex<Option<JoinHandle<()>>>,
    emitter: Mutex<Option<TradeEmitter>>,
    order_store: Arc<dyn OrderStore>,
    trade_announcer: Arc<dyn TradeAnnouncer>,
    event_handler: Arc<dyn EventHandler>,
}

impl MatchingEngine {
    /// Create a stopped engine. Nothing runs until `start`.
    pub fn new(
        config: EngineConfig,
        order_store: Arc<dyn OrderStore>,
        trade_announcer: Arc<dyn TradeAnnouncer>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let publisher = Publisher::new(&config.symbol, config.trade_history, config.order_history);

        Ok(Self {
            config,
            shared: Arc::new(Shared {
                lifecycle: AtomicU8::new(Lifecycle::Created as u8),
                active_producers: AtomicUsize::new(0),
                publisher,
            }),
            producer: OnceLock::new(),
            worker: Mutex::new(None),
            emitter: Mutex::new(None),
            order_store,
            trade_announcer,
            event_handler,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Recover, then open admission. Blocks until recovery is done.
    pub fn start(&self) -> Result<RecoveryReport, EngineError> {
        self.shared
            .transition(Lifecycle::Created, Lifecycle::Recovering)
            .map_err(|found| EngineError::InvalidLifecycle {
                expected: Lifecycle::Created,
                found,
            })?;
        tracing::info!(symbol = %self.config.symbol, "starting matching engine");

        match self.launch() {
            Ok(report) => {
                self.shared.set_lifecycle(Lifecycle::Running);
                tracing::info!(
                    symbol = %self.config.symbol,
                    restored = report.restored,
                    next_sequence = report.last_sequence + 1,
                    "matching engine running"
                );
                Ok(report)
            },
            Err(err) => {
                self.shared.set_lifecycle(Lifecycle::Failed);
                tracing::error!(symbol = %self.config.symbol, %err, "matching engine failed to start");
                Err(err)
            },
        }
    }

    fn launch(&self) -> Result<RecoveryReport, EngineError> {
        let mut book = OrderBook::new(&self.config.symbol, self.config.iceberg_refill);
        let report = if self.config.recover_on_start {
            RecoveryLoader::new(Arc::clone(&self.order_store)).recover(&mut book)?
        } else {
            RecoveryReport::default()
        };

        let publisher = &self.shared.publisher;
        for side in [Side::Buy, Side::Sell] {
            for node in book.resting_orders(side) {
                publisher.record_report(OrderReport::of(&node.order));
            }
        }
        publisher.publish_snapshot(
            book.snapshot(self.config.snapshot_depth)
                .at_sequence(report.last_sequence),
        );
        publisher
            .stats
            .resting_orders
            .store(book.order_count() as u64, Ordering::Relaxed);
        publisher
            .stats
            .last_sequence
            .store(report.last_sequence, Ordering::Release);

        let (producer, consumer) =
            Sequencer::with_base(self.config.ring_capacity, report.last_sequence)?;
        let emitter = TradeEmitter::spawn(
            &self.config.symbol,
            Arc::clone(&self.trade_announcer),
            self.config.announce_retry,
        )?;
        let emit = emitter
            .handle()
            .ok_or(EngineError::MissingCollaborator("trade emitter"))?;
        *self.emitter.lock() = Some(emitter);

        let core = MatchingCore::new(book, Arc::clone(&self.event_handler))
            .resume_from(report.last_sequence, report.last_trade_sequence)
            .with_id_history(self.config.order_history);
        let worker = MatchingWorker {
            core,
            consumer,
            shared: Arc::clone(&self.shared),
            emit,
            config: self.config.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("matcher-{}", self.config.symbol))
            .spawn(move || worker.run())?;
        *self.worker.lock() = Some(handle);

        // Producers observe Running only after the producer handle exists
        self.producer
            .set(producer)
            .map_err(|_| EngineError::InvalidLifecycle {
                expected: Lifecycle::Recovering,
                found: self.shared.lifecycle(),
            })?;
        Ok(report)
    }

    /// Close admission, drain acknowledged commands and join the threads.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        match self.shared.transition(Lifecycle::Running, Lifecycle::Stopping) {
            Ok(()) => tracing::info!(symbol = %self.config.symbol, "stopping matching engine"),
            Err(Lifecycle::Created) => {
                if self
                    .shared
                    .transition(Lifecycle::Created, Lifecycle::Stopped)
                    .is_ok()
                {
                    return;
                }
            },
            Err(_) => {},
        }

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!(symbol = %self.config.symbol, "matching thread panicked");
                self.shared.set_lifecycle(Lifecycle::Failed);
            }
        }
        if let Some(emitter) = self.emitter.lock().as_mut() {
            emitter.close();
        }

        if self.shared.lifecycle() == Lifecycle::Stopping {
            self.shared.set_lifecycle(Lifecycle::Stopped);
            tracing::info!(symbol = %self.config.symbol, "matching engine stopped");
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Validate and sequence an order. `Ok` means the order will be
    /// processed; its outcome is reported asynchronously.
    pub fn submit(&self, order: Order) -> Result<SubmitAck, SubmitRejection> {
        let order_id = order.id;
        let reject = |reason| SubmitRejection::new(order_id, reason);

        if *order.symbol != *self.config.symbol {
            return Err(reject(RejectReason::SymbolMismatch));
        }
        order.validate().map_err(reject)?;
        if self.shared.publisher.knows(&order_id) {
            return Err(reject(RejectReason::DuplicateOrderId));
        }

        self.enqueue(Command::Submit(order))
            .map(|sequence| SubmitAck { order_id, sequence })
            .map_err(reject)
    }

    /// Build the order from a raw request, then `submit` it.
    pub fn submit_request(&self, request: NewOrder) -> Result<SubmitAck, SubmitRejection> {
        let order_id = request.order_id;
        let order = Order::from_request(request)
            .map_err(|reason| SubmitRejection::new(order_id, reason))?;
        self.submit(order)
    }

    /// Sequence a cancel. Unknown or finished orders are reported through
    /// `OrderEvent::CancelRejected`; cancelling twice is harmless.
    pub fn cancel(&self, order_id: OrderId) -> Result<SubmitAck, SubmitRejection> {
        self.enqueue(Command::Cancel(order_id))
            .map(|sequence| SubmitAck { order_id, sequence })
            .map_err(|reason| SubmitRejection::new(order_id, reason))
    }

    fn enqueue(&self, command: Command) -> Result<u64, RejectReason> {
        let shared = &self.shared;
        shared.active_producers.fetch_add(1, Ordering::SeqCst);

        let lifecycle = shared.lifecycle();
        let result = match lifecycle {
            _ if lifecycle.accepts_commands() => match self.producer.get() {
                Some(producer) => producer.offer(command).map_err(|_| {
                    shared
                        .publisher
                        .stats
                        .busy_rejections
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(symbol = %self.config.symbol, "sequencer full, rejecting command");
                    RejectReason::EngineBusy
                }),
                None => Err(RejectReason::EngineNotReady),
            },
            Lifecycle::Created | Lifecycle::Recovering => Err(RejectReason::EngineNotReady),
            _ => Err(RejectReason::EngineStopped),
        };

        shared.active_producers.fetch_sub(1, Ordering::SeqCst);
        result
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Latest published book, limited to `depth` levels per side.
    pub fn get_order_book(&self, depth: usize) -> OrderBookSnapshot {
        self.shared.publisher.snapshot().truncated(depth)
    }

    /// Most recent trades, newest first.
    pub fn get_trades(&self, limit: usize) -> Vec<Trade> {
        self.shared.publisher.recent_trades(limit)
    }

    pub fn order_status(&self, order_id: &OrderId) -> Option<OrderReport> {
        self.shared.publisher.report(order_id)
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.publisher.stats.load()
    }

    /// Announcements accepted by the announcer so far.
    pub fn delivered_announcements(&self) -> u64 {
        self.emitter
            .lock()
            .as_ref()
            .map_or(0, TradeEmitter::delivered)
    }

    /// Announcements that exhausted their retries.
    pub fn unresolved_announcements(&self) -> Vec<TradeAnnouncement> {
        self.emitter
            .lock()
            .as_ref()
            .map(TradeEmitter::unresolved)
            .unwrap_or_default()
    }

    /// Try every unresolved announcement once more; returns how many went out.
    pub fn retry_unresolved(&self) -> usize {
        self.emitter
            .lock()
            .as_ref()
            .map_or(0, TradeEmitter::retry_unresolved)
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for MatchingEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Matching thread
// ============================================================================

struct MatchingWorker {
    core: MatchingCore,
    consumer: SequencerConsumer,
    shared: Arc<Shared>,
    emit: EmitHandle,
    config: EngineConfig,
}

impl MatchingWorker {
    fn run(mut self) {
        if let Some(core_id) = self.config.matching_core_id {
            if !pin_current_thread(core_id) {
                tracing::warn!(core_id, "could not pin matching thread");
            }
        }

        let backoff = Backoff::new();
        let mut since_publish = 0u32;
        let mut dirty = false;

        loop {
            if let Some(command) = self.consumer.poll() {
                let outcome = self.core.process(command);
                self.apply(outcome);
                dirty = true;
                since_publish += 1;
                if self.publish_due(since_publish) {
                    self.publish();
                    since_publish = 0;
                    dirty = false;
                }
                backoff.reset();
                continue;
            }

            if dirty {
                self.publish();
                since_publish = 0;
                dirty = false;
            }

            if self.shared.lifecycle().is_shutting_down()
                && self.shared.active_producers.load(Ordering::SeqCst) == 0
            {
                self.drain();
                break;
            }

            if backoff.is_completed() {
                thread::sleep(self.config.idle_sleep);
            } else {
                backoff.snooze();
            }
        }
        tracing::debug!(
            symbol = %self.config.symbol,
            last_sequence = self.core.last_sequence(),
            "matching thread exiting"
        );
    }

    fn drain(&mut self) {
        let mut drained = 0usize;
        while let Some(command) = self.consumer.poll() {
            let outcome = self.core.process(command);
            self.apply(outcome);
            drained += 1;
        }
        self.publish();
        if drained > 0 {
            tracing::info!(drained, "drained commands during shutdown");
        }
    }

    fn publish_due(&self, since_publish: u32) -> bool {
        match self.config.publish_policy {
            PublishPolicy::EveryCommand => true,
            PublishPolicy::EveryN(n) => since_publish >= n,
        }
    }

    fn publish(&self) {
        let snapshot = self
            .core
            .book()
            .snapshot(self.config.snapshot_depth)
            .at_sequence(self.core.last_sequence());
        self.shared.publisher.publish_snapshot(snapshot);
    }

    fn apply(&self, outcome: CommandOutcome) {
        let publisher = &self.shared.publisher;
        let stats = &publisher.stats;

        for trade in outcome.trades {
            self.emit.emit(trade.announcement());
            publisher.record_trade(trade);
        }
        for report in outcome.reports {
            publisher.record_report(report);
        }

        let mut trades = 0u64;
        for event in &outcome.events {
            match event {
                OrderEvent::OrderMatched { .. } => trades += 1,
                OrderEvent::OrderRejected { .. } => {
                    stats.orders_rejected.fetch_add(1, Ordering::Relaxed);
                },
                OrderEvent::OrderCancelled { .. } => {
                    stats.orders_cancelled.fetch_add(1, Ordering::Relaxed);
                },
                _ => {},
            }
        }
        stats.trades_executed.fetch_add(trades, Ordering::Relaxed);
        stats.commands_processed.fetch_add(1, Ordering::Relaxed);
        stats
            .resting_orders
            .store(self.core.book().order_count() as u64, Ordering::Relaxed);
        stats.last_sequence.store(outcome.sequence, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderState;
    use crate::interfaces::{InMemoryAnnouncer, InMemoryOrderStore, NoOpEventHandler};
    use crate::numeric::{Price, Quantity};
    use std::time::{Duration, Instant};

    fn p(n: i64) -> Price {
        Price::from_integer(n).unwrap()
    }

    fn q(n: i64) -> Quantity {
        Quantity::from_integer(n).unwrap()
    }

    fn engine_with(config: EngineConfig, store: Arc<InMemoryOrderStore>) -> MatchingEngine {
        MatchingEngine::new(
            config,
            store,
            Arc::new(InMemoryAnnouncer::new()),
            Arc::new(NoOpEventHandler),
        )
        .unwrap()
    }

    fn engine() -> MatchingEngine {
        engine_with(
            EngineConfig::ephemeral("BTC-USD"),
            Arc::new(InMemoryOrderStore::new()),
        )
    }

    fn limit(side: Side, price: i64, qty: i64) -> Order {
        Order::limit("BTC-USD", "user", side, p(price), q(qty))
    }

    fn wait_for(engine: &MatchingEngine, sequence: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.get_order_book(1).sequence < sequence {
            assert!(Instant::now() < deadline, "engine did not reach {}", sequence);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_submit_before_start_not_ready() {
        let engine = engine();
        let err = engine.submit(limit(Side::Buy, 100, 1)).unwrap_err();
        assert_eq!(err.reason, RejectReason::EngineNotReady);
        assert_eq!(engine.lifecycle(), Lifecycle::Created);
    }

    #[test]
    fn test_synchronous_validation() {
        let engine = engine();
        engine.start().unwrap();

        let err = engine.submit(limit(Side::Buy, 0, 1)).unwrap_err();
        assert_eq!(err.reason, RejectReason::InvalidPrice);
        let err = engine.submit(limit(Side::Buy, 1, 0)).unwrap_err();
        assert_eq!(err.reason, RejectReason::InvalidQuantity);
        let other = Order::limit("ETH-USD", "u", Side::Buy, p(1), q(1));
        assert_eq!(
            engine.submit(other).unwrap_err().reason,
            RejectReason::SymbolMismatch
        );
    }

    #[test]
    fn test_submit_match_and_query() {
        let engine = engine();
        engine.start().unwrap();

        let sell = limit(Side::Sell, 100, 10);
        let sell_id = sell.id;
        assert_eq!(engine.submit(sell).unwrap().sequence, 1);
        let ack = engine.submit(limit(Side::Buy, 101, 4)).unwrap();
        wait_for(&engine, ack.sequence);

        let book = engine.get_order_book(10);
        assert_eq!(book.asks[0].quantity, q(6));
        assert!(book.bids.is_empty());

        let trades = engine.get_trades(10);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, p(100));

        let status = engine.order_status(&sell_id).unwrap();
        assert_eq!(status.state, OrderState::PartiallyFilled);
        assert_eq!(status.filled_quantity, q(4));
        assert_eq!(engine.stats().trades_executed, 1);
    }

    #[test]
    fn test_shutdown_drains_acknowledged_commands() {
        let engine = engine();
        engine.start().unwrap();

        for i in 0..100 {
            engine.submit(limit(Side::Buy, 100 - (i % 10), 1)).unwrap();
        }
        engine.shutdown();

        assert_eq!(engine.lifecycle(), Lifecycle::Stopped);
        assert_eq!(engine.stats().commands_processed, 100);
        assert_eq!(engine.get_order_book(1).sequence, 100);
        assert_eq!(
            engine.submit(limit(Side::Buy, 100, 1)).unwrap_err().reason,
            RejectReason::EngineStopped
        );
        engine.shutdown();
    }

    #[test]
    fn test_full_ring_reports_busy() {
        let config = EngineConfig::ephemeral("BTC-USD").with_ring_capacity(2);
        let engine = engine_with(config, Arc::new(InMemoryOrderStore::new()));
        engine.start().unwrap();

        // Some commands may be consumed while we offer; keep offering until
        // the ring pushes back.
        let mut busy = false;
        for _ in 0..100_000 {
            if let Err(err) = engine.submit(limit(Side::Buy, 100, 1)) {
                assert_eq!(err.reason, RejectReason::EngineBusy);
                busy = true;
                break;
            }
        }
        if busy {
            assert!(engine.stats().busy_rejections >= 1);
        }
        engine.shutdown();
    }

    #[test]
    fn test_start_twice_fails() {
        let engine = engine();
        engine.start().unwrap();
        assert!(matches!(
            engine.start(),
            Err(EngineError::InvalidLifecycle {
                found: Lifecycle::Running,
                ..
            })
        ));
    }

    #[test]
    fn test_recovery_then_sequence_continues() {
        let store = Arc::new(InMemoryOrderStore::new());
        let resting = limit(Side::Sell, 105, 3).with_progress(Quantity::ZERO, OrderState::Resting, 41);
        let resting_id = resting.id;
        store.upsert(resting);
        store.set_last_trade_sequence("BTC-USD", 9);

        let engine = engine_with(EngineConfig::new("BTC-USD").with_ring_capacity(64), store);
        let report = engine.start().unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(engine.get_order_book(5).asks[0].price, p(105));
        assert!(engine.order_status(&resting_id).is_some());

        let ack = engine.submit(limit(Side::Buy, 105, 1)).unwrap();
        assert_eq!(ack.sequence, 42);
        wait_for(&engine, 42);
        assert_eq!(engine.get_trades(1)[0].sequence_number, 10);
    }

    #[test]
    fn test_failed_recovery_marks_failed() {
        let store = Arc::new(InMemoryOrderStore::new());
        store.upsert(limit(Side::Buy, 101, 1).with_progress(Quantity::ZERO, OrderState::Resting, 1));
        store.upsert(limit(Side::Sell, 100, 1).with_progress(Quantity::ZERO, OrderState::Resting, 2));

        let engine = engine_with(EngineConfig::new("BTC-USD").with_ring_capacity(64), store);
        assert!(matches!(engine.start(), Err(EngineError::Recovery(_))));
        assert_eq!(engine.lifecycle(), Lifecycle::Failed);
        assert_eq!(
            engine.submit(limit(Side::Buy, 1, 1)).unwrap_err().reason,
            RejectReason::EngineStopped
        );
    }
}

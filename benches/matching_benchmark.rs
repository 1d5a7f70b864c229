// ============================================================================
// Matching Engine Benchmarks
// ============================================================================
//
// Benchmark Categories:
// 1. Sequencer - offer/poll through the MPSC ring
// 2. Matching Core - single-threaded command processing
// 3. Order Book Operations - rest/cancel and snapshot copies
// 4. Facade - submit through the full engine
// ============================================================================

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use symbol_matching_engine::domain::{Command, OrderBook, SequencedCommand};
use symbol_matching_engine::engine::MatchingCore;
use symbol_matching_engine::numeric::{Price, Quantity};
use symbol_matching_engine::prelude::*;

const SYMBOL: &str = "BTC-USD";

fn price(n: i64) -> Price {
    Price::from_integer(n).unwrap()
}

fn qty(n: i64) -> Quantity {
    Quantity::from_integer(n).unwrap()
}

fn limit(side: Side, p: i64, q: i64) -> Order {
    Order::limit(SYMBOL, "bench", side, price(p), qty(q))
}

/// Core with `levels` ask levels of one lot each starting at 50000.
fn core_with_asks(levels: i64) -> (MatchingCore, u64) {
    let book = OrderBook::new(SYMBOL, IcebergRefill::LoseTimePriority);
    let mut core = MatchingCore::new(book, Arc::new(NoOpEventHandler));
    let mut sequence = 0;
    for i in 0..levels {
        sequence += 1;
        core.process(SequencedCommand {
            sequence,
            command: Command::Submit(limit(Side::Sell, 50000 + i, 1)),
        });
    }
    (core, sequence)
}

// ============================================================================
// Sequencer Benchmarks
// ============================================================================

fn benchmark_sequencer_offer_poll(c: &mut Criterion) {
    let (producer, mut consumer) = Sequencer::new(1024).unwrap();
    let order = limit(Side::Buy, 50000, 1);

    c.bench_function("sequencer_offer_poll", |b| {
        b.iter(|| {
            let _ = producer.offer(Command::Cancel(black_box(order.id)));
            black_box(consumer.poll());
        });
    });
}

// ============================================================================
// Matching Core Benchmarks
// ============================================================================

fn benchmark_core_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("core_sweep_levels");

    // Buy order that sweeps the first 5 ask levels
    for levels in [100, 1000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(levels),
            levels,
            |b, &levels| {
                b.iter_batched(
                    || core_with_asks(levels),
                    |(mut core, sequence)| {
                        black_box(core.process(SequencedCommand {
                            sequence: sequence + 1,
                            command: Command::Submit(limit(Side::Buy, 50004, 5)),
                        }))
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }

    group.finish();
}

fn benchmark_core_no_match(c: &mut Criterion) {
    c.bench_function("core_rest_and_cancel", |b| {
        let (mut core, mut sequence) = core_with_asks(1000);

        b.iter(|| {
            // Bid below every ask: rests, then is cancelled to keep the book flat
            let bid = limit(Side::Buy, 49000, 1);
            let id = bid.id;
            sequence += 1;
            black_box(core.process(SequencedCommand {
                sequence,
                command: Command::Submit(bid),
            }));
            sequence += 1;
            black_box(core.process(SequencedCommand {
                sequence,
                command: Command::Cancel(id),
            }));
        });
    });
}

// ============================================================================
// Order Book Operations Benchmarks
// ============================================================================

fn benchmark_order_book_snapshot(c: &mut Criterion) {
    c.bench_function("order_book_snapshot", |b| {
        let mut book = OrderBook::new(SYMBOL, IcebergRefill::LoseTimePriority);

        // 100 levels on each side
        for i in 0..100 {
            let mut buy = limit(Side::Buy, 49900 - i * 10, 1);
            let _ = buy.apply(OrderStateTransition::Rest);
            book.insert_resting(buy).unwrap();

            let mut sell = limit(Side::Sell, 50100 + i * 10, 1);
            let _ = sell.apply(OrderStateTransition::Rest);
            book.insert_resting(sell).unwrap();
        }

        b.iter(|| {
            black_box(book.snapshot(10));
        });
    });
}

// ============================================================================
// Facade Benchmarks
// ============================================================================

fn benchmark_engine_submit(c: &mut Criterion) {
    c.bench_function("engine_submit_cancel", |b| {
        let engine = create_from_config(EngineConfig::low_latency(SYMBOL).with_recovery(false))
            .unwrap();
        engine.start().unwrap();

        b.iter(|| {
            let order = limit(Side::Sell, 50000, 1);
            let id = order.id;
            while engine.submit(order.clone()).is_err() {
                std::hint::spin_loop();
            }
            while engine.cancel(id).is_err() {
                std::hint::spin_loop();
            }
        });

        engine.shutdown();
    });
}

criterion_group!(
    benches,
    benchmark_sequencer_offer_poll,
    benchmark_core_sweep,
    benchmark_core_no_match,
    benchmark_order_book_snapshot,
    benchmark_engine_submit,
);
criterion_main!(benches);

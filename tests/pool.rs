//! Concurrency behavior of the column pool.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use colgen_core::model::{Column, Optimality, SlaveStatistics};
use colgen_core::pool::ConstraintPool;
use colgen_core::TimeOfFlight;

fn column_with_objective(objective: f64) -> Column {
    Column::new(
        TimeOfFlight::new(1, 1),
        SlaveStatistics {
            objective,
            ..Default::default()
        },
    )
}

#[test]
fn blocking_consumer_wakes_on_late_producer() {
    let pool = Arc::new(ConstraintPool::new());

    let consumer = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let mut out = Vec::new();
            pool.consume_blocking(&mut out, |entry| entry.column.stats.objective > 1.0);
            out
        })
    };

    // Let the consumer block first, then feed it one rejected and one
    // matching column.
    thread::sleep(Duration::from_millis(30));
    pool.add(column_with_objective(0.5), 1);
    thread::sleep(Duration::from_millis(30));
    pool.add(column_with_objective(2.0), 1);

    let out = consumer.join().unwrap();
    assert_eq!(out.len(), 1);
    assert!((out[0].stats.objective - 2.0).abs() < 1e-12);
    // The rejected column stays pooled.
    assert_eq!(pool.statistics().unconsumed, 1);
}

#[test]
fn certified_column_wakes_a_never_matching_consumer() {
    let pool = Arc::new(ConstraintPool::new());

    let consumer = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let mut out = Vec::new();
            pool.consume_blocking(&mut out, |_| false);
            out
        })
    };

    thread::sleep(Duration::from_millis(30));
    pool.add(
        column_with_objective(0.0).with_optimality(Optimality::Optimal),
        3,
    );

    let out = consumer.join().unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].optimality, Optimality::Optimal);
}

#[test]
fn stale_generations_are_counted_across_threads() {
    let pool = Arc::new(ConstraintPool::new());

    // Two producer generations; the second supersedes the first.
    let first = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            for _ in 0..5 {
                pool.add(column_with_objective(1.0), 1);
            }
        })
    };
    first.join().unwrap();

    pool.set_current_generation(2);
    pool.add(column_with_objective(1.0), 2);

    let mut out = Vec::new();
    pool.consume_blocking(&mut out, |_| true);
    assert_eq!(out.len(), 6);

    let stats = pool.statistics();
    assert_eq!(stats.total_consumed, 6);
    assert_eq!(stats.consumed_from_stale, 5);
    assert_eq!(stats.unconsumed, 0);

    // Consumption stamps stamp the origin generation, not the current one.
    let stale = out
        .iter()
        .filter(|c| c.stats.actual_generation == 1)
        .count();
    assert_eq!(stale, 5);
}

#[test]
fn parallel_producers_lose_no_columns() {
    let pool = Arc::new(ConstraintPool::new());
    let producers: Vec<_> = (0..4)
        .map(|p| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for k in 0..25 {
                    pool.add(column_with_objective((p * 25 + k) as f64), 1);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let mut out = Vec::new();
    pool.consume_blocking(&mut out, |_| true);
    assert_eq!(out.len(), 100);
    assert_eq!(pool.statistics().total_consumed, 100);
}

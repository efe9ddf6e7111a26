//! Bulkhead behavior end to end: saturation, pairing of acquires and
//! releases, the thread-pool variant.

use breakwater_bulkhead::{
    BulkheadConfig, BulkheadError, SemaphoreBulkhead, ThreadPoolBulkhead,
    ThreadPoolBulkheadConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config(max: usize, wait: Option<Duration>) -> BulkheadConfig {
    BulkheadConfig::builder()
        .max_concurrent_calls(max)
        .max_wait_duration(wait)
        .build()
}

/// Saturation: with one permit and zero wait, A acquires, B is refused,
/// and after A releases, C is admitted.
#[test]
fn saturation_round_trip() {
    let bulkhead = Arc::new(SemaphoreBulkhead::of("bh", config(1, Some(Duration::ZERO))));

    let a = {
        let bulkhead = Arc::clone(&bulkhead);
        std::thread::spawn(move || bulkhead.try_acquire_permission())
    };
    assert!(a.join().unwrap());

    let b = {
        let bulkhead = Arc::clone(&bulkhead);
        std::thread::spawn(move || bulkhead.try_acquire_permission())
    };
    assert!(!b.join().unwrap());

    bulkhead.on_complete();

    let c = {
        let bulkhead = Arc::clone(&bulkhead);
        std::thread::spawn(move || bulkhead.try_acquire_permission())
    };
    assert!(c.join().unwrap());
}

/// BH-1: permit holders never exceed the limit, however many threads
/// hammer the bulkhead.
#[test]
fn concurrent_holders_never_exceed_the_limit() {
    const LIMIT: usize = 4;
    const THREADS: usize = 16;

    let bulkhead = Arc::new(SemaphoreBulkhead::of(
        "bh",
        config(LIMIT, Some(Duration::from_millis(200))),
    ));
    let holding = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let bulkhead = Arc::clone(&bulkhead);
            let holding = Arc::clone(&holding);
            let peak = Arc::clone(&peak);
            std::thread::spawn(move || {
                for _ in 0..20 {
                    if bulkhead.acquire_permission_blocking().is_ok() {
                        let now = holding.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_micros(200));
                        holding.fetch_sub(1, Ordering::SeqCst);
                        bulkhead.on_complete();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= LIMIT);
    assert_eq!(bulkhead.metrics().available_concurrent_calls, LIMIT);
}

/// BH-2: every successful execution pairs its acquire with exactly one
/// release; refusals release nothing.
#[test]
fn acquires_and_releases_balance() {
    let finished = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&finished);
    let config = BulkheadConfig::builder()
        .max_concurrent_calls(2)
        .max_wait_duration(Some(Duration::ZERO))
        .on_call_finished(move || {
            f.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    let bulkhead = SemaphoreBulkhead::of("bh", config);

    for _ in 0..5 {
        let _: Result<(), BulkheadError<()>> = bulkhead.execute(|| Ok(()));
    }
    assert_eq!(finished.load(Ordering::SeqCst), 5);
    assert_eq!(bulkhead.metrics().available_concurrent_calls, 2);

    // Saturate, then verify a refused call does not release anything.
    assert!(bulkhead.try_acquire_permission());
    assert!(bulkhead.try_acquire_permission());
    let refused: Result<(), BulkheadError<()>> = bulkhead.execute(|| Ok(()));
    assert!(matches!(refused, Err(BulkheadError::Full(_))));
    assert_eq!(finished.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn async_acquisition_waits_for_a_release() {
    let bulkhead = SemaphoreBulkhead::of("bh", config(1, Some(Duration::from_secs(5))));
    assert!(bulkhead.try_acquire_permission());

    let waiter = {
        let bulkhead = bulkhead.clone();
        tokio::spawn(async move { bulkhead.acquire_permission().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    bulkhead.on_complete();

    assert!(waiter.await.unwrap().is_ok());
}

#[test]
fn pool_executes_and_reports_through_handles() {
    let bulkhead = ThreadPoolBulkhead::of(
        "pool",
        ThreadPoolBulkheadConfig::builder()
            .core_thread_pool_size(2)
            .max_thread_pool_size(2)
            .queue_capacity(16)
            .build(),
    );

    let handles: Vec<_> = (0..8)
        .map(|i| bulkhead.submit(move || i * 2).unwrap())
        .collect();
    let mut results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();
    results.sort();
    assert_eq!(results, vec![0, 2, 4, 6, 8, 10, 12, 14]);
}

#[test]
fn pool_full_signal_is_a_refusal() {
    let bulkhead = ThreadPoolBulkhead::of(
        "pool",
        ThreadPoolBulkheadConfig::builder()
            .core_thread_pool_size(1)
            .max_thread_pool_size(1)
            .queue_capacity(1)
            .build(),
    );

    let gate = Arc::new(std::sync::Barrier::new(2));
    let g = Arc::clone(&gate);
    let running = bulkhead.submit(move || g.wait()).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let queued = bulkhead.submit(|| ()).unwrap();

    let refused = bulkhead.submit(|| ());
    match refused {
        Err(e) => assert_eq!(e.name, "pool"),
        Ok(_) => panic!("expected a full-pool refusal"),
    }

    gate.wait();
    running.join().unwrap();
    queued.join().unwrap();
}

#[tokio::test]
async fn pool_handles_are_futures() {
    let bulkhead = ThreadPoolBulkhead::of(
        "pool",
        ThreadPoolBulkheadConfig::builder()
            .core_thread_pool_size(1)
            .max_thread_pool_size(1)
            .queue_capacity(4)
            .build(),
    );

    let handle = bulkhead.submit(|| {
        std::thread::sleep(Duration::from_millis(10));
        "computed"
    });
    assert_eq!(handle.unwrap().await.unwrap(), "computed");
}

#[test]
fn closed_pool_refuses_new_work() {
    let bulkhead = ThreadPoolBulkhead::of(
        "pool",
        ThreadPoolBulkheadConfig::builder()
            .core_thread_pool_size(1)
            .max_thread_pool_size(1)
            .queue_capacity(4)
            .build(),
    );
    let handle = bulkhead.submit(|| 1).unwrap();
    bulkhead.close();

    assert_eq!(handle.join().unwrap(), 1);
    assert!(bulkhead.submit(|| 2).is_err());
}

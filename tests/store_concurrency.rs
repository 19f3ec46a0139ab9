use std::sync::Arc;
use std::time::Duration;

use rate_accumulator::store::{MergePolicy, Rate, RateStore, Store};

const WRITERS: i64 = 8;
const SAMPLES_PER_WRITER: i64 = 1000;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_at_distinct_timestamps_lose_nothing() {
    let retention = Duration::from_secs((WRITERS * SAMPLES_PER_WRITER) as u64 * 2);
    let store = Arc::new(Store::new(MergePolicy::Sum, retention));

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..SAMPLES_PER_WRITER {
                    store.ingest(Rate::new(writer * SAMPLES_PER_WRITER + i, 1));
                    if i % 100 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.expect("writer task");
    }

    let rates = store.rates();
    assert_eq!(rates.len() as i64, WRITERS * SAMPLES_PER_WRITER);
    assert!(rates.iter().all(|r| r.count == 1));
    assert!(rates.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_at_one_timestamp_sum_exactly() {
    let store = Arc::new(Store::new(MergePolicy::Sum, Duration::from_secs(60)));

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..SAMPLES_PER_WRITER {
                    store.ingest(Rate::new(500, writer + 1));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.expect("writer task");
    }

    // sum over writers of (writer + 1) * SAMPLES_PER_WRITER
    let expected = (1..=WRITERS).sum::<i64>() * SAMPLES_PER_WRITER;
    assert_eq!(store.rate(500), Ok(Rate::new(500, expected)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_see_sorted_snapshots_while_writes_are_in_flight() {
    let store = Arc::new(Store::new(MergePolicy::Sum, Duration::from_secs(100_000)));

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for ts in (0..5_000).rev() {
                store.ingest(Rate::new(ts, 1));
            }
        })
    };

    let reader = {
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                let snapshot = store.rates();
                assert!(snapshot.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
                tokio::task::yield_now().await;
            }
        })
    };

    writer.await.expect("writer");
    reader.await.expect("reader");
    assert_eq!(store.len(), 5_000);
}

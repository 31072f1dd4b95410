//! Per-path ordering and cross-path concurrency of the file queue

use session_context::FileResourceQueue;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_test::assert_ok;

type Log = Arc<Mutex<Vec<&'static str>>>;

fn record(log: &Log, event: &'static str) {
    log.lock().unwrap().push(event);
}

#[tokio::test]
async fn test_same_path_runs_in_submission_order() {
    let queue = FileResourceQueue::new();
    let log: Log = Arc::default();

    let slow_log = log.clone();
    let op_a = queue.enqueue("/a", move || async move {
        record(&slow_log, "a:start");
        tokio::time::sleep(Duration::from_millis(500)).await;
        record(&slow_log, "a:end");
    });
    let fast_log = log.clone();
    let op_b = queue.enqueue("/a", move || async move {
        record(&fast_log, "b:start");
        record(&fast_log, "b:end");
    });

    let (a, b) = tokio::join!(op_a, op_b);
    assert_ok!(a);
    assert_ok!(b);
    assert_eq!(*log.lock().unwrap(), vec!["a:start", "a:end", "b:start", "b:end"]);
}

#[tokio::test]
async fn test_equivalent_spellings_share_a_queue() {
    let queue = FileResourceQueue::new();
    let log: Log = Arc::default();

    let first = log.clone();
    let op_a = queue.enqueue("/work/src/lib.rs", move || async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        record(&first, "first");
    });
    let second = log.clone();
    let op_b = queue.enqueue("/work/src/../src/./lib.rs", move || async move {
        record(&second, "second");
    });

    let _ = tokio::join!(op_a, op_b);
    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(queue.size(), 1);
}

#[tokio::test]
async fn test_disjoint_paths_overlap() {
    let queue = FileResourceQueue::new();
    let started = Instant::now();

    let op_a = queue.enqueue("/disjoint/a", || async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Instant::now()
    });
    let op_b = queue.enqueue("/disjoint/b", || async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Instant::now()
    });

    let (a, b) = tokio::join!(op_a, op_b);
    assert_ok!(a);
    assert_ok!(b);
    // Serialized execution would take at least 600ms
    assert!(started.elapsed() < Duration::from_millis(550), "{:?}", started.elapsed());
}

#[tokio::test]
async fn test_multi_path_operation_waits_for_every_path() {
    let queue = FileResourceQueue::new();
    let log: Log = Arc::default();

    let a_log = log.clone();
    let on_a = queue.enqueue("/multi/a", move || async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        record(&a_log, "a");
    });
    let b_log = log.clone();
    let on_b = queue.enqueue("/multi/b", move || async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        record(&b_log, "b");
    });
    let both_log = log.clone();
    let on_both = queue.enqueue_multiple(&["/multi/b", "/multi/a"], move || async move {
        record(&both_log, "both");
    });
    let after_log = log.clone();
    let after_b = queue.enqueue("/multi/b", move || async move {
        record(&after_log, "after-b");
    });

    let _ = tokio::join!(on_a, on_b, on_both, after_b);
    assert_eq!(*log.lock().unwrap(), vec!["b", "a", "both", "after-b"]);
}

#[tokio::test]
async fn test_failed_operation_releases_the_path() {
    let queue = FileResourceQueue::new();

    let failing = queue.enqueue("/fail/x", || async {
        Err::<(), std::io::Error>(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
    });
    let next = queue.enqueue("/fail/x", || async { Ok::<_, std::io::Error>("written") });

    let failed = failing.await.unwrap();
    assert!(failed.is_err());
    assert_eq!(next.await.unwrap().unwrap(), "written");
}

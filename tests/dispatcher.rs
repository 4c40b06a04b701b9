//! Producer-side behaviour of the dispatcher under concurrent load.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rstest::rstest;
use task_server::{
    Dispatcher, DispatcherState, Error, LogSink, TaskFailure, TaskId, TaskMeta, WriterSink,
};

/// Parks inside `record` until released.
struct GateSink {
    entered: Mutex<mpsc::Sender<TaskId>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl LogSink<u32> for GateSink {
    fn record(
        &self,
        id: TaskId,
        _meta: &TaskMeta,
        _outcome: Result<&u32, &TaskFailure>,
    ) -> std::io::Result<()> {
        let _ = self.entered.lock().expect("entered mutex poisoned").send(id);
        let _ = self
            .release
            .lock()
            .expect("release mutex poisoned")
            .recv_timeout(Duration::from_secs(5));
        Ok(())
    }
}

struct PanickingSink;

impl LogSink<u32> for PanickingSink {
    fn record(
        &self,
        _id: TaskId,
        meta: &TaskMeta,
        _outcome: Result<&u32, &TaskFailure>,
    ) -> std::io::Result<()> {
        panic!("sink cannot record {}", meta.operation);
    }
}

fn running<T: Send + 'static>() -> Arc<Dispatcher<T>> {
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.start().expect("start");
    dispatcher
}

#[rstest]
#[case::one_producer(1, 1_000)]
#[case::three_producers(3, 10_000)]
#[case::eight_producers(8, 500)]
fn concurrent_submissions_get_unique_ids(#[case] producers: usize, #[case] per_producer: usize) {
    let dispatcher = running::<u64>();
    let barrier = Arc::new(Barrier::new(producers));

    let handles: Vec<_> = (0..producers)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..per_producer)
                    .map(|i| dispatcher.submit(move || i as u64).expect("submit"))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().expect("producer thread panicked") {
            assert!(seen.insert(id), "id {id} issued twice");
        }
    }
    assert_eq!(seen.len(), producers * per_producer);
    dispatcher.stop().expect("stop");
}

#[test]
fn repeated_await_returns_value_without_rerunning() {
    let dispatcher = running::<String>();
    let runs = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&runs);
    let id = dispatcher
        .submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            "value".to_string()
        })
        .expect("submit");

    for _ in 0..3 {
        assert_eq!(dispatcher.await_result(id).expect("await"), "value");
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    dispatcher.stop().expect("stop");
}

#[test]
fn failing_task_is_isolated() {
    let dispatcher = running::<i32>();
    let ids: Vec<_> = (1..=5)
        .map(|n| {
            dispatcher
                .submit_fallible(move || if n == 3 { Err("task three failed") } else { Ok(n * 10) })
                .expect("submit")
        })
        .collect();

    for (index, &id) in ids.iter().enumerate() {
        let n = index as i32 + 1;
        match dispatcher.await_result(id) {
            Ok(value) => assert_eq!(value, n * 10),
            Err(Error::TaskExecutionFailure { id: failed, failure }) => {
                assert_eq!(n, 3);
                assert_eq!(failed, id);
                assert_eq!(failure, TaskFailure::Failed("task three failed".into()));
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    dispatcher.stop().expect("stop");
}

#[test]
fn panicking_task_is_isolated() {
    let dispatcher = running::<u8>();
    let before = dispatcher.submit(|| 1).expect("submit");
    let boom = dispatcher.submit(|| panic!("boom")).expect("submit");
    let after = dispatcher.submit(|| 3).expect("submit");

    assert_eq!(dispatcher.await_result(before).expect("await"), 1);
    let err = dispatcher.await_result(boom).expect_err("panic captured");
    assert_eq!(err.task_failure(), Some(&TaskFailure::Panicked("boom".into())));
    assert_eq!(dispatcher.await_result(after).expect("await"), 3);
    dispatcher.stop().expect("stop");
}

#[test]
fn stop_drains_queued_tasks() {
    let dispatcher = running::<usize>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    // Hold the worker so the remaining tasks are still queued when stop() begins.
    let gate = dispatcher
        .submit(move || {
            release_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("release");
            0
        })
        .expect("submit");
    let ids: Vec<_> = (1..=200)
        .map(|i| dispatcher.submit(move || i).expect("submit"))
        .collect();
    assert!(dispatcher.pending() > 0);

    let stopper = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || dispatcher.stop())
    };
    let deadline = Instant::now() + Duration::from_secs(1);
    while dispatcher.state() == DispatcherState::Running && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    // The worker is still parked in the gate, so the drain cannot have finished.
    assert_eq!(dispatcher.state(), DispatcherState::Stopping);
    assert!(matches!(dispatcher.submit(|| 0), Err(Error::NotRunning)));
    release_tx.send(()).expect("release worker");
    stopper
        .join()
        .expect("stopper thread panicked")
        .expect("stop");

    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert_eq!(dispatcher.pending(), 0);
    assert_eq!(dispatcher.await_result(gate).expect("await"), 0);
    for (index, id) in ids.into_iter().enumerate() {
        assert_eq!(dispatcher.await_result(id).expect("await"), index + 1);
    }
}

#[test]
fn single_producer_order_is_fifo() {
    let dispatcher = running::<u64>();
    let clock = Arc::new(AtomicU64::new(0));
    let ids: Vec<_> = (0..500)
        .map(|_| {
            let clock = Arc::clone(&clock);
            dispatcher
                .submit(move || clock.fetch_add(1, Ordering::SeqCst))
                .expect("submit")
        })
        .collect();

    let stamps: Vec<u64> = ids
        .iter()
        .map(|&id| dispatcher.await_result(id).expect("await"))
        .collect();
    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    dispatcher.stop().expect("stop");
}

#[test]
fn interleaved_producers_keep_their_own_order() {
    let dispatcher = running::<(usize, u64)>();
    let clock = Arc::new(AtomicU64::new(0));
    let handles: Vec<_> = (0..4)
        .map(|producer| {
            let dispatcher = Arc::clone(&dispatcher);
            let clock = Arc::clone(&clock);
            thread::spawn(move || {
                let ids: Vec<_> = (0..250)
                    .map(|_| {
                        let clock = Arc::clone(&clock);
                        dispatcher
                            .submit(move || (producer, clock.fetch_add(1, Ordering::SeqCst)))
                            .expect("submit")
                    })
                    .collect();
                ids.into_iter()
                    .map(|id| dispatcher.await_result(id).expect("await"))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for (producer, handle) in handles.into_iter().enumerate() {
        let results = handle.join().expect("producer thread panicked");
        assert!(results.iter().all(|&(p, _)| p == producer));
        assert!(results.windows(2).all(|pair| pair[0].1 < pair[1].1));
    }
    dispatcher.stop().expect("stop");
}

#[test]
fn submit_after_stop_is_rejected() {
    let dispatcher = running::<u8>();
    let id = dispatcher.submit(|| 5).expect("submit");
    dispatcher.stop().expect("stop");
    assert!(matches!(dispatcher.submit(|| 6), Err(Error::NotRunning)));
    // Results from before the stop remain readable.
    assert_eq!(dispatcher.await_result(id).expect("await"), 5);
}

#[test]
fn unknown_id_is_rejected_without_blocking() {
    let dispatcher = running::<u8>();
    assert!(matches!(dispatcher.await_result(0), Err(Error::UnknownTaskId(0))));
    let id = dispatcher.submit(|| 1).expect("submit");
    assert!(matches!(
        dispatcher.await_result(id + 100),
        Err(Error::UnknownTaskId(unknown)) if unknown == id + 100
    ));
    dispatcher.stop().expect("stop");
}

#[test]
fn sink_receives_one_line_per_described_task() {
    let sink = Arc::new(WriterSink::new(Vec::new()));
    let dispatcher = Dispatcher::<f64>::builder()
        .sink(sink.clone())
        .build()
        .expect("build");
    dispatcher.start().expect("start");
    for x in [1.0f64, 4.0, 9.0] {
        dispatcher
            .submit_with_meta(move || x.sqrt(), TaskMeta::new("sqrt", [x]))
            .expect("submit");
    }
    dispatcher.submit(|| 0.0).expect("submit");
    dispatcher.stop().expect("stop");
    drop(dispatcher);

    let sink = Arc::try_unwrap(sink).unwrap_or_else(|_| panic!("sink still shared"));
    let text = String::from_utf8(sink.into_inner()).expect("utf8");
    assert_eq!(text, "sqrt 1 = 1\nsqrt 4 = 2\nsqrt 9 = 3\n");
}

#[test]
fn blocked_sink_does_not_block_submitters() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let sink = Arc::new(GateSink {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let dispatcher = Arc::new(
        Dispatcher::<u32>::builder()
            .sink(sink)
            .build()
            .expect("build"),
    );
    dispatcher.start().expect("start");
    let first = dispatcher
        .submit_with_meta(|| 1, TaskMeta::new("first", [1]))
        .expect("submit");
    let parked = entered_rx
        .recv_timeout(Duration::from_secs(1))
        .expect("sink entered");
    assert_eq!(parked, first);

    // The worker is stuck in the sink; submissions from another thread still return.
    let (done_tx, done_rx) = mpsc::channel();
    let submitter = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            let ids: Vec<_> = (0..50u32)
                .map(|i| dispatcher.submit(move || i).expect("submit"))
                .collect();
            done_tx.send(ids).expect("send ids");
        })
    };
    let ids = done_rx
        .recv_timeout(Duration::from_secs(1))
        .expect("submit returned while sink was blocked");
    submitter.join().expect("submitter thread panicked");
    assert_eq!(dispatcher.pending(), 50);

    release_tx.send(()).expect("release sink");
    assert_eq!(dispatcher.await_result(first).expect("await"), 1);
    for (expected, id) in ids.into_iter().enumerate() {
        assert_eq!(dispatcher.await_result(id).expect("await"), expected as u32);
    }
    dispatcher.stop().expect("stop");
}

#[test]
fn panicking_sink_leaves_worker_running() {
    let dispatcher = Arc::new(
        Dispatcher::<u32>::builder()
            .sink(Arc::new(PanickingSink))
            .build()
            .expect("build"),
    );
    dispatcher.start().expect("start");
    let described = dispatcher
        .submit_with_meta(|| 10, TaskMeta::new("ten", [10]))
        .expect("submit");
    let plain = dispatcher.submit(|| 20).expect("submit");

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            let results = [described, plain].map(|id| dispatcher.await_result(id).ok());
            tx.send(results).expect("send results");
        })
    };
    let results = rx
        .recv_timeout(Duration::from_secs(3))
        .expect("awaits returned");
    waiter.join().expect("waiter thread panicked");
    assert_eq!(results, [Some(10), Some(20)]);
    dispatcher.stop().expect("stop");
}

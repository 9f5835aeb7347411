use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use backflow_stream::{Emitter, FlowError, Publisher, StreamSource, UNBOUNDED};

use self::utils::{run_test, wait_until, Cleanup, Recorder, TIMEOUT};

mod utils;

fn counter(count: i32, cleanup: Arc<Cleanup>) -> impl Publisher<i32> {
    StreamSource::new(move |out: &mut Emitter<'_, i32>| {
        let _guard = cleanup.guard();
        for i in 0..count {
            out.emit(i)?;
        }
        Ok(())
    })
}

#[test]
fn source_one_by_one() {
    run_test(|| {
        let cleanup = Cleanup::new();
        let (sub, record) = Recorder::one_by_one();
        counter(10, cleanup.clone()).subscribe(sub);
        assert_eq!(record.items(), (0..10).collect::<Vec<_>>());
        assert_eq!(record.completions(), 1);
        assert_eq!(record.error_count(), 0);
        assert_eq!(cleanup.count(), 1);
    })
}

#[test]
fn source_cancel_after_item() {
    run_test(|| {
        let cleanup = Cleanup::new();
        let (sub, record) = Recorder::with_hook(1, |count, sub| {
            if count == 6 {
                sub.cancel();
            } else {
                sub.request(1);
            }
        });
        counter(10, cleanup.clone()).subscribe(sub);
        assert_eq!(record.items(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(record.terminal_count(), 0);
        assert_eq!(cleanup.count(), 1);
    })
}

#[test]
fn source_empty() {
    run_test(|| {
        let (sub, record) = Recorder::<i32>::manual();
        StreamSource::new(|_out: &mut Emitter<'_, i32>| Ok(())).subscribe(sub);
        assert_eq!(record.item_count(), 0);
        assert_eq!(record.completions(), 1);
    })
}

#[test]
fn source_resubscribe() {
    run_test(|| {
        let cleanup = Cleanup::new();
        let source = counter(5, cleanup.clone());
        for _ in 0..3 {
            let (sub, record) = Recorder::unbounded();
            source.subscribe(sub);
            assert_eq!(record.items(), vec![0, 1, 2, 3, 4]);
            assert_eq!(record.completions(), 1);
        }
        assert_eq!(cleanup.count(), 3);
    })
}

#[test]
fn source_saturated_demand() {
    run_test(|| {
        let (sub, record) = Recorder::with_hook(UNBOUNDED - 1, |count, sub| {
            if count == 1 {
                sub.request(UNBOUNDED);
            }
        });
        counter(1000, Cleanup::new()).subscribe(sub);
        assert_eq!(record.item_count(), 1000);
        assert_eq!(record.completions(), 1);
        let sub = record.subscription().unwrap();
        sub.request(1);
    })
}

#[test]
fn source_protocol_violation() {
    run_test(|| {
        for &n in &[0, -1, -100, i64::MIN] {
            let cleanup = Cleanup::new();
            let (sub, record) = Recorder::with_hook(1, move |count, sub| {
                if count == 2 {
                    sub.request(n);
                } else {
                    sub.request(1);
                }
            });
            counter(10, cleanup.clone()).subscribe(sub);
            assert_eq!(record.items(), vec![0, 1]);
            assert_eq!(record.completions(), 0);
            assert_eq!(record.error_count(), 1, "Expected one error for {}", n);
            match record.take_error() {
                Some(FlowError::ProtocolViolation { requested }) => assert_eq!(requested, n),
                other => panic!("Unexpected result: {:?}", other),
            }
            assert_eq!(cleanup.count(), 1);
        }
    })
}

#[test]
fn source_violation_while_parked() {
    run_test(|| {
        let cleanup = Cleanup::new();
        let (sub, record) = Recorder::manual();
        let th = thread::spawn({
            let record = record.clone();
            move || {
                assert!(wait_until(TIMEOUT, || record.subscription().is_some()));
                record.request(2);
                assert!(record.wait_items(2, TIMEOUT));
                thread::sleep(Duration::from_millis(50));
                record.request(-1);
            }
        });
        counter(10, cleanup.clone()).subscribe(sub);
        th.join().unwrap();
        assert_eq!(record.items(), vec![0, 1]);
        assert!(record.take_error().unwrap().is_protocol_violation());
        assert_eq!(record.terminal_count(), 0);
    })
}

#[test]
fn source_cancel_then_invalid_request() {
    run_test(|| {
        let cleanup = Cleanup::new();
        let (sub, record) = Recorder::with_hook(1, |count, sub| {
            if count == 3 {
                sub.cancel();
                sub.request(0);
            } else {
                sub.request(1);
            }
        });
        counter(10, cleanup.clone()).subscribe(sub);
        assert_eq!(record.items(), vec![0, 1, 2]);
        assert_eq!(record.error_count(), 0);
        assert_eq!(record.terminal_count(), 0);
        assert_eq!(cleanup.count(), 1);
    })
}

#[test]
fn source_cancel_while_parked() {
    run_test(|| {
        let cleanup = Cleanup::new();
        let (sub, record) = Recorder::manual();
        let th = thread::spawn({
            let record = record.clone();
            move || {
                assert!(wait_until(TIMEOUT, || record.subscription().is_some()));
                record.request(3);
                assert!(record.wait_items(3, TIMEOUT));
                thread::sleep(Duration::from_millis(50));
                record.cancel();
                record.cancel();
                record.request(5);
            }
        });
        counter(100, cleanup.clone()).subscribe(sub);
        th.join().unwrap();
        assert_eq!(record.items(), vec![0, 1, 2]);
        assert_eq!(record.terminal_count(), 0);
        assert_eq!(cleanup.count(), 1);
    })
}

#[test]
fn source_async_requester() {
    run_test(|| {
        let (sub, record) = Recorder::manual();
        let requests = Arc::new(AtomicUsize::new(0));
        let th = thread::spawn({
            let record = record.clone();
            let requests = requests.clone();
            move || {
                assert!(wait_until(TIMEOUT, || record.subscription().is_some()));
                for _ in 0..10 {
                    thread::sleep(Duration::from_millis(5));
                    // delivered items never exceed the demand signalled so far
                    assert!(record.item_count() <= requests.load(Ordering::SeqCst));
                    requests.fetch_add(1, Ordering::SeqCst);
                    record.request(1);
                }
            }
        });
        counter(10, Cleanup::new()).subscribe(sub);
        th.join().unwrap();
        assert_eq!(record.items(), (0..10).collect::<Vec<_>>());
        assert_eq!(record.completions(), 1);
    })
}

#[test]
fn source_generator_error() {
    run_test(|| {
        let (sub, record) = Recorder::unbounded();
        StreamSource::new(|out: &mut Emitter<'_, i32>| {
            out.emit(1)?;
            Err(FlowError::failed("generator failed"))
        })
        .subscribe(sub);
        assert_eq!(record.items(), vec![1]);
        match record.take_error() {
            Some(FlowError::Failed(err)) => assert_eq!(err.to_string(), "generator failed"),
            other => panic!("Unexpected result: {:?}", other),
        }
        assert_eq!(record.completions(), 0);
    })
}

#[test]
fn source_generator_panic() {
    run_test(|| {
        let (sub, record) = Recorder::unbounded();
        StreamSource::new(|out: &mut Emitter<'_, i32>| {
            out.emit(1)?;
            panic!("expected");
        })
        .subscribe(sub);
        assert_eq!(record.items(), vec![1]);
        match record.take_error() {
            Some(FlowError::Panicked(msg)) => assert_eq!(msg, "expected"),
            other => panic!("Unexpected result: {:?}", other),
        }
    })
}

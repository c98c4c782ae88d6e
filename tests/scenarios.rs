//! End-to-end scenario tests for the work scheduler.
//!
//! Each test below observes the ordering guarantees the scheduler makes
//! about submission prefixes, atomic windows, barriers, and cross-scheduler
//! rendezvous, by recording observations into a shared log and asserting on
//! its final shape.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fiber_scheduler::{Outcome, Scheduler, SubmitOptions};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("fiber_scheduler=debug"))
        .with_test_writer()
        .try_init();
}

fn push(log: &Arc<Mutex<Vec<i64>>>, value: i64) {
    log.lock().unwrap().push(value);
}

#[tokio::test]
async fn action_then_two_interleaved_async_items() {
    init_tracing();
    let w = Scheduler::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let l = Arc::clone(&log);
    w.invoke_action(move || push(&l, 0 /* "A" */), SubmitOptions::NORMAL, None)
        .unwrap();

    let l = Arc::clone(&log);
    let b_done = w
        .invoke_async_await(
            move |_token| {
                Box::pin(async move {
                    push(&l, 1 /* "B1" */);
                    tokio::task::yield_now().await;
                    push(&l, 2 /* "B2" */);
                    Ok(())
                })
            },
            SubmitOptions::NORMAL,
            None,
        )
        .unwrap();

    let l = Arc::clone(&log);
    let c_done = w
        .invoke_async_await(
            move |_token| {
                Box::pin(async move {
                    push(&l, 3 /* "C1" */);
                    tokio::task::yield_now().await;
                    push(&l, 4 /* "C2" */);
                    Ok(())
                })
            },
            SubmitOptions::NORMAL,
            None,
        )
        .unwrap();

    b_done.await.unwrap();
    c_done.await.unwrap();

    // A, B1, C1, B2, C2 -- the two suspended prefixes both run before either
    // resumes, matched against tags rather than literal text.
    assert_eq!(*log.lock().unwrap(), vec![0, 1, 3, 2, 4]);
}

#[tokio::test]
async fn ten_async_items_prefixes_precede_resumptions() {
    let w = Scheduler::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut waits = Vec::new();
    for i in 1..=10i64 {
        let l = Arc::clone(&log);
        let rx = w
            .invoke_async_await(
                move |_token| {
                    Box::pin(async move {
                        push(&l, i);
                        tokio::task::yield_now().await;
                        push(&l, -i);
                        Ok(())
                    })
                },
                SubmitOptions::NORMAL,
                None,
            )
            .unwrap();
        waits.push(rx);
    }
    for rx in waits {
        rx.await.unwrap();
    }

    let snapshot = log.lock().unwrap().clone();
    assert_eq!(snapshot.len(), 20);
    assert_eq!(&snapshot[..10], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    let mut tail = snapshot[10..].to_vec();
    tail.sort_unstable();
    assert_eq!(tail, vec![-10, -9, -8, -7, -6, -5, -4, -3, -2, -1]);
}

#[tokio::test]
async fn atomic_async_item_runs_with_no_interleaving() {
    let w = Scheduler::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut waits = Vec::new();
    for i in 1..=10i64 {
        let l = Arc::clone(&log);
        waits.push(
            w.invoke_async_await(
                move |_token| {
                    Box::pin(async move {
                        push(&l, i);
                        tokio::task::yield_now().await;
                        push(&l, -i);
                        Ok(())
                    })
                },
                SubmitOptions::NORMAL,
                None,
            )
            .unwrap(),
        );
    }

    let l = Arc::clone(&log);
    let atomic_done = w
        .invoke_async_await(
            move |_token| {
                Box::pin(async move {
                    push(&l, 100);
                    tokio::task::yield_now().await;
                    push(&l, 101);
                    Ok(())
                })
            },
            SubmitOptions::ATOMIC,
            None,
        )
        .unwrap();

    for rx in waits {
        rx.await.unwrap();
    }
    atomic_done.await.unwrap();

    let snapshot = log.lock().unwrap().clone();
    let pos_100 = snapshot.iter().position(|&v| v == 100).unwrap();
    assert_eq!(snapshot[pos_100 + 1], 101, "100 must be immediately followed by 101");
}

#[tokio::test]
async fn barrier_separates_two_batches() {
    let w = Scheduler::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut first_batch = Vec::new();
    for i in 1..=10i64 {
        let l = Arc::clone(&log);
        first_batch.push(
            w.invoke_async_await(
                move |_token| {
                    Box::pin(async move {
                        push(&l, i);
                        tokio::task::yield_now().await;
                        push(&l, -i);
                        Ok(())
                    })
                },
                SubmitOptions::NORMAL,
                None,
            )
            .unwrap(),
        );
    }

    let barrier = w.set_barrier_await();

    let mut second_batch = Vec::new();
    for i in 101..=110i64 {
        let l = Arc::clone(&log);
        second_batch.push(
            w.invoke_async_await(
                move |_token| {
                    Box::pin(async move {
                        push(&l, i);
                        tokio::task::yield_now().await;
                        push(&l, -i);
                        Ok(())
                    })
                },
                SubmitOptions::NORMAL,
                None,
            )
            .unwrap(),
        );
    }

    let outcome = tokio::time::timeout(Duration::from_secs(1), barrier)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Outcome::Completed));

    for rx in first_batch {
        rx.await.unwrap();
    }
    for rx in second_batch {
        rx.await.unwrap();
    }

    let snapshot = log.lock().unwrap().clone();
    assert_eq!(snapshot.len(), 40);
    let first_twenty = &snapshot[..20];
    let last_twenty = &snapshot[20..];
    assert!(first_twenty.iter().all(|v| v.abs() < 100));
    assert!(last_twenty.iter().all(|v| v.abs() >= 100));
}

#[tokio::test]
async fn cross_scheduler_rendezvous_excludes_other_work() {
    let w1 = Scheduler::with_name("w1");
    let w2 = Scheduler::with_name("w2");
    let log = Arc::new(Mutex::new(Vec::new()));
    // Trips to nonzero if any w1/w2 work runs while the protected region is
    // open; asserted back to zero at the end.
    let overlap = Arc::new(AtomicU32::new(0));
    let protected_open = Arc::new(AtomicU32::new(0));

    let l = Arc::clone(&log);
    let po = Arc::clone(&protected_open);
    let ov = Arc::clone(&overlap);
    let w1_rx = w1
        .invoke_async_await(
            move |_token| {
                Box::pin(async move {
                    if po.load(Ordering::SeqCst) > 0 {
                        ov.fetch_add(1, Ordering::SeqCst);
                    }
                    push(&l, 1);
                    tokio::task::yield_now().await;
                    // Checked again on the resumption half: this is where a
                    // run loop that raced its own park (rather than exiting
                    // it unconditionally) would actually overlap the
                    // protected region, since the owner's rendezvous work
                    // only begins yielding after this item's first poll.
                    if po.load(Ordering::SeqCst) > 0 {
                        ov.fetch_add(1, Ordering::SeqCst);
                    }
                    push(&l, -1);
                    Ok(())
                })
            },
            SubmitOptions::NORMAL,
            None,
        )
        .unwrap();

    let l = Arc::clone(&log);
    let po = Arc::clone(&protected_open);
    let ov = Arc::clone(&overlap);
    let w2_rx = w2
        .invoke_async_await(
            move |_token| {
                Box::pin(async move {
                    if po.load(Ordering::SeqCst) > 0 {
                        ov.fetch_add(1, Ordering::SeqCst);
                    }
                    push(&l, 2);
                    tokio::task::yield_now().await;
                    if po.load(Ordering::SeqCst) > 0 {
                        ov.fetch_add(1, Ordering::SeqCst);
                    }
                    push(&l, -2);
                    Ok(())
                })
            },
            SubmitOptions::NORMAL,
            None,
        )
        .unwrap();

    let l = Arc::clone(&log);
    let po = Arc::clone(&protected_open);
    let sync_rx = w1
        .invoke_async_await(
            move |_token| {
                Box::pin(async move {
                    po.fetch_add(1, Ordering::SeqCst);
                    push(&l, 100);
                    tokio::task::yield_now().await;
                    push(&l, 101);
                    po.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            },
            SubmitOptions::NORMAL,
            Some(&[&w2]),
        )
        .unwrap();

    w1_rx.await.unwrap();
    w2_rx.await.unwrap();
    sync_rx.await.unwrap();

    assert_eq!(overlap.load(Ordering::SeqCst), 0);
    assert_eq!(log.lock().unwrap().len(), 6);
}

#[tokio::test]
async fn close_cancels_outstanding_work_before_it_runs() {
    let w = Scheduler::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let reached_sleep = Arc::new(AtomicU32::new(0));

    let l = Arc::clone(&log);
    let r = Arc::clone(&reached_sleep);
    let token = w.cancellation_token();
    let rx = w
        .invoke_async_await(
            move |task_token| {
                Box::pin(async move {
                    push(&l, 1);
                    r.fetch_add(1, Ordering::SeqCst);
                    tokio::select! {
                        _ = task_token.cancelled() => {}
                        _ = tokio::time::sleep(Duration::from_secs(3600)) => {
                            push(&l, 2);
                        }
                    }
                    Ok(())
                })
            },
            SubmitOptions::NORMAL,
            None,
        )
        .unwrap();

    tokio::task::yield_now().await;
    token.cancel();
    w.close();

    let outcome = tokio::time::timeout(Duration::from_secs(1), rx)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Outcome::Completed | Outcome::Cancelled));
    assert_eq!(reached_sleep.load(Ordering::SeqCst), 1);
    assert!(!log.lock().unwrap().contains(&2));
}

#[tokio::test]
async fn repeated_close_is_idempotent() {
    let w = Scheduler::new();
    w.close();
    w.close();

    // Submissions after close are dropped silently, not rejected -- only
    // the carried promise (if any) observes the cancellation.
    let rx = w
        .invoke_action_await(|| {}, SubmitOptions::NORMAL, None)
        .unwrap();
    let outcome = rx.await.unwrap();
    assert!(matches!(outcome, Outcome::Cancelled));
}

#[tokio::test]
async fn unhandled_fault_observer_sees_panics() {
    let w = Scheduler::new();
    let seen = Arc::new(AtomicI32::new(0));
    let s = Arc::clone(&seen);
    w.on_unhandled(move |_name, _err| {
        s.store(1, Ordering::SeqCst);
    });

    let rx = w
        .invoke_action_await(
            || panic!("boom"),
            SubmitOptions::NORMAL,
            None,
        )
        .unwrap();
    let outcome = rx.await.unwrap();
    assert!(matches!(outcome, Outcome::Faulted(_)));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

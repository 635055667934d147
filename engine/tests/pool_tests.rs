//! Session pool behavior under contention, failure, and shutdown
//!
//! All tests run against the deterministic mock session factory, so no
//! model files are involved.

use rinfer_common::{ModelDescriptor, OutputKind};
use rinfer_engine::mock::MockSessionFactory;
use rinfer_engine::{Batch, EngineError, SessionPool};
use rinfer_tokenization::EncodedSequence;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn descriptor() -> Arc<ModelDescriptor> {
    Arc::new(
        ModelDescriptor::new("mock.onnx", OutputKind::Classification)
            .with_max_sequence_length(16),
    )
}

fn seq(ids: &[u32]) -> EncodedSequence {
    EncodedSequence {
        ids: ids.to_vec(),
        attention_mask: vec![1; ids.len()],
        source_chars: 0,
        truncated: false,
    }
}

fn single_batch(ids: &[u32]) -> Batch {
    Batch::assemble(&[(0, seq(ids))], 0, 16).expect("batch")
}

fn pool_with(factory: &Arc<MockSessionFactory>, capacity: usize) -> Arc<SessionPool> {
    let as_factory: Arc<dyn rinfer_engine::SessionFactory> = Arc::clone(factory);
    Arc::new(SessionPool::new(as_factory, capacity).expect("pool"))
}

#[test]
fn zero_capacity_is_rejected() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let as_factory: Arc<dyn rinfer_engine::SessionFactory> = factory;
    assert!(matches!(
        SessionPool::new(as_factory, 0),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn sessions_are_created_eagerly() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let pool = pool_with(&factory, 3);
    assert_eq!(factory.created_count(), 3);
    assert_eq!(pool.capacity(), 3);
    assert_eq!(pool.live(), 3);
}

#[test]
fn lease_runs_a_batch() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let pool = pool_with(&factory, 1);

    let mut lease = pool.lease(None).expect("lease");
    let raw = lease.run(&single_batch(&[1, 2, 3])).expect("run");
    assert_eq!(raw.shape[0], 1);
}

#[test]
fn waiters_are_served_in_arrival_order() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let pool = pool_with(&factory, 1);
    let served = Arc::new(Mutex::new(Vec::new()));

    // Occupy the only session long enough for every waiter to queue up
    let holder = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let lease = pool.lease(None).expect("holder lease");
            thread::sleep(Duration::from_millis(250));
            drop(lease);
        })
    };
    thread::sleep(Duration::from_millis(30));

    let mut waiters = Vec::new();
    for i in 0..4usize {
        let pool = Arc::clone(&pool);
        let served = Arc::clone(&served);
        waiters.push(thread::spawn(move || {
            // Stagger arrivals so queue order is deterministic
            thread::sleep(Duration::from_millis(i as u64 * 30));
            let lease = pool.lease(None).expect("waiter lease");
            served.lock().unwrap().push(i);
            drop(lease);
        }));
    }

    holder.join().unwrap();
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(*served.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn one_session_never_runs_two_batches_at_once() {
    let factory = Arc::new(
        MockSessionFactory::new(descriptor()).with_run_delay(Duration::from_millis(20)),
    );
    let pool = pool_with(&factory, 1);

    let mut threads = Vec::new();
    for _ in 0..4 {
        let pool = Arc::clone(&pool);
        threads.push(thread::spawn(move || {
            let mut lease = pool.lease(None).expect("lease");
            lease.run(&single_batch(&[1, 2])).expect("run");
        }));
    }
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(factory.max_concurrent_runs(), 1);
}

#[test]
fn lease_times_out_when_no_session_frees_up() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let pool = pool_with(&factory, 1);

    let _held = pool.lease(None).expect("first lease");
    match pool.lease(Some(Duration::from_millis(50))) {
        Err(EngineError::Timeout(_)) => {}
        other => panic!("Expected Timeout, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn zero_duration_timeout_fails_immediately_when_busy() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let pool = pool_with(&factory, 1);

    let _held = pool.lease(None).expect("first lease");
    assert!(matches!(
        pool.lease(Some(Duration::ZERO)),
        Err(EngineError::Timeout(_))
    ));
}

#[test]
fn timed_out_waiter_does_not_block_the_queue() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let pool = pool_with(&factory, 1);

    let holder = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let lease = pool.lease(None).expect("holder lease");
            thread::sleep(Duration::from_millis(150));
            drop(lease);
        })
    };
    thread::sleep(Duration::from_millis(20));

    // This waiter gives up while the holder still has the session
    assert!(matches!(
        pool.lease(Some(Duration::from_millis(40))),
        Err(EngineError::Timeout(_))
    ));

    // A patient waiter behind the abandoned ticket is still served
    let mut lease = pool.lease(None).expect("patient lease");
    lease.run(&single_batch(&[1])).expect("run");
    holder.join().unwrap();
}

#[test]
fn failed_session_is_replaced_on_return() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let pool = pool_with(&factory, 2);
    factory.fail_next_runs(1);

    {
        let mut lease = pool.lease(None).expect("lease");
        assert!(matches!(
            lease.run(&single_batch(&[1, 2])),
            Err(EngineError::EngineFailure(_))
        ));
    }

    // The retired session was rebuilt, capacity is intact
    assert_eq!(pool.live(), 2);
    assert_eq!(factory.created_count(), 3);

    let mut lease = pool.lease(None).expect("lease after reload");
    lease.run(&single_batch(&[1, 2])).expect("healthy run");
}

#[test]
fn pool_shrinks_when_reload_fails() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let pool = pool_with(&factory, 1);
    factory.fail_next_runs(1);
    factory.refuse_reloads();

    {
        let mut lease = pool.lease(None).expect("lease");
        let _ = lease.run(&single_batch(&[1]));
    }

    assert_eq!(pool.live(), 0);
    assert!(matches!(pool.lease(None), Err(EngineError::PoolExhausted)));
}

#[test]
fn shrunken_pool_keeps_serving_with_what_is_left() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let pool = pool_with(&factory, 2);
    factory.fail_next_runs(1);
    factory.refuse_reloads();

    {
        let mut lease = pool.lease(None).expect("lease");
        let _ = lease.run(&single_batch(&[1]));
    }
    assert_eq!(pool.live(), 1);

    // One concurrent lease left: holding it makes the next one time out
    let mut survivor = pool.lease(None).expect("surviving lease");
    assert!(matches!(
        pool.lease(Some(Duration::from_millis(30))),
        Err(EngineError::Timeout(_))
    ));
    survivor.run(&single_batch(&[1, 2])).expect("run");
}

#[test]
fn shape_error_does_not_retire_the_session() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let pool = pool_with(&factory, 1);

    {
        let mut lease = pool.lease(None).expect("lease");
        // 20 tokens against a 16-token window
        let ids: Vec<u32> = (0..20).collect();
        let oversized = Batch::assemble(&[(0, seq(&ids))], 0, 32).expect("batch");
        assert!(matches!(
            lease.run(&oversized),
            Err(EngineError::ShapeMismatch { .. })
        ));
    }

    assert_eq!(pool.live(), 1);
    assert_eq!(factory.created_count(), 1);
}

#[test]
fn shutdown_rejects_new_and_queued_leases() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let pool = pool_with(&factory, 1);

    let holder = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            let lease = pool.lease(None).expect("holder lease");
            thread::sleep(Duration::from_millis(120));
            drop(lease);
        })
    };
    thread::sleep(Duration::from_millis(20));

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.lease(None).map(|_| ()))
    };
    thread::sleep(Duration::from_millis(20));

    // Blocks until the holder's lease comes back
    pool.shutdown();

    assert!(matches!(
        waiter.join().unwrap(),
        Err(EngineError::PoolClosed)
    ));
    assert!(matches!(pool.lease(None), Err(EngineError::PoolClosed)));
    holder.join().unwrap();
}

#[test]
fn shutdown_is_idempotent() {
    let factory = Arc::new(MockSessionFactory::new(descriptor()));
    let pool = pool_with(&factory, 2);
    pool.shutdown();
    pool.shutdown();
    assert!(matches!(pool.lease(None), Err(EngineError::PoolClosed)));
}

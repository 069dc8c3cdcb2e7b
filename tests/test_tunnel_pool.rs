//! Integration tests for the tunnel pool and cleanup scheduler.
//!
//! Runs the pool against an in-memory provider on a multi-threaded runtime
//! and checks the capacity, linearization, and no-orphan guarantees.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use fleetguard::ledger::{AuditEventType, AuditFilter};
use fleetguard::tunnel::{CleanupScheduler, PoolError, TunnelConnectionPool};
use fleetguard::types::PoolConfig;

use common::{temp_audit, FakeProvider, TrustLoopback};

fn pool(provider: Arc<FakeProvider>, config: PoolConfig) -> TunnelConnectionPool {
    TunnelConnectionPool::builder(provider, config)
        .verifier(Arc::new(TrustLoopback))
        .build()
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lru_eviction_then_cache_miss_recreates() {
    let provider = FakeProvider::new(Duration::from_millis(5));
    let pool = pool(
        provider.clone(),
        PoolConfig {
            max_tunnels: 2,
            ..PoolConfig::default()
        },
    );

    let a = pool.acquire("bastion", "A", 22, deadline()).await.expect("acquire A");
    let b = pool.acquire("bastion", "B", 22, deadline()).await.expect("acquire B");
    pool.release(&a).expect("release A");

    let c = pool.acquire("bastion", "C", 22, deadline()).await.expect("acquire C");
    assert_eq!(pool.len(), 2);
    let keys: Vec<String> = pool.snapshot().iter().map(|i| i.handle.key.target_id.clone()).collect();
    assert!(keys.contains(&"B".to_string()) && keys.contains(&"C".to_string()));

    pool.release(&b).expect("release B");
    pool.release(&c).expect("release C");
    tokio::time::sleep(Duration::from_millis(5)).await;

    let a2 = pool.acquire("bastion", "A", 22, deadline()).await.expect("reacquire A");
    assert_ne!(a2.id, a.id);
    assert!(a2.created_at > a.created_at);
    assert_eq!(provider.created(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_key_burst_creates_one_tunnel() {
    let provider = FakeProvider::new(Duration::from_millis(100));
    let pool = pool(provider.clone(), PoolConfig::default());

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            pool.acquire("bastion", "vm-1", 5432, deadline()).await
        }));
    }
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.expect("task").expect("acquire"));
    }

    assert_eq!(provider.created(), 1);
    assert!(handles.iter().all(|h| h.id == handles[0].id));
    assert!(handles.iter().all(|h| h.local_addr.ip().is_loopback()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_burst_never_exceeds_capacity() {
    let provider = FakeProvider::new(Duration::from_millis(10));
    let pool = pool(
        provider.clone(),
        PoolConfig {
            max_tunnels: 4,
            ..PoolConfig::default()
        },
    );

    let mut tasks = Vec::new();
    for i in 0..64 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let target = format!("vm-{}", i % 8);
            match pool.acquire("bastion", &target, 22, deadline()).await {
                Ok(handle) => {
                    assert!(pool.len() <= 4);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    pool.release(&handle).map(|_| true)
                }
                Err(PoolError::ResourceExhausted { limit }) => {
                    assert_eq!(limit, 4);
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        }));
    }
    for task in tasks {
        task.await.expect("task").expect("no unexpected pool error");
        assert!(pool.len() <= 4);
    }

    pool.close_all().await.expect("close all");
    assert!(pool.is_empty());
    assert_eq!(provider.created(), provider.closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_all_races_in_flight_acquires() {
    let provider = FakeProvider::new(Duration::from_millis(80));
    let pool = pool(provider.clone(), PoolConfig::default());

    let mut tasks = Vec::new();
    for i in 0..6 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            pool.acquire("bastion", &format!("vm-{i}"), 22, deadline()).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    pool.close_all().await.expect("close all");

    assert!(pool.is_empty());
    assert_eq!(provider.created(), provider.closed());
    for task in tasks {
        let result = task.await.expect("task");
        assert!(matches!(result, Err(PoolError::Cancelled)), "got {result:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_reclaims_idle_tunnels_and_audits_them() {
    let (_dir, audit) = temp_audit();
    let provider = FakeProvider::new(Duration::ZERO);
    let pool = TunnelConnectionPool::builder(
        provider.clone(),
        PoolConfig {
            idle_timeout_secs: 1,
            ..PoolConfig::default()
        },
    )
    .verifier(Arc::new(TrustLoopback))
    .audit(Arc::clone(&audit))
    .build();

    let idle = pool.acquire("bastion", "idle", 22, deadline()).await.expect("acquire");
    let busy = pool.acquire("bastion", "busy", 22, deadline()).await.expect("acquire");
    pool.release(&idle).expect("release");

    let mut scheduler =
        CleanupScheduler::start_with(pool.clone(), Duration::from_millis(250), Duration::from_secs(2));
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert!(scheduler.stop().await);

    assert_eq!(pool.len(), 1);
    assert_eq!(pool.snapshot()[0].handle.id, busy.id);
    assert_eq!(provider.closed(), 1);

    let expired = audit
        .query(&AuditFilter {
            event_type: Some(AuditEventType::TunnelExpired),
            ..Default::default()
        })
        .expect("query");
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].resource, "bastion/idle:22");
}

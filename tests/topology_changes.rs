//! Write path under topology changes
//!
//! Key K is owned by [A (primary), B, C]; D originates. Links are cut to
//! hold acknowledgments back while views change underneath a write.

mod common;

use std::sync::{Arc, Weak};
use std::time::Duration;

use aerocache::command::{BackupAck, BatchEntry, CommandInvocationId, Message};
use aerocache::transport::{DeliveryOrder, MessageHandler, Transport};

use common::{cluster, key_abc, received, settle, A, B, C, D};

// =============================================================================
// BACKUP DEPARTURE
// =============================================================================

/// Test: the write does not resolve while a live backup's ack is
/// outstanding, and resolves once that backup leaves the view.
#[tokio::test]
async fn test_departed_backup_is_waived() {
    let cluster = Arc::new(cluster());
    let key = key_abc(&cluster);
    cluster
        .network()
        .cut_link(&cluster.address(A), &cluster.address(C));

    let cache = cluster.cache(D);
    let write = tokio::spawn({
        let key = key.clone();
        async move { cache.put(key, b"v1".to_vec()).await }
    });

    settle().await;
    assert!(!write.is_finished());
    assert_eq!(cluster.node(B).get(&key), Some(b"v1".to_vec()));
    assert_eq!(received(&cluster, D, "backup_ack"), 1);

    let view = cluster.remove_member(C);
    assert_eq!(view.id(), 2);

    let previous = tokio::time::timeout(Duration::from_secs(1), write)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(previous, None);

    let metrics = cluster.node(D).metrics_snapshot();
    assert_eq!(metrics.backups_waived, 1);
    assert_eq!(metrics.retries, 0);
    assert!(cluster.node(D).collectors().is_empty());
}

/// Test: an ack stamped with another topology id changes nothing.
#[tokio::test]
async fn test_stale_ack_is_dropped() {
    let cluster = Arc::new(cluster());
    let key = key_abc(&cluster);
    cluster
        .network()
        .cut_link(&cluster.address(C), &cluster.address(D));

    let cache = cluster.cache(D);
    let write = tokio::spawn({
        let key = key.clone();
        async move { cache.put(key, b"v".to_vec()).await }
    });
    settle().await;

    // C's real ack is lost; forge one from C with a wrong topology id
    let id = CommandInvocationId::new(cluster.address(D), 1);
    let c_node = Arc::clone(cluster.node(C));
    let handler: Weak<dyn MessageHandler> = Arc::downgrade(&c_node) as Weak<dyn MessageHandler>;
    cluster
        .network()
        .restore_link(&cluster.address(C), &cluster.address(D));
    let c_transport = cluster.network().join(cluster.address(C), handler);
    c_transport
        .send_to(
            &cluster.address(D),
            Message::BackupAck(BackupAck {
                id,
                topology_id: 7,
                segments: None,
            }),
            DeliveryOrder::Unordered,
        )
        .unwrap();
    settle().await;

    assert!(!write.is_finished());
    assert_eq!(cluster.node(D).metrics().stale_acks_dropped(), 1);
    assert_eq!(cluster.node(D).collectors().len(), 1);

    cluster.remove_member(C);
    let previous = tokio::time::timeout(Duration::from_secs(1), write)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(previous, None);
}

// =============================================================================
// PRIMARY DEPARTURE AND RETRY
// =============================================================================

/// Test: losing the primary fails the attempt with the retry signal and
/// the write is re-dispatched to the new primary.
#[tokio::test]
async fn test_departed_primary_triggers_retry() {
    let cluster = Arc::new(cluster());
    let key = key_abc(&cluster);
    cluster
        .network()
        .cut_link(&cluster.address(D), &cluster.address(A));

    let cache = cluster.cache(D);
    let write = tokio::spawn({
        let key = key.clone();
        async move { cache.put(key, b"v".to_vec()).await }
    });
    settle().await;
    assert!(!write.is_finished());

    cluster.remove_member(A);
    let previous = tokio::time::timeout(Duration::from_secs(1), write)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    settle().await;

    assert_eq!(previous, None);
    assert_eq!(cluster.owner_indices(&key), vec![B, C]);
    assert_eq!(cluster.owner_values(&key), vec![Some(b"v".to_vec()); 2]);

    let metrics = cluster.node(D).metrics_snapshot();
    assert_eq!(metrics.primaries_departed, 1);
    assert_eq!(metrics.retries, 1);
    assert_eq!(metrics.writes_dispatched, 2);
    assert_eq!(received(&cluster, B, "dispatch"), 1);
}

/// Test: a putIfAbsent that already applied before its primary left
/// succeeds on retry instead of reporting the value it wrote itself.
#[tokio::test]
async fn test_retried_put_if_absent_finds_its_own_write() {
    let cluster = Arc::new(cluster());
    let key = key_abc(&cluster);
    // A applies and forwards, but its ack never reaches D
    cluster
        .network()
        .cut_link(&cluster.address(A), &cluster.address(D));

    let cache = cluster.cache(D);
    let write = tokio::spawn({
        let key = key.clone();
        async move { cache.put_if_absent(key, b"mine".to_vec()).await }
    });
    settle().await;
    assert!(!write.is_finished());
    assert_eq!(cluster.node(B).get(&key), Some(b"mine".to_vec()));

    cluster.remove_member(A);
    let previous = tokio::time::timeout(Duration::from_secs(1), write)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    settle().await;

    assert_eq!(previous, None);
    assert_eq!(cluster.owner_values(&key), vec![Some(b"mine".to_vec()); 2]);
    assert_eq!(cluster.node(D).metrics().retries(), 1);
}

/// Test: a crashed primary is a retry signal straight from the send.
#[tokio::test]
async fn test_crashed_primary_retries_after_new_view() {
    let cluster = Arc::new(cluster());
    let key = key_abc(&cluster);
    cluster.crash_silently(A);

    let cache = cluster.cache(D);
    let write = tokio::spawn({
        let key = key.clone();
        async move { cache.remove(key).await }
    });
    settle().await;
    assert!(!write.is_finished());

    cluster.remove_member(A);
    let previous = tokio::time::timeout(Duration::from_secs(1), write)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(previous, None);
    assert_eq!(cluster.node(D).metrics().retries(), 1);
}

/// Test: with no new view the retry gives up after the remote timeout.
#[tokio::test]
async fn test_retry_without_new_view_times_out() {
    let cluster = common::cluster_with(
        common::config().with_remote_timeout(Duration::from_millis(200)),
    );
    let key = key_abc(&cluster);
    cluster.crash_silently(A);

    let err = cluster
        .cache(D)
        .put(key, b"v".to_vec())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "TOPOLOGY_TIMEOUT");
    assert_eq!(cluster.node(D).metrics().writes_failed(), 1);
}

// =============================================================================
// BATCHES
// =============================================================================

/// Test: a putAll whose backup leaves mid-flight completes without it.
#[tokio::test]
async fn test_put_all_waives_departed_backup() {
    let cluster = Arc::new(cluster());
    let key = key_abc(&cluster);
    cluster
        .network()
        .cut_link(&cluster.address(A), &cluster.address(C));

    let cache = cluster.cache(D);
    let write = tokio::spawn({
        let key = key.clone();
        async move { cache.put_all(vec![BatchEntry::new(key, b"v".to_vec())]).await }
    });

    settle().await;
    assert!(!write.is_finished());
    assert_eq!(cluster.node(B).get(&key), Some(b"v".to_vec()));
    assert_eq!(cluster.node(C).get(&key), None);

    cluster.remove_member(C);
    let previous = tokio::time::timeout(Duration::from_secs(1), write)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(previous.is_empty());
    let metrics = cluster.node(D).metrics_snapshot();
    assert_eq!(metrics.backups_waived, 1);
    assert_eq!(metrics.retries, 0);
    assert!(cluster.node(D).collectors().is_empty());
}

/// Test: a putAll whose primary leaves is split again under the new view
/// and sent to the new primary.
#[tokio::test]
async fn test_put_all_retries_after_primary_departs() {
    let cluster = Arc::new(cluster());
    let key = key_abc(&cluster);
    // A applies and forwards, but its ack never reaches D
    cluster
        .network()
        .cut_link(&cluster.address(A), &cluster.address(D));

    let cache = cluster.cache(D);
    let write = tokio::spawn({
        let key = key.clone();
        async move { cache.put_all(vec![BatchEntry::new(key, b"v".to_vec())]).await }
    });
    settle().await;
    assert!(!write.is_finished());

    cluster.remove_member(A);
    let previous = tokio::time::timeout(Duration::from_secs(1), write)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    settle().await;

    // The retry finds the first attempt's value already in place
    assert_eq!(previous.get(&key), Some(&b"v".to_vec()));
    assert_eq!(cluster.owner_indices(&key), vec![B, C]);
    assert_eq!(cluster.owner_values(&key), vec![Some(b"v".to_vec()); 2]);

    let metrics = cluster.node(D).metrics_snapshot();
    assert_eq!(metrics.primaries_departed, 1);
    assert_eq!(metrics.retries, 1);
    assert_eq!(received(&cluster, B, "dispatch"), 1);
}

// =============================================================================
// DIVERGING VIEWS
// =============================================================================

/// Test: a primary behind the command's topology waits for it before
/// executing.
#[tokio::test]
async fn test_lagging_primary_waits() {
    let cluster = Arc::new(cluster());
    let key = key_abc(&cluster);
    let next = cluster.topology().bumped();
    assert!(cluster.install_on(D, next.clone()));

    let cache = cluster.cache(D);
    let write = tokio::spawn({
        let key = key.clone();
        async move { cache.put(key, b"v".to_vec()).await }
    });
    settle().await;
    assert!(!write.is_finished());
    assert_eq!(cluster.node(A).get(&key), None);

    cluster.install(next);
    let previous = tokio::time::timeout(Duration::from_secs(1), write)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    settle().await;

    assert_eq!(previous, None);
    assert_eq!(cluster.owner_values(&key), vec![Some(b"v".to_vec()); 3]);
    assert_eq!(cluster.node(D).metrics().retries(), 0);
}

/// Test: a backup ahead of the command's topology answers "unsure" and
/// the write is retried under the newer view.
#[tokio::test]
async fn test_backup_ahead_replies_unsure() {
    let cluster = Arc::new(cluster());
    let key = key_abc(&cluster);
    let next = cluster.topology().bumped();
    assert!(cluster.install_on(C, next.clone()));

    let cache = cluster.cache(D);
    let write = tokio::spawn({
        let key = key.clone();
        async move { cache.put(key, b"v".to_vec()).await }
    });
    settle().await;
    assert!(!write.is_finished());
    assert_eq!(cluster.node(D).metrics().unsure_replies(), 1);

    cluster.install(next);
    let previous = tokio::time::timeout(Duration::from_secs(1), write)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    settle().await;

    assert_eq!(previous, Some(b"v".to_vec()));
    assert_eq!(cluster.owner_values(&key), vec![Some(b"v".to_vec()); 3]);
    assert_eq!(cluster.node(D).metrics().retries(), 1);
}

// =============================================================================
// CRASH UNDER LOAD
// =============================================================================

/// Test: a member crashing during a workload leaves every key's
/// remaining owners in agreement.
#[tokio::test]
async fn test_crash_under_load_stays_consistent() {
    let options = aerocache::simulation::SimulationOptions {
        nodes: 5,
        owners: 3,
        writes: 200,
        crash_node: Some(2),
        seed: 42,
        config: common::config(),
    };

    let report = aerocache::simulation::run_simulation(&options).await.unwrap();

    assert!(report.consistent);
    assert_eq!(report.writes, 200);
    assert_eq!(report.topology_id, 2);
}

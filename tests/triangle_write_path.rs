//! End-to-end write path tests
//!
//! A four-node cluster on the in-process network, every message encoded.
//! Key K is owned by [A (primary), B, C]; D originates.

mod common;

use std::time::Duration;

use aerocache::command::{BatchEntry, Durability, Metadata};
use aerocache::ReplicationConfig;

use common::{cluster, cluster_with, config, key_abc, received, settle, A, B, C, D};

// =============================================================================
// SINGLE-KEY WRITES
// =============================================================================

/// Test: put from a non-owner goes D → A → {B, C}, acks go straight to D.
#[tokio::test]
async fn test_put_through_remote_primary() {
    let cluster = cluster();
    let key = key_abc(&cluster);

    let previous = cluster
        .cache(D)
        .put(key.clone(), b"v1".to_vec())
        .await
        .unwrap();
    settle().await;

    assert_eq!(previous, None);
    for owner in [A, B, C] {
        assert_eq!(cluster.node(owner).get(&key), Some(b"v1".to_vec()));
    }
    assert_eq!(cluster.node(D).get(&key), None);

    assert_eq!(received(&cluster, A, "dispatch"), 1);
    assert_eq!(received(&cluster, B, "backup"), 1);
    assert_eq!(received(&cluster, C, "backup"), 1);
    assert_eq!(received(&cluster, D, "primary_ack"), 1);
    assert_eq!(received(&cluster, D, "backup_ack"), 2);
    // Backups never talk back to the primary
    assert_eq!(received(&cluster, A, "backup_ack"), 0);

    assert!(cluster.node(D).collectors().is_empty());
    assert_eq!(cluster.node(D).metrics().remote_primary_executions(), 1);
}

/// Test: a put originated on the primary sends no dispatch and no
/// primary ack over the network.
#[tokio::test]
async fn test_put_on_primary_stays_local() {
    let cluster = cluster();
    let key = key_abc(&cluster);

    cluster.cache(A).put(key.clone(), b"v".to_vec()).await.unwrap();
    settle().await;

    assert_eq!(received(&cluster, A, "dispatch"), 0);
    assert_eq!(received(&cluster, A, "primary_ack"), 0);
    assert_eq!(received(&cluster, A, "backup_ack"), 2);
    assert_eq!(cluster.node(C).get(&key), Some(b"v".to_vec()));
    assert_eq!(cluster.node(A).metrics().local_primary_executions(), 1);
}

/// Test: putIfAbsent on a present key resolves to the present value and
/// sends nothing to the backups.
#[tokio::test]
async fn test_failed_condition_contacts_no_backup() {
    let cluster = cluster();
    let key = key_abc(&cluster);
    let cache = cluster.cache(D);
    cache.put(key.clone(), b"v1".to_vec()).await.unwrap();
    settle().await;

    let present = cache
        .put_if_absent(key.clone(), b"v2".to_vec())
        .await
        .unwrap();
    settle().await;

    assert_eq!(present, Some(b"v1".to_vec()));
    assert_eq!(received(&cluster, B, "backup"), 1);
    assert_eq!(received(&cluster, C, "backup"), 1);
    assert_eq!(cluster.node(B).get(&key), Some(b"v1".to_vec()));
    assert_eq!(cluster.node(A).metrics().conditional_mismatches(), 1);
    assert!(cluster.node(D).collectors().is_empty());
}

/// Test: conditional replace and remove replicate the primary's decision.
#[tokio::test]
async fn test_conditional_writes_replicate() {
    let cluster = cluster();
    let key = key_abc(&cluster);
    let cache = cluster.cache(D);

    cache.put(key.clone(), b"1".to_vec()).await.unwrap();
    assert!(cache
        .replace_if(key.clone(), b"1".to_vec(), b"2".to_vec())
        .await
        .unwrap());
    assert!(!cache
        .replace_if(key.clone(), b"1".to_vec(), b"3".to_vec())
        .await
        .unwrap());
    settle().await;
    assert_eq!(cluster.owner_values(&key), vec![Some(b"2".to_vec()); 3]);

    assert!(cache.remove_if(key.clone(), b"2".to_vec()).await.unwrap());
    settle().await;
    assert_eq!(cluster.owner_values(&key), vec![None; 3]);

    assert_eq!(cache.replace(key.clone(), b"4".to_vec()).await.unwrap(), None);
    assert_eq!(cache.remove(key.clone()).await.unwrap(), None);
}

/// Test: metadata travels with the value to every owner.
#[tokio::test]
async fn test_metadata_reaches_backups() {
    let cluster = cluster();
    let key = key_abc(&cluster);

    cluster
        .cache(D)
        .put_with_metadata(key.clone(), b"v".to_vec(), Metadata::with_lifespan(60_000))
        .await
        .unwrap();
    settle().await;

    let entry = cluster.node(C).store().entry(&key).unwrap();
    assert_eq!(entry.metadata.lifespan_ms, Some(60_000));
}

/// Test: concurrent writers to one key leave every owner with the same
/// value.
#[tokio::test]
async fn test_concurrent_writers_converge() {
    let cluster = cluster();
    let key = key_abc(&cluster);

    let writes = (0..20).map(|i| {
        let cache = cluster.cache(i % 4);
        let key = key.clone();
        async move { cache.put(key, format!("v{}", i).into_bytes()).await }
    });
    for result in futures_util::future::join_all(writes).await {
        result.unwrap();
    }
    settle().await;

    assert!(cluster.is_consistent([&key]));
    assert!(cluster.node(A).get(&key).is_some());
}

// =============================================================================
// DURABILITY AND FLAGS
// =============================================================================

/// Test: async writes return at once, create no collector, and still
/// reach every owner.
#[tokio::test]
async fn test_async_writes_skip_acknowledgments() {
    let cluster = cluster_with(config().with_mode(Durability::Async));
    let key = key_abc(&cluster);

    let previous = cluster
        .cache(D)
        .put(key.clone(), b"v".to_vec())
        .await
        .unwrap();
    settle().await;

    assert_eq!(previous, None);
    assert_eq!(cluster.owner_values(&key), vec![Some(b"v".to_vec()); 3]);
    assert_eq!(received(&cluster, D, "primary_ack"), 0);
    assert_eq!(received(&cluster, D, "backup_ack"), 0);
    assert!(cluster.node(D).collectors().is_empty());
}

/// Test: a sync handle on an async-configured node still waits.
#[tokio::test]
async fn test_durability_override() {
    let cluster = cluster_with(config().with_mode(Durability::Async));
    let key = key_abc(&cluster);
    let cache = cluster.cache(D).with_durability(Durability::Sync);

    cache.put(key.clone(), b"1".to_vec()).await.unwrap();
    let previous = cache.put(key.clone(), b"2".to_vec()).await.unwrap();

    assert_eq!(previous, Some(b"1".to_vec()));
    assert_eq!(received(&cluster, D, "backup_ack"), 4);
}

/// Test: putForExternalRead never overwrites and never surfaces errors.
#[tokio::test]
async fn test_put_for_external_read() {
    let cluster = cluster();
    let key = key_abc(&cluster);
    let cache = cluster.cache(D);

    cache.put_for_external_read(key.clone(), b"loaded".to_vec()).await;
    settle().await;
    assert_eq!(cluster.owner_values(&key), vec![Some(b"loaded".to_vec()); 3]);
    // Fire-and-forget even on a sync cache
    assert_eq!(received(&cluster, D, "primary_ack"), 0);
    assert_eq!(received(&cluster, D, "backup_ack"), 0);

    cache.put_for_external_read(key.clone(), b"other".to_vec()).await;
    settle().await;
    assert_eq!(cluster.node(A).get(&key), Some(b"loaded".to_vec()));

    cluster.node(A).store().fail_writes_to(&key);
    cache.remove(key.clone()).await.unwrap_err();
    cache.put_for_external_read(key.clone(), b"x".to_vec()).await;
    assert_eq!(cluster.node(D).metrics().writes_failed(), 1);
}

// =============================================================================
// FAULTS
// =============================================================================

/// Test: a primary storage fault reaches the originator as a terminal
/// error and is not retried.
#[tokio::test]
async fn test_primary_fault_is_terminal() {
    let cluster = cluster();
    let key = key_abc(&cluster);
    cluster.node(A).store().fail_writes_to(&key);

    let err = cluster
        .cache(D)
        .put(key.clone(), b"v".to_vec())
        .await
        .unwrap_err();
    settle().await;

    assert_eq!(err.code(), "STORAGE");
    assert_eq!(cluster.node(D).metrics().retries(), 0);
    assert_eq!(received(&cluster, B, "backup"), 0);
}

/// Test: a backup storage fault fails the write on the originator.
#[tokio::test]
async fn test_backup_fault_fails_write() {
    let cluster = cluster();
    let key = key_abc(&cluster);
    cluster.node(C).store().fail_writes_to(&key);

    let err = cluster
        .cache(D)
        .put(key.clone(), b"v".to_vec())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "STORAGE");
    assert_eq!(cluster.node(D).metrics().writes_failed(), 1);
}

/// Test: with an ack lost for good, the write times out.
#[tokio::test]
async fn test_lost_backup_ack_times_out() {
    let cluster = cluster_with(
        ReplicationConfig::default().with_remote_timeout(Duration::from_millis(300)),
    );
    let key = key_abc(&cluster);
    cluster
        .network()
        .cut_link(&cluster.address(C), &cluster.address(D));

    let err = cluster
        .cache(D)
        .put(key.clone(), b"v".to_vec())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.code(), "ACK_TIMEOUT");
    assert_eq!(cluster.node(D).metrics().timeouts(), 1);
    assert!(cluster.node(D).collectors().is_empty());
    // The write itself took effect everywhere
    assert_eq!(cluster.node(C).get(&key), Some(b"v".to_vec()));
}

// =============================================================================
// BATCHES
// =============================================================================

/// Test: putAll splits by primary, every owner of every key receives
/// its entries, and previous values are merged.
#[tokio::test]
async fn test_put_all_across_primaries() {
    let cluster = cluster();
    let cache = cluster.cache(D);
    let keys: Vec<Vec<u8>> = (0..24).map(|i| format!("batch-{}", i).into_bytes()).collect();

    cache
        .put(keys[0].clone(), b"old".to_vec())
        .await
        .unwrap();

    let previous = cache
        .put_all(
            keys.iter()
                .map(|key| BatchEntry::new(key.clone(), b"new".to_vec()))
                .collect(),
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(previous.len(), 1);
    assert_eq!(previous.get(&keys[0]), Some(&b"old".to_vec()));
    for key in &keys {
        assert_eq!(cluster.owner_values(key), vec![Some(b"new".to_vec()); 3]);
    }
    assert!(cluster.node(D).collectors().is_empty());
}

/// Test: a batch whose backup share never acknowledges is not complete.
#[tokio::test]
async fn test_put_all_waits_for_every_segment() {
    let cluster = cluster_with(
        ReplicationConfig::default().with_remote_timeout(Duration::from_millis(300)),
    );
    let key = key_abc(&cluster);
    cluster
        .network()
        .cut_link(&cluster.address(A), &cluster.address(C));

    let err = cluster
        .cache(D)
        .put_all(vec![BatchEntry::new(key.clone(), b"v".to_vec())])
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(cluster.node(B).get(&key), Some(b"v".to_vec()));
    assert_eq!(cluster.node(C).get(&key), None);
}

//! Shared fixtures for the cluster tests
//!
//! Four members: `A` is the primary of the test key, `B` and `C` its
//! backups, `D` the originator that owns none of it.

#![allow(dead_code)]

use std::time::Duration;

use aerocache::command::Key;
use aerocache::{LocalCluster, ReplicationConfig};

pub const A: usize = 0;
pub const B: usize = 1;
pub const C: usize = 2;
pub const D: usize = 3;

/// Four nodes, three owners per segment
pub fn cluster() -> LocalCluster {
    cluster_with(config())
}

pub fn cluster_with(config: ReplicationConfig) -> LocalCluster {
    LocalCluster::start(4, 3, config).unwrap()
}

pub fn config() -> ReplicationConfig {
    ReplicationConfig::default().with_remote_timeout(Duration::from_secs(2))
}

/// A key owned by `[A, B, C]`, in that order
pub fn key_abc(cluster: &LocalCluster) -> Key {
    cluster.key_owned_by(&[A, B, C]).unwrap()
}

pub fn received(cluster: &LocalCluster, index: usize, kind: &str) -> usize {
    cluster
        .network()
        .received_count(&cluster.address(index), kind)
}

/// Let in-flight deliveries finish
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

//! In-process cluster
//!
//! [`LocalCluster`] starts N nodes on one [`LocalNetwork`], each following
//! its own [`TopologyManager`] so views can be installed on every member
//! at once or on one member at a time. [`run_simulation`] drives a seeded
//! random workload through such a cluster and checks that every key's
//! owners agree at the end.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::{join, join_all};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::cache::ReplicatedCache;
use crate::command::{Key, Value};
use crate::config::ReplicationConfig;
use crate::errors::{CacheError, CacheResult};
use crate::node::CacheNode;
use crate::observability::{log_event, Event, MetricsSnapshot};
use crate::topology::{Address, Topology, TopologyManager, TopologyProvider};
use crate::transport::LocalNetwork;

/// Segments of a cluster started with [`LocalCluster::start`]
pub const DEFAULT_SEGMENTS: u32 = 64;

const KEY_SPACE: usize = 64;
const CONCURRENCY: usize = 8;
const VIEW_DELAY: Duration = Duration::from_millis(5);
const SETTLE: Duration = Duration::from_millis(100);

struct Member {
    node: Arc<CacheNode>,
    topology: Arc<TopologyManager>,
}

/// N cache nodes on one in-process network
pub struct LocalCluster {
    network: LocalNetwork,
    members: Vec<Member>,
    view: Mutex<Topology>,
}

impl std::fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("nodes", &self.members.len())
            .field("topology_id", &self.view().id())
            .finish()
    }
}

impl LocalCluster {
    /// Start `nodes` members with `owners` owners per segment
    pub fn start(nodes: usize, owners: usize, config: ReplicationConfig) -> CacheResult<Self> {
        Self::start_with_segments(nodes, owners, DEFAULT_SEGMENTS, config)
    }

    /// Start a cluster with an explicit segment count.
    ///
    /// Members are named `node-0` .. `node-{N-1}` and share topology 1,
    /// a balanced assignment.
    pub fn start_with_segments(
        nodes: usize,
        owners: usize,
        segments: u32,
        config: ReplicationConfig,
    ) -> CacheResult<Self> {
        if nodes == 0 || owners == 0 || segments == 0 {
            return Err(CacheError::Config(
                "a cluster needs at least one node, owner and segment".to_string(),
            ));
        }

        let network = LocalNetwork::new(config.encode_messages);
        let addresses: Vec<Address> = (0..nodes)
            .map(|i| Address::named(format!("node-{}", i)))
            .collect();
        let initial = Topology::balanced(1, addresses.clone(), segments, owners);

        let mut members = Vec::with_capacity(nodes);
        for address in addresses {
            let topology = Arc::new(TopologyManager::new());
            topology.install(initial.clone());
            let node = CacheNode::start(
                address,
                config.clone(),
                &network,
                Arc::clone(&topology) as Arc<dyn TopologyProvider>,
            )?;
            members.push(Member { node, topology });
        }

        Ok(Self {
            network,
            members,
            view: Mutex::new(initial),
        })
    }

    /// Number of members, crashed ones included
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the cluster has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The shared network
    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    /// Member `index`
    ///
    /// # Panics
    /// If `index` is out of range.
    pub fn node(&self, index: usize) -> &Arc<CacheNode> {
        &self.members[index].node
    }

    /// Cache API through member `index`
    pub fn cache(&self, index: usize) -> ReplicatedCache {
        ReplicatedCache::new(Arc::clone(self.node(index)))
    }

    /// Address of member `index`
    pub fn address(&self, index: usize) -> Address {
        self.node(index).address().clone()
    }

    /// Index of the member at `address`
    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.members
            .iter()
            .position(|member| member.node.address() == address)
    }

    /// Members not crashed
    pub fn live_indices(&self) -> Vec<usize> {
        (0..self.members.len())
            .filter(|i| !self.network.is_crashed(&self.address(*i)))
            .collect()
    }

    /// Latest view installed through the cluster
    pub fn topology(&self) -> Topology {
        self.view().clone()
    }

    /// Install `topology` on every live member
    pub fn install(&self, topology: Topology) {
        let mut view = self.view();
        for index in self.live_indices() {
            self.members[index].topology.install(topology.clone());
        }
        *view = topology;
    }

    /// Install `topology` on member `index` only
    pub fn install_on(&self, index: usize, topology: Topology) -> bool {
        self.members[index].topology.install(topology)
    }

    /// Crash member `index` and install the view without it
    pub fn crash(&self, index: usize) -> Topology {
        self.crash_silently(index);
        self.remove_member(index)
    }

    /// Crash member `index` without telling anyone
    pub fn crash_silently(&self, index: usize) {
        let address = self.address(index);
        log_event(Event::SimulationCrash, &[("address", address.as_str())]);
        self.network.crash(&address);
    }

    /// Install the next view with member `index` removed
    pub fn remove_member(&self, index: usize) -> Topology {
        let next = self.view().without_member(&self.address(index));
        self.install(next.clone());
        next
    }

    /// Member indices owning `key` in the current view, primary first
    pub fn owner_indices(&self, key: &[u8]) -> Vec<usize> {
        self.view()
            .owners(key)
            .iter()
            .filter_map(|owner| self.index_of(owner))
            .collect()
    }

    /// First generated key whose owners are exactly `owners`, in order
    pub fn key_owned_by(&self, owners: &[usize]) -> Option<Key> {
        (0..100_000)
            .map(|i| format!("key-{}", i).into_bytes())
            .find(|key| self.owner_indices(key) == owners)
    }

    /// Value of `key` on every current owner, primary first
    pub fn owner_values(&self, key: &[u8]) -> Vec<Option<Value>> {
        self.owner_indices(key)
            .into_iter()
            .map(|index| self.node(index).get(key))
            .collect()
    }

    /// Whether every current owner of each key holds the same value
    pub fn is_consistent<'a, I>(&self, keys: I) -> bool
    where
        I: IntoIterator<Item = &'a Key>,
    {
        keys.into_iter().all(|key| {
            let values = self.owner_values(key);
            values.windows(2).all(|pair| pair[0] == pair[1])
        })
    }

    /// Sum of every member's counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.members
            .iter()
            .fold(MetricsSnapshot::default(), |total, member| {
                total.merged(&member.node.metrics_snapshot())
            })
    }

    fn view(&self) -> MutexGuard<'_, Topology> {
        self.view
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Parameters of a simulated workload
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Cluster size
    pub nodes: usize,
    /// Owners per segment
    pub owners: usize,
    /// Writes to issue
    pub writes: usize,
    /// Member to crash half-way through
    pub crash_node: Option<usize>,
    /// Workload seed
    pub seed: u64,
    /// Node configuration
    pub config: ReplicationConfig,
}

impl SimulationOptions {
    /// Check the options describe a runnable cluster
    pub fn validate(&self) -> CacheResult<()> {
        if self.nodes == 0 {
            return Err(CacheError::Config("--nodes must be > 0".to_string()));
        }
        if self.owners == 0 || self.owners > self.nodes {
            return Err(CacheError::Config(format!(
                "--owners must be between 1 and {}",
                self.nodes
            )));
        }
        if let Some(crash) = self.crash_node {
            if crash >= self.nodes {
                return Err(CacheError::Config(format!(
                    "--crash-node must be below {}",
                    self.nodes
                )));
            }
            if self.nodes < 2 {
                return Err(CacheError::Config(
                    "--crash-node needs at least two nodes".to_string(),
                ));
            }
        }
        self.config.validate()
    }
}

/// Outcome of a simulated workload
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Writes issued
    pub writes: usize,
    /// Writes that ended in an error
    pub failed: usize,
    /// Distinct keys written
    pub keys: usize,
    /// Member crashed during the run
    pub crashed: Option<String>,
    /// Id of the final view
    pub topology_id: u64,
    /// Whether every key's live owners agree
    pub consistent: bool,
    /// Counters summed over the cluster
    pub metrics: MetricsSnapshot,
}

#[derive(Debug)]
enum Op {
    Put(Key, Value),
    Remove(Key),
}

impl Op {
    fn key(&self) -> &Key {
        match self {
            Op::Put(key, _) | Op::Remove(key) => key,
        }
    }
}

/// Run a seeded random workload and report what happened.
///
/// Writes go out in rounds of concurrent operations from random live
/// members. With a crash scheduled, the member goes down before the round
/// at the half-way mark and the view without it is installed shortly
/// after that round starts, so writes in flight hit the retry path.
pub async fn run_simulation(options: &SimulationOptions) -> CacheResult<SimulationReport> {
    options.validate()?;
    log_event(
        Event::SimulationStart,
        &[
            ("nodes", &options.nodes.to_string()),
            ("owners", &options.owners.to_string()),
            ("seed", &options.seed.to_string()),
            ("writes", &options.writes.to_string()),
        ],
    );

    let cluster = LocalCluster::start(options.nodes, options.owners, options.config.clone())?;
    // Metrics are the report; the delivery log would only grow
    cluster.network().set_recording(false);
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut pending_crash = options.crash_node;
    let mut written = BTreeSet::new();
    let mut issued = 0;
    let mut failed = 0;

    while issued < options.writes {
        let crash_now = match pending_crash {
            Some(index) if issued >= options.writes / 2 => {
                cluster.crash_silently(index);
                pending_crash = None;
                Some(index)
            }
            _ => None,
        };

        let live = cluster.live_indices();
        let round = CONCURRENCY.min(options.writes - issued);
        let ops: Vec<(usize, Op)> = (0..round)
            .map(|_| {
                let origin = live[rng.gen_range(0..live.len())];
                let key = format!("key-{}", rng.gen_range(0..KEY_SPACE)).into_bytes();
                let op = if rng.gen_range(0..10) < 8 {
                    Op::Put(key, rng.gen::<u32>().to_string().into_bytes())
                } else {
                    Op::Remove(key)
                };
                (origin, op)
            })
            .collect();
        issued += round;

        let writes = join_all(ops.into_iter().map(|(origin, op)| {
            written.insert(op.key().clone());
            let cache = cluster.cache(origin);
            async move {
                match op {
                    Op::Put(key, value) => cache.put(key, value).await.map(|_| ()),
                    Op::Remove(key) => cache.remove(key).await.map(|_| ()),
                }
            }
        }));
        let view_change = async {
            if let Some(index) = crash_now {
                tokio::time::sleep(VIEW_DELAY).await;
                cluster.remove_member(index);
            }
        };

        let (results, ()) = join(writes, view_change).await;
        failed += results.iter().filter(|result| result.is_err()).count();
    }

    tokio::time::sleep(SETTLE).await;

    let report = SimulationReport {
        writes: issued,
        failed,
        keys: written.len(),
        crashed: options
            .crash_node
            .map(|index| cluster.address(index).as_str().to_string()),
        topology_id: cluster.topology().id(),
        consistent: cluster.is_consistent(&written),
        metrics: cluster.metrics(),
    };
    log_event(
        Event::SimulationComplete,
        &[
            ("consistent", if report.consistent { "true" } else { "false" }),
            ("failed", &report.failed.to_string()),
            ("writes", &report.writes.to_string()),
        ],
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(nodes: usize, owners: usize, writes: usize) -> SimulationOptions {
        SimulationOptions {
            nodes,
            owners,
            writes,
            crash_node: None,
            seed: 7,
            config: ReplicationConfig::default().with_remote_timeout(Duration::from_secs(2)),
        }
    }

    #[test]
    fn test_rejects_invalid_options() {
        assert!(options(0, 1, 10).validate().is_err());
        assert!(options(3, 4, 10).validate().is_err());

        let mut crash_missing = options(3, 2, 10);
        crash_missing.crash_node = Some(3);
        assert!(crash_missing.validate().is_err());

        let mut crash_alone = options(1, 1, 10);
        crash_alone.crash_node = Some(0);
        assert!(crash_alone.validate().is_err());
    }

    #[tokio::test]
    async fn test_cluster_layout() {
        let cluster = LocalCluster::start(4, 3, ReplicationConfig::default()).unwrap();
        assert_eq!(cluster.len(), 4);
        assert_eq!(cluster.topology().id(), 1);

        let key = cluster.key_owned_by(&[2, 3, 0]).unwrap();
        assert_eq!(cluster.owner_indices(&key), vec![2, 3, 0]);

        let view = cluster.crash(3);
        assert_eq!(view.id(), 2);
        assert_eq!(cluster.live_indices(), vec![0, 1, 2]);
        assert_eq!(cluster.owner_indices(&key), vec![2, 0]);
        assert_eq!(cluster.node(0).topology().current_topology().id(), 2);
    }

    #[tokio::test]
    async fn test_simulation_is_consistent() {
        let report = run_simulation(&options(4, 3, 64)).await.unwrap();
        assert_eq!(report.writes, 64);
        assert_eq!(report.failed, 0);
        assert!(report.consistent);
        assert_eq!(report.metrics.writes_completed, 64);
    }

    #[tokio::test]
    async fn test_simulation_survives_crash() {
        let mut crashing = options(4, 3, 64);
        crashing.crash_node = Some(1);
        let report = run_simulation(&crashing).await.unwrap();

        assert_eq!(report.crashed.as_deref(), Some("node-1"));
        assert_eq!(report.topology_id, 2);
        assert!(report.consistent);
    }
}

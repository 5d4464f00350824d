//! Cluster controller state: block locations, liveness and the
//! replication queue
//!
//! A chunkserver is known by its structural endpoint and carries a
//! touched-recently flag. Heartbeats, block reports and received-block
//! notifications set the flag; the periodic status sweep clears it and
//! evicts servers whose flag was already clear. Eviction pushes every
//! block the dead server held into the replication queue.
//!
//! Location lists of evicted servers are not scrubbed eagerly; a later
//! report from a live holder refreshes them and replication repair
//! closes the gap in the meantime.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{DfsError, Result};
use crate::proto::messages::{Block, BlockTask, Endpoint, LocatedBlock};
use crate::proto::op;

#[derive(Debug)]
pub struct ClusterState {
	/// target replica count; bounds every queue deficit
	replication: usize,
	/// block ID -> chunkservers that have reported holding it
	locations: HashMap<u64, Vec<Endpoint>>,
	/// known chunkservers; the value is the touched-recently flag
	alive: HashMap<Endpoint, bool>,
	/// block ID -> number of additional replicas required
	pending: HashMap<u64, usize>,
	/// placement shuffle source; seedable for reproducible tests
	rng: StdRng,
}

impl ClusterState {
	pub fn new(replication: usize) -> Self {
		Self::with_rng(replication, StdRng::from_os_rng())
	}

	/// Deterministic placement, used by the test suite.
	pub fn with_rng_seed(replication: usize, seed: u64) -> Self {
		Self::with_rng(replication, StdRng::seed_from_u64(seed))
	}

	fn with_rng(replication: usize, rng: StdRng) -> Self {
		ClusterState {
			replication,
			locations: HashMap::new(),
			alive: HashMap::new(),
			pending: HashMap::new(),
			rng,
		}
	}

	/// Forget everything (master boot and format).
	pub fn clear(&mut self) {
		self.locations.clear();
		self.alive.clear();
		self.pending.clear();
	}

	// === Liveness ===

	/// Mark an endpoint as recently heard from, registering it if new.
	pub fn touch(&mut self, endpoint: &Endpoint) {
		self.alive.insert(endpoint.clone(), true);
	}

	pub fn is_alive(&self, endpoint: &Endpoint) -> bool {
		self.alive.contains_key(endpoint)
	}

	pub fn alive_count(&self) -> usize {
		self.alive.len()
	}

	/// One status-checker tick: clear fresh flags, evict cold servers,
	/// queue their blocks for re-replication. Returns the evicted set.
	pub fn sweep_dead(&mut self) -> Vec<Endpoint> {
		let mut dead = Vec::new();
		self.alive.retain(|endpoint, fresh| {
			if *fresh {
				*fresh = false;
				true
			} else {
				dead.push(endpoint.clone());
				false
			}
		});
		for endpoint in &dead {
			let hosted: Vec<u64> = self
				.locations
				.iter()
				.filter(|(_, holders)| holders.contains(endpoint))
				.map(|(&block_id, _)| block_id)
				.collect();
			for block_id in hosted {
				*self.pending.entry(block_id).or_insert(0) += 1;
			}
		}
		dead
	}

	// === Locations ===

	/// Record that `endpoint` holds `block_id`. A genuinely new location
	/// pays down the block's replication deficit: the queued value is
	/// clamped to `replication - |holders|`, which leaves it alone when
	/// the reporter was already counted into the ack at `complete` and
	/// removes the entry once enough holders are known.
	pub fn record_location(&mut self, block_id: u64, endpoint: &Endpoint) {
		let holders = self.locations.entry(block_id).or_default();
		if holders.contains(endpoint) {
			return;
		}
		holders.push(endpoint.clone());
		let known = holders.len();
		if let Some(deficit) = self.pending.get_mut(&block_id) {
			*deficit = (*deficit).min(self.replication.saturating_sub(known));
			if *deficit == 0 {
				self.pending.remove(&block_id);
			}
		}
	}

	pub fn locations(&self, block_id: u64) -> &[Endpoint] {
		self.locations.get(&block_id).map(Vec::as_slice).unwrap_or(&[])
	}

	/// True once every listed block has at least one holder that is
	/// currently alive. This is the safe-mode exit condition.
	pub fn all_blocks_located(&self, block_ids: &[u64]) -> bool {
		block_ids.iter().all(|block_id| {
			self.locations
				.get(block_id)
				.is_some_and(|holders| holders.iter().any(|ep| self.alive.contains_key(ep)))
		})
	}

	// === Replication queue ===

	/// Require `deficit` more replicas of `block_id`.
	pub fn enqueue_replication(&mut self, block_id: u64, deficit: usize) {
		if deficit > 0 {
			self.pending.insert(block_id, deficit);
		}
	}

	pub fn pending_deficit(&self, block_id: u64) -> Option<usize> {
		self.pending.get(&block_id).copied()
	}

	/// Hand out COPY tasks the calling chunkserver can source: queue
	/// entries whose holders include the caller. Each dispatched entry
	/// leaves the queue (best-effort; a still-missing replica re-enters
	/// at the next sweep). Entries for blocks with no descriptor are
	/// dropped - the owning file has been removed.
	pub fn take_tasks<F>(&mut self, caller: &Endpoint, descriptor: F) -> Vec<BlockTask>
	where
		F: Fn(u64) -> Option<Block>,
	{
		let queued: Vec<u64> = self.pending.keys().copied().collect();
		let mut tasks = Vec::new();
		for block_id in queued {
			let holders = match self.locations.get(&block_id) {
				Some(holders) if holders.contains(caller) => holders.clone(),
				_ => continue,
			};
			let Some(block) = descriptor(block_id) else {
				self.pending.remove(&block_id);
				continue;
			};
			let deficit = self.pending[&block_id];
			let destinations: Vec<Endpoint> = self
				.alive
				.iter()
				.filter(|(endpoint, &fresh)| fresh && !holders.contains(endpoint))
				.map(|(endpoint, _)| endpoint.clone())
				.take(deficit)
				.collect();
			if destinations.is_empty() {
				continue;
			}
			self.pending.remove(&block_id);
			tasks.push(BlockTask {
				op: op::COPY,
				located: LocatedBlock { block, endpoints: destinations },
			});
		}
		tasks
	}

	// === Placement ===

	/// Pick `n` distinct chunkservers by uniform shuffle of the alive set.
	pub fn allocate(&mut self, n: usize) -> Result<Vec<Endpoint>> {
		if self.alive.len() < n {
			return Err(DfsError::Exhausted { needed: n, alive: self.alive.len() });
		}
		let mut pool: Vec<Endpoint> = self.alive.keys().cloned().collect();
		pool.sort_by(|a, b| (&a.ip, a.port).cmp(&(&b.ip, b.port)));
		pool.shuffle(&mut self.rng);
		pool.truncate(n);
		Ok(pool)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ep(port: u16) -> Endpoint {
		Endpoint::new("127.0.0.1", port)
	}

	#[test]
	fn sweep_needs_two_ticks_to_evict() {
		let mut cluster = ClusterState::with_rng_seed(2, 1);
		cluster.touch(&ep(7000));

		// first tick clears the flag, second evicts
		assert!(cluster.sweep_dead().is_empty());
		assert!(cluster.is_alive(&ep(7000)));
		assert_eq!(cluster.sweep_dead(), vec![ep(7000)]);
		assert!(!cluster.is_alive(&ep(7000)));
	}

	#[test]
	fn heartbeat_between_ticks_keeps_the_server_alive() {
		let mut cluster = ClusterState::with_rng_seed(2, 1);
		cluster.touch(&ep(7000));
		assert!(cluster.sweep_dead().is_empty());
		cluster.touch(&ep(7000));
		assert!(cluster.sweep_dead().is_empty());
		assert!(cluster.is_alive(&ep(7000)));
	}

	#[test]
	fn eviction_queues_every_hosted_block() {
		let mut cluster = ClusterState::with_rng_seed(2, 1);
		cluster.touch(&ep(7000));
		cluster.touch(&ep(7001));
		cluster.record_location(1, &ep(7000));
		cluster.record_location(2, &ep(7000));
		cluster.record_location(2, &ep(7001));

		cluster.sweep_dead();
		cluster.touch(&ep(7001)); // survivor heartbeats, 7000 stays silent
		cluster.sweep_dead();

		assert_eq!(cluster.pending_deficit(1), Some(1));
		assert_eq!(cluster.pending_deficit(2), Some(1));
	}

	#[test]
	fn new_location_pays_down_the_deficit() {
		let mut cluster = ClusterState::with_rng_seed(2, 1);
		cluster.enqueue_replication(1, 2);

		cluster.record_location(1, &ep(7000));
		assert_eq!(cluster.pending_deficit(1), Some(1));
		// a repeated report from the same holder changes nothing
		cluster.record_location(1, &ep(7000));
		assert_eq!(cluster.pending_deficit(1), Some(1));

		cluster.record_location(1, &ep(7001));
		assert_eq!(cluster.pending_deficit(1), None);
	}

	#[test]
	fn tasks_go_to_holders_and_target_non_holders() {
		let mut cluster = ClusterState::with_rng_seed(2, 1);
		cluster.touch(&ep(7000));
		cluster.touch(&ep(7001));
		cluster.record_location(1, &ep(7000));
		cluster.enqueue_replication(1, 1);

		// a non-holder cannot source the copy
		assert!(cluster.take_tasks(&ep(7001), |_| Some(Block { id: 1, len: 9 })).is_empty());
		assert_eq!(cluster.pending_deficit(1), Some(1));

		let tasks = cluster.take_tasks(&ep(7000), |_| Some(Block { id: 1, len: 9 }));
		assert_eq!(tasks.len(), 1);
		assert_eq!(tasks[0].op, op::COPY);
		assert_eq!(tasks[0].located.block.id, 1);
		assert_eq!(tasks[0].located.endpoints, vec![ep(7001)]);
		// dispatched entries leave the queue
		assert_eq!(cluster.pending_deficit(1), None);
	}

	#[test]
	fn tasks_wait_until_a_destination_is_available() {
		let mut cluster = ClusterState::with_rng_seed(2, 1);
		cluster.touch(&ep(7000));
		cluster.record_location(1, &ep(7000));
		cluster.enqueue_replication(1, 1);

		// sole holder is also the only alive server: nowhere to copy to
		assert!(cluster.take_tasks(&ep(7000), |_| Some(Block { id: 1, len: 9 })).is_empty());
		assert_eq!(cluster.pending_deficit(1), Some(1));
	}

	#[test]
	fn tasks_for_removed_blocks_are_dropped() {
		let mut cluster = ClusterState::with_rng_seed(2, 1);
		cluster.touch(&ep(7000));
		cluster.touch(&ep(7001));
		cluster.record_location(1, &ep(7000));
		cluster.enqueue_replication(1, 1);

		let tasks = cluster.take_tasks(&ep(7000), |_| None);
		assert!(tasks.is_empty());
		assert_eq!(cluster.pending_deficit(1), None);
	}

	#[test]
	fn allocate_returns_distinct_servers_or_fails() {
		let mut cluster = ClusterState::with_rng_seed(3, 42);
		for port in 7000..7005 {
			cluster.touch(&ep(port));
		}

		let picked = cluster.allocate(3).unwrap();
		assert_eq!(picked.len(), 3);
		let mut dedup = picked.clone();
		dedup.sort_by_key(|e| e.port);
		dedup.dedup();
		assert_eq!(dedup.len(), 3, "placement must pick distinct servers");

		match cluster.allocate(6) {
			Err(DfsError::Exhausted { needed: 6, alive: 5 }) => {}
			other => panic!("expected Exhausted, got {:?}", other),
		}
	}

	#[test]
	fn seeded_allocation_is_reproducible() {
		let mut a = ClusterState::with_rng_seed(3, 7);
		let mut b = ClusterState::with_rng_seed(3, 7);
		for port in 7000..7008 {
			a.touch(&ep(port));
			b.touch(&ep(port));
		}
		assert_eq!(a.allocate(3).unwrap(), b.allocate(3).unwrap());
	}

	#[test]
	fn safe_condition_requires_an_alive_holder_per_block() {
		let mut cluster = ClusterState::with_rng_seed(2, 1);
		assert!(cluster.all_blocks_located(&[]));
		assert!(!cluster.all_blocks_located(&[1]));

		cluster.touch(&ep(7000));
		cluster.record_location(1, &ep(7000));
		assert!(cluster.all_blocks_located(&[1]));
		assert!(!cluster.all_blocks_located(&[1, 2]));

		// evict the only holder: the block counts as unlocated again
		cluster.sweep_dead();
		cluster.sweep_dead();
		assert!(!cluster.all_blocks_located(&[1]));
	}
}

// vim: ts=4

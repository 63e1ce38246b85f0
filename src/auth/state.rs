//! Pending OpenID Connect login attempts.

use std::{collections::HashMap, time::Duration};

use parking_lot::Mutex;
use rand::{distributions::Alphanumeric, Rng};
use tokio::time::Instant;
use tracing::trace;

/// Length of a generated state nonce
pub const STATE_LENGTH: usize = 32;

/// A bounded set of `state` nonces handed out at login, each of which may be
/// consumed exactly once before it expires. Once full, expired states are
/// evicted first, then the oldest ones.
#[derive(Debug)]
pub struct PendingStates {
	states: Mutex<HashMap<String, Instant>>,
	ttl: Duration,
	capacity: usize,
}

impl PendingStates {
	/// Default lifetime of a pending state
	pub const DEFAULT_TTL: Duration = Duration::from_secs(600);
	/// Default maximum number of pending states
	pub const DEFAULT_CAPACITY: usize = 4096;

	/// Create a new empty set of pending states, which will hold up to
	/// `capacity` states for `ttl` each
	#[must_use]
	pub fn new(ttl: Duration, capacity: usize) -> Self {
		Self {
			states: Mutex::new(HashMap::new()),
			ttl,
			capacity: capacity.max(1),
		}
	}

	/// Generate a new random state and remember it
	#[must_use]
	pub fn generate(&self) -> String {
		let state = rand::thread_rng()
			.sample_iter(&Alphanumeric)
			.take(STATE_LENGTH)
			.map(char::from)
			.collect::<String>();

		self.insert(state.clone());
		state
	}

	fn insert(&self, state: String) {
		let now = Instant::now();
		let mut states = self.states.lock();

		if states.len() >= self.capacity {
			states.retain(|_, created| now.duration_since(*created) < self.ttl);
			trace!(remaining = states.len(), "expired states evicted");
		}

		while states.len() >= self.capacity {
			let oldest = states
				.iter()
				.min_by_key(|(_, created)| **created)
				.map(|(state, _)| state.clone());

			match oldest {
				Some(oldest) => states.remove(&oldest),
				None => break,
			};
		}

		states.insert(state, now);
	}

	/// Consume a state, returning `true` if it was handed out by this set, has
	/// not expired, and has not been consumed before
	pub fn consume(&self, state: &str) -> bool {
		self.states
			.lock()
			.remove(state)
			.is_some_and(|created| created.elapsed() < self.ttl)
	}

	/// The number of states currently held, including expired ones that have
	/// not been evicted yet
	#[must_use]
	pub fn len(&self) -> usize {
		self.states.lock().len()
	}

	/// Whether no states are currently held
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.states.lock().is_empty()
	}
}

impl Default for PendingStates {
	fn default() -> Self {
		Self::new(Self::DEFAULT_TTL, Self::DEFAULT_CAPACITY)
	}
}

#[cfg(test)]
mod tests {
	use tokio::time::advance;

	use super::*;

	#[test]
	fn generate() {
		let states = PendingStates::default();

		let a = states.generate();
		let b = states.generate();

		assert_eq!(a.len(), STATE_LENGTH);
		assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
		assert_ne!(a, b);
		assert_eq!(states.len(), 2);
	}

	#[test]
	fn consume_once() {
		let states = PendingStates::default();
		let state = states.generate();

		assert!(!states.consume("not-a-state"));
		assert!(states.consume(&state));
		assert!(!states.consume(&state));
		assert!(states.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn consume_expired() {
		let states = PendingStates::new(Duration::from_secs(10), 16);
		let fresh = states.generate();
		let stale = states.generate();

		advance(Duration::from_secs(5)).await;
		assert!(states.consume(&fresh));

		advance(Duration::from_secs(5)).await;
		assert!(!states.consume(&stale));
		assert!(states.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn bounded() {
		let states = PendingStates::new(Duration::from_secs(10), 3);

		let expired = states.generate();
		advance(Duration::from_secs(11)).await;
		let oldest = states.generate();
		advance(Duration::from_secs(1)).await;
		let older = states.generate();
		advance(Duration::from_secs(1)).await;

		// Full, the expired state goes first
		let newer = states.generate();
		assert_eq!(states.len(), 3);
		assert!(!states.consume(&expired));

		advance(Duration::from_secs(1)).await;
		let _newest = states.generate();
		advance(Duration::from_secs(1)).await;

		// Full with no expired states, the oldest goes
		let _latest = states.generate();
		assert_eq!(states.len(), 3);
		assert!(!states.consume(&oldest));
		assert!(!states.consume(&older));
		assert!(states.consume(&newer));
	}
}

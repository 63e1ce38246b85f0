//! A fully in-memory [`StoreBackend`] implementation, storing all data in RAM
//! with no other backups. This is mostly intended for tests, as it doesn't
//! depend on any state being persisted between server shutdown and startup,
//! nor does it depend on any external resources or services.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::instrument;

use crate::{
	normalized::{Name, Redirect},
	store::{now, BackendType, Link, Selector, StoreBackend, StoreError},
};

/// A fully in-memory `StoreBackend` implementation useful for testing. Not
/// recommended for production, as this lacks any data persistence or backups.
///
/// # Configuration
///
/// **Store backend name:**
/// `memory`
///
/// **Configuration:**
/// *none*
#[derive(Debug)]
pub struct Store {
	links: RwLock<BTreeMap<Name, Link>>,
}

#[async_trait]
impl StoreBackend for Store {
	fn store_type() -> BackendType
	where
		Self: Sized,
	{
		BackendType::Memory
	}

	fn get_store_type(&self) -> BackendType {
		BackendType::Memory
	}

	#[instrument(level = "trace", ret, err)]
	async fn new(_config: &HashMap<String, String>) -> Result<Self> {
		Ok(Self {
			links: RwLock::new(BTreeMap::new()),
		})
	}

	#[instrument(level = "trace", ret, err)]
	async fn get(&self, name: Name) -> Result<Option<Link>, StoreError> {
		Ok(self.links.read().get(&name).cloned())
	}

	#[instrument(level = "trace", err)]
	async fn list(&self, search: Option<String>) -> Result<Vec<Link>, StoreError> {
		let links = self.links.read();

		Ok(match search {
			Some(search) => links
				.values()
				.filter(|l| l.name.as_str().contains(&search) || l.redirect.as_str().contains(&search))
				.cloned()
				.collect(),
			None => links.values().cloned().collect(),
		})
	}

	#[instrument(level = "trace", ret, err)]
	async fn create(&self, name: Name, redirect: Redirect) -> Result<Link, StoreError> {
		let mut links = self.links.write();

		if links.contains_key(&name) {
			return Err(StoreError::AlreadyExists(name));
		}

		let link = Link::new(name.clone(), redirect);
		links.insert(name, link.clone());
		Ok(link)
	}

	#[instrument(level = "trace", ret, err)]
	async fn update(&self, name: Name, redirect: Redirect) -> Result<Option<Link>, StoreError> {
		let mut links = self.links.write();

		Ok(links.get_mut(&name).map(|link| {
			link.redirect = redirect;
			link.updated_at = now();
			link.clone()
		}))
	}

	#[instrument(level = "trace", ret, err)]
	async fn delete(&self, selector: Selector) -> Result<Option<Link>, StoreError> {
		let mut links = self.links.write();

		Ok(match selector {
			Selector::Name(name) => links.remove(&name),
			Selector::Id(id) => {
				let name = links
					.values()
					.find(|link| link.id == id)
					.map(|link| link.name.clone());
				name.and_then(|name| links.remove(&name))
			}
		})
	}

	#[instrument(level = "trace", ret, err)]
	async fn incr_visits(&self, name: Name) -> Result<Option<u64>, StoreError> {
		let mut links = self.links.write();

		Ok(links.get_mut(&name).map(|link| {
			link.visits = link.visits.saturating_add(1);
			link.visits
		}))
	}

	async fn ping(&self) -> Result<(), StoreError> {
		Ok(())
	}
}

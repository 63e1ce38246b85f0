//! This module contains all things relating to the way links are stored. For
//! details about configuring each store backend, see that backend's
//! documentation.

pub mod backend;
mod entity;
mod memory;
mod sql;


use std::{
	collections::HashMap,
	fmt::{Display, Formatter, Result as FmtResult},
	str::FromStr,
	sync::Arc,
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::spawn;
use tracing::{debug, instrument, trace};

pub use self::{backend::StoreBackend, memory::Store as Memory, sql::Store as Sql};
use crate::{
	id::Id,
	normalized::{Name, Redirect},
};

/// A link, mapping a short [`Name`] to a [`Redirect`] destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
	/// Unique, immutable ID assigned at creation
	pub id: Id,
	/// Unique normalized short name
	pub name: Name,
	/// Destination URL
	pub redirect: Redirect,
	/// Number of times this link was followed
	pub visits: u64,
	/// Time of creation
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	/// Time of the last change to the redirect
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
}

impl Link {
	/// Create a new link with a fresh random ID, no visits, and both
	/// timestamps set to now
	#[must_use]
	pub fn new(name: Name, redirect: Redirect) -> Self {
		let now = now();

		Self {
			id: Id::new(),
			name,
			redirect,
			visits: 0,
			created_at: now,
			updated_at: now,
		}
	}
}

/// The current time in UTC, truncated to whole microseconds so that it
/// survives a round-trip through any SQL backend unchanged
pub(crate) fn now() -> OffsetDateTime {
	let now = OffsetDateTime::now_utc();
	now.replace_microsecond(now.microsecond()).unwrap_or(now)
}

/// Selects a single link, either by its name or by its ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
	/// Select the link with this name
	Name(Name),
	/// Select the link with this ID
	Id(Id),
}

impl Display for Selector {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::Name(name) => write!(fmt, "name {name}"),
			Self::Id(id) => write!(fmt, "id {id}"),
		}
	}
}

impl From<Name> for Selector {
	fn from(name: Name) -> Self {
		Self::Name(name)
	}
}

impl From<Id> for Selector {
	fn from(id: Id) -> Self {
		Self::Id(id)
	}
}

/// The error returned by store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	/// A link with this name already exists
	#[error("a link named \"{0}\" already exists")]
	AlreadyExists(Name),
	/// The backend failed to process the operation
	#[error("store backend error: {0:#}")]
	Backend(#[from] anyhow::Error),
}

/// The type of store backend used by the server. All variants must have a
/// canonical human-readable string representation using only 'a'-'z', '0'-'9',
/// and '_'.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
	/// A fully in-memory store backend, storing all data in RAM with no other
	/// backups, but without any external dependencies. Not recommended outside
	/// of tests and development.
	#[default]
	Memory,
	/// A store backend which stores all data in a PostgreSQL or SQLite
	/// database.
	Sql,
}

impl BackendType {
	/// Get the canonical string representation of this backend type
	#[must_use]
	pub const fn to_str(self) -> &'static str {
		match self {
			Self::Memory => "memory",
			Self::Sql => "sql",
		}
	}
}

impl FromStr for BackendType {
	type Err = IntoBackendTypeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"memory" => Ok(Self::Memory),
			"sql" => Ok(Self::Sql),
			s => Err(IntoBackendTypeError(s.to_string())),
		}
	}
}

impl Display for BackendType {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		fmt.write_str(self.to_str())
	}
}

/// The error returned by fallible conversions into a [`BackendType`]. Contains
/// the original input string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unrecognized store backend type {0}")]
pub struct IntoBackendTypeError(String);

/// A wrapper around any [`StoreBackend`], providing access to the underlying
/// store along with extra things like logging. Cloning a `Store` is cheap, and
/// all clones share the same backend.
#[derive(Debug, Clone)]
pub struct Store {
	store: Arc<dyn StoreBackend>,
}

impl Store {
	/// Create a new instance of this `Store`. Configuration is
	/// backend-specific and is provided as a `HashMap` from string keys to
	/// string values, that are parsed by the backend as needed.
	///
	/// # Errors
	/// This function returns an error if the store could not be initialized.
	/// This may happen if the configuration is invalid or for other
	/// backend-specific reasons (such as the database being unreachable).
	#[instrument(level = "debug", skip(config), ret, err)]
	pub async fn new(
		store_type: BackendType,
		config: &HashMap<String, String>,
	) -> anyhow::Result<Self> {
		match store_type {
			BackendType::Memory => Ok(Self {
				store: Arc::new(Memory::new(config).await?),
			}),
			BackendType::Sql => Ok(Self {
				store: Arc::new(Sql::new(config).await?),
			}),
		}
	}

	/// Wrap an already initialized backend
	#[must_use]
	pub fn from_backend(backend: impl StoreBackend + 'static) -> Self {
		Self {
			store: Arc::new(backend),
		}
	}

	/// Get the underlying implementation's name
	#[must_use]
	pub fn backend_name(&self) -> &'static str {
		self.store.get_store_type().to_str()
	}

	/// Get a link by its name. A link not existing is not an error, if no
	/// matching link is found, `Ok(None)` is returned.
	///
	/// # Errors
	/// An error is only returned if something actually fails.
	#[instrument(level = "debug", skip(self), fields(store = self.backend_name()), ret, err)]
	pub async fn get(&self, name: Name) -> Result<Option<Link>, StoreError> {
		self.store.get(name).await
	}

	/// List all links ordered by name. With a non-empty `search`, only links
	/// whose name or redirect contains it are returned.
	///
	/// # Errors
	/// An error is only returned if something actually fails.
	#[instrument(level = "debug", skip(self), fields(store = self.backend_name()), err)]
	pub async fn list(&self, search: Option<&str>) -> Result<Vec<Link>, StoreError> {
		let search = search.filter(|s| !s.is_empty()).map(ToString::to_string);
		let links = self.store.list(search).await?;
		trace!(count = links.len(), "links listed");
		Ok(links)
	}

	/// Create a new link.
	///
	/// # Errors
	/// Returns [`StoreError::AlreadyExists`] if a link with that name already
	/// exists, in which case nothing is changed.
	#[instrument(level = "debug", skip(self), fields(store = self.backend_name()), ret, err)]
	pub async fn create(&self, name: Name, redirect: Redirect) -> Result<Link, StoreError> {
		self.store.create(name, redirect).await
	}

	/// Change the redirect of an existing link, returning the updated link or
	/// `None` if there is no link with that name.
	///
	/// # Errors
	/// An error is only returned if something actually fails.
	#[instrument(level = "debug", skip(self), fields(store = self.backend_name()), ret, err)]
	pub async fn update(&self, name: Name, redirect: Redirect) -> Result<Option<Link>, StoreError> {
		self.store.update(name, redirect).await
	}

	/// Permanently remove a link, returning it, or `None` if no link matched.
	///
	/// # Errors
	/// An error is only returned if something actually fails.
	#[instrument(level = "debug", skip(self), fields(store = self.backend_name()), ret, err)]
	pub async fn delete(&self, selector: Selector) -> Result<Option<Link>, StoreError> {
		self.store.delete(selector).await
	}

	/// Increment a link's visit counter in a spawned tokio task in the
	/// background.
	///
	/// # Error
	/// This function failing in any way is not considered an error, because
	/// visits are counted on a best-effort basis. However, any errors that
	/// occur are logged.
	pub fn incr_visits(&self, name: Name) {
		let store = self.store.clone();
		spawn(async move {
			match store.incr_visits(name.clone()).await {
				Ok(visits) => trace!(?visits, %name, "visits incremented"),
				Err(err) => debug!(%err, %name, "visit incrementing failed"),
			}
		});
	}

	/// Check that the backend is reachable and working.
	///
	/// # Errors
	/// Returns an error if the backend can't be reached.
	#[instrument(level = "trace", skip(self), fields(store = self.backend_name()), err)]
	pub async fn ping(&self) -> Result<(), StoreError> {
		self.store.ping().await
	}
}

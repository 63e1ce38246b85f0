//! This module contains the trait implemented by every link store backend.
//! A backend can be something simple like an in-memory map, an interface to a
//! SQL database, or anything in between. The aim of the [`StoreBackend`] trait
//! is to make it easy to swap between different storage backends. For details
//! about configuring each store backend, see that backend's documentation.

use core::fmt::Debug;
use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::{
	normalized::{Name, Redirect},
	store::{BackendType, Link, Selector, StoreError},
};

/// The link store trait used by the server.
#[async_trait]
#[allow(clippy::module_name_repetitions)]
pub trait StoreBackend: Debug + Send + Sync {
	/// Get this implementation's backend store type. This is used in
	/// e.g. the configuration.
	fn store_type() -> BackendType
	where
		Self: Sized;

	/// Get this implementation's backend store type. This can be used on trait
	/// objects, but is otherwise equivalent to calling `Self::store_type()`.
	fn get_store_type(&self) -> BackendType;

	/// Create a new instance of this `StoreBackend`. Configuration is provided
	/// as string keys and values. For details about configuring each store
	/// backend, see that backend's documentation.
	async fn new(config: &HashMap<String, String>) -> Result<Self>
	where
		Self: Sized;

	/// Get the link with this name, or `None` if there isn't one.
	async fn get(&self, name: Name) -> Result<Option<Link>, StoreError>;

	/// Get all links, ordered by name. If `search` is provided, only links
	/// whose name or redirect contain `search` as a substring are returned.
	/// The search term is matched literally and case-sensitively.
	async fn list(&self, search: Option<String>) -> Result<Vec<Link>, StoreError>;

	/// Create a new link.
	///
	/// # Storage Guarantees
	/// If a link with this name already exists, nothing is changed and
	/// [`StoreError::AlreadyExists`] is returned.
	async fn create(&self, name: Name, redirect: Redirect) -> Result<Link, StoreError>;

	/// Set a new redirect for the link with this name. Only the redirect and
	/// the `updated_at` time change. Returns the updated link, or `None` if
	/// there is no such link.
	async fn update(&self, name: Name, redirect: Redirect) -> Result<Option<Link>, StoreError>;

	/// Permanently remove a link. Returns the removed link, or `None` if no
	/// link matched.
	///
	/// # Storage Guarantees
	/// If an `Ok` is returned, the link was definitely removed and will be
	/// unavailable on next request.
	async fn delete(&self, selector: Selector) -> Result<Option<Link>, StoreError>;

	/// Increment a link's visit counter by 1, returning the new count, or
	/// `None` if there is no link with this name.
	async fn incr_visits(&self, name: Name) -> Result<Option<u64>, StoreError>;

	/// Check that the backend is reachable.
	async fn ping(&self) -> Result<(), StoreError>;
}

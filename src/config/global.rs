//! Global mand server configuration.

use std::{
	collections::HashMap,
	fmt::{Debug, Display, Formatter, Result as FmtResult},
	path::PathBuf,
	time::Duration,
};

use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use super::{ListenAddress, LogLevel, MissingOptionError};
use crate::{config::partial::Partial, store::BackendType};

/// `store_config` keys whose values are masked when displaying the
/// configuration
const SECRET_STORE_KEYS: [&str; 2] = ["password", "connection_string"];

/// Shorten a secret to its first 3 characters
fn mask(secret: &str) -> String {
	secret.chars().take(3).chain("...".chars()).collect()
}

/// Global configuration for the mand server. This is the more idiomatic,
/// easier to use (in rust code), and shareable-across-threads version, which
/// can be updated from a [`Partial`].
pub struct Config {
	inner: RwLock<ConfigInner>,
	file: Option<PathBuf>,
}

impl Config {
	/// Create a new `Config` instance using the provided file path as the
	/// configuration file. Configuration data is parsed from environment
	/// variables, the config file, and command-line arguments, in that order.
	/// If there is an error with the configuration file or any other
	/// configuration source, no error is emitted. Instead, a warning is logged,
	/// and the other configuration sources are used.
	///
	/// # IO
	/// This function performs synchronous file IO, and should therefore not be
	/// used inside of an asynchronous context.
	#[must_use]
	pub fn new(file: Option<PathBuf>) -> Self {
		let config = Self {
			inner: RwLock::new(ConfigInner::default()),
			file,
		};
		config.update();
		config
	}

	/// Create a new static reference to a new `Config` instance. See
	/// [`Config::new`] for details.
	///
	/// # Memory
	/// Because this function leaks memory with no (safe) way of freeing it,
	/// care should be taken not to call this function an unbounded number of
	/// times.
	#[must_use]
	pub fn new_static(file: Option<PathBuf>) -> &'static Self {
		Box::leak(Box::new(Self::new(file)))
	}

	/// Create a new `Config` from defaults and a single [`Partial`], without
	/// reading any other configuration source. [`Config::update`] will replace
	/// these values with ones from the usual sources.
	#[must_use]
	pub fn from_partial(partial: &Partial) -> Self {
		let mut config = ConfigInner::default();
		config.update_from_partial(partial);

		Self {
			inner: RwLock::new(config),
			file: None,
		}
	}

	/// Update this config from environment variables, config file, and
	/// command-line arguments. This function starts with defaults for each
	/// option, then updates those from environment variables, then from the
	/// config file, then from command-line arguments, and finally overwrites
	/// this `Config`'s options with those newly-parsed ones.
	///
	/// # IO
	/// This function performs synchronous file IO, and should therefore not be
	/// used inside of an asynchronous context.
	#[instrument(level = "info", skip(self), fields(file = ?self.file))]
	pub fn update(&self) {
		let mut config = ConfigInner::default();

		config.update_from_partial(&Partial::from_env_vars());

		if let Some(ref file) = *self.file() {
			match Partial::from_file(file) {
				Ok(partial) => config.update_from_partial(&partial),
				Err(err) => warn!("Could not read configuration from file: {err}"),
			}
		}

		config.update_from_partial(&Partial::from_args());

		*self.inner.write() = config;

		debug!(new_config = %self, "Configuration reloaded");
	}

	/// Generate a redirector configuration from the options defined in this
	/// global mand config.
	///
	/// # Errors
	/// Returns an error if either fallback redirect is not configured.
	pub fn redirector(&self) -> Result<Redirector, MissingOptionError> {
		let inner = self.inner.read();

		Ok(Redirector {
			send_server: inner.send_server,
			empty_redirect: inner
				.empty_redirect
				.clone()
				.ok_or(MissingOptionError("empty_redirect"))?,
			not_found_redirect: inner
				.not_found_redirect
				.clone()
				.ok_or(MissingOptionError("not_found_redirect"))?,
		})
	}

	/// Generate the OpenID Connect client configuration from the options
	/// defined in this global mand config.
	///
	/// # Errors
	/// Returns an error if any required OpenID Connect option is not set.
	pub fn oidc(&self) -> Result<Oidc, MissingOptionError> {
		let inner = self.inner.read();
		let required = |value: &Option<String>, name| value.clone().ok_or(MissingOptionError(name));

		Ok(Oidc {
			issuer_url: required(&inner.oidc_issuer_url, "oidc_issuer_url")?,
			client_id: required(&inner.oidc_client_id, "oidc_client_id")?,
			client_secret: required(&inner.oidc_client_secret, "oidc_client_secret")?,
			redirect_url: required(&inner.oidc_redirect_url, "oidc_redirect_url")?,
			allowed_group: required(&inner.oidc_allowed_group, "oidc_allowed_group")?,
			group_claim: inner.oidc_group_claim.clone(),
			group_scope: inner.oidc_group_scope.clone(),
			state_ttl: inner.oidc_state_ttl,
		})
	}

	/// Get the configured log level
	#[must_use]
	pub fn log_level(&self) -> LogLevel {
		self.inner.read().log_level
	}

	/// Get the list of listener addresses
	#[must_use]
	pub fn listeners(&self) -> Vec<ListenAddress> {
		self.inner.read().listeners.clone()
	}

	/// Get the `send_server` configuration option
	#[must_use]
	pub fn send_server(&self) -> bool {
		self.inner.read().send_server
	}

	/// Get the store type
	#[must_use]
	pub fn store(&self) -> BackendType {
		self.inner.read().store
	}

	/// Get the store backend configuration
	#[must_use]
	pub fn store_config(&self) -> HashMap<String, String> {
		self.inner.read().store_config.clone()
	}

	/// Get the configuration file path
	#[must_use]
	pub const fn file(&self) -> &Option<PathBuf> {
		&self.file
	}
}

impl Debug for Config {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		Display::fmt(self, fmt)
	}
}

impl Display for Config {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		let inner = self.inner.read();
		let store_config = inner
			.store_config
			.iter()
			.map(|(k, v)| {
				if SECRET_STORE_KEYS.contains(&k.as_str()) {
					(k.as_str(), mask(v))
				} else {
					(k.as_str(), v.clone())
				}
			})
			.collect::<HashMap<_, _>>();

		fmt.debug_struct("Config")
			.field("log_level", &inner.log_level.to_string())
			.field("listeners", &serde_json::to_string(&inner.listeners))
			.field("send_server", &inner.send_server)
			.field("empty_redirect", &inner.empty_redirect)
			.field("not_found_redirect", &inner.not_found_redirect)
			.field("store", &inner.store)
			.field("store_config", &store_config)
			.field("oidc_issuer_url", &inner.oidc_issuer_url)
			.field("oidc_client_id", &inner.oidc_client_id)
			.field(
				"oidc_client_secret",
				&inner.oidc_client_secret.as_deref().map(mask),
			)
			.field("oidc_redirect_url", &inner.oidc_redirect_url)
			.field("oidc_allowed_group", &inner.oidc_allowed_group)
			.field("oidc_group_claim", &inner.oidc_group_claim)
			.field("oidc_group_scope", &inner.oidc_group_scope)
			.field("oidc_state_ttl", &inner.oidc_state_ttl)
			.field("file", &self.file)
			.finish()
	}
}

/// Actual configuration storage inside of a [`Config`]
#[derive(PartialEq)]
struct ConfigInner {
	/// Minimum level of logs to be collected/displayed. Debug and trace levels
	/// may expose secret information, so are not recommended for production
	/// deployments.
	pub log_level: LogLevel,
	/// Addresses on which the server will listen on
	pub listeners: Vec<ListenAddress>,
	/// Send the `Server` header
	pub send_server: bool,
	/// Destination for requests without a link name
	pub empty_redirect: Option<String>,
	/// Destination for requests for unknown links
	pub not_found_redirect: Option<String>,
	/// The store backend type
	pub store: BackendType,
	/// The store backend configuration
	pub store_config: HashMap<String, String>,
	pub oidc_issuer_url: Option<String>,
	pub oidc_client_id: Option<String>,
	pub oidc_client_secret: Option<String>,
	pub oidc_redirect_url: Option<String>,
	pub oidc_allowed_group: Option<String>,
	pub oidc_group_claim: String,
	pub oidc_group_scope: String,
	pub oidc_state_ttl: Duration,
}

impl ConfigInner {
	/// Update the config from a [`Partial`]. This overwrites all fields of this
	/// [`Config`] from the provided [`Partial`], if they are set in that
	/// partial config. Store configuration is merged instead.
	fn update_from_partial(&mut self, partial: &Partial) {
		if let Some(log_level) = partial.log_level {
			self.log_level = log_level;
		}

		if let Some(ref listeners) = partial.listeners {
			self.listeners = listeners.clone();
		}

		if let Some(send_server) = partial.send_server {
			self.send_server = send_server;
		}

		if let Some(ref empty_redirect) = partial.empty_redirect {
			self.empty_redirect = Some(empty_redirect.clone());
		}

		if let Some(ref not_found_redirect) = partial.not_found_redirect {
			self.not_found_redirect = Some(not_found_redirect.clone());
		}

		if let Some(store) = partial.store {
			self.store = store;
		}

		if let Some(ref store_config) = partial.store_config {
			self.store_config
				.extend(store_config.iter().map(|(k, v)| (k.clone(), v.clone())));
		}

		for (option, value) in [
			(&mut self.oidc_issuer_url, &partial.oidc_issuer_url),
			(&mut self.oidc_client_id, &partial.oidc_client_id),
			(&mut self.oidc_client_secret, &partial.oidc_client_secret),
			(&mut self.oidc_redirect_url, &partial.oidc_redirect_url),
			(&mut self.oidc_allowed_group, &partial.oidc_allowed_group),
		] {
			if value.is_some() {
				option.clone_from(value);
			}
		}

		if let Some(ref group_claim) = partial.oidc_group_claim {
			self.oidc_group_claim = group_claim.clone();
		}

		if let Some(ref group_scope) = partial.oidc_group_scope {
			self.oidc_group_scope = group_scope.clone();
		}

		if let Some(state_ttl) = partial.oidc_state_ttl {
			self.oidc_state_ttl = Duration::from_secs(state_ttl);
		}
	}
}

impl Default for ConfigInner {
	fn default() -> Self {
		Self {
			log_level: LogLevel::default(),
			listeners: vec![ListenAddress::default()],
			send_server: true,
			empty_redirect: None,
			not_found_redirect: None,
			store: BackendType::default(),
			store_config: HashMap::with_capacity(0),
			oidc_issuer_url: None,
			oidc_client_id: None,
			oidc_client_secret: None,
			oidc_redirect_url: None,
			oidc_allowed_group: None,
			oidc_group_claim: Oidc::DEFAULT_GROUP_CLAIM.to_string(),
			oidc_group_scope: Oidc::DEFAULT_GROUP_SCOPE.to_string(),
			oidc_state_ttl: Oidc::DEFAULT_STATE_TTL,
		}
	}
}

/// Configuration of a redirector. Can be generated from a [`Config`]. This is
/// separate from the actual `Config`, because it shouldn't/can't change during
/// the course of processing a redirect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirector {
	/// Send the `Server` header
	pub send_server: bool,
	/// Destination for requests without a link name
	pub empty_redirect: String,
	/// Destination for requests for unknown links
	pub not_found_redirect: String,
}

/// Configuration of the OpenID Connect client used to authenticate admin API
/// users. Can be generated from a [`Config`].
#[derive(Clone, PartialEq, Eq)]
pub struct Oidc {
	/// Issuer URL, used for discovery and to validate the `iss` claim
	pub issuer_url: String,
	/// OAuth client ID, also the expected `aud` of ID tokens
	pub client_id: String,
	/// OAuth client secret
	pub client_secret: String,
	/// OAuth redirect (callback) URL
	pub redirect_url: String,
	/// Group required to use the admin API
	pub allowed_group: String,
	/// Name of the ID token claim containing groups
	pub group_claim: String,
	/// Scope requested to get the group claim
	pub group_scope: String,
	/// Lifetime of a login attempt
	pub state_ttl: Duration,
}

impl Oidc {
	/// Default name of the claim containing groups
	pub const DEFAULT_GROUP_CLAIM: &'static str = "ldap_groups";
	/// Default scope requested to get groups
	pub const DEFAULT_GROUP_SCOPE: &'static str = "ldap";
	/// Default lifetime of a login attempt
	pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(600);
}

impl Debug for Oidc {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		fmt.debug_struct("Oidc")
			.field("issuer_url", &self.issuer_url)
			.field("client_id", &self.client_id)
			.field("client_secret", &mask(&self.client_secret))
			.field("redirect_url", &self.redirect_url)
			.field("allowed_group", &self.allowed_group)
			.field("group_claim", &self.group_claim)
			.field("group_scope", &self.group_scope)
			.field("state_ttl", &self.state_ttl)
			.finish()
	}
}

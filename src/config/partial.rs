//! mand server configuration as seen by the user

use std::{
	collections::HashMap, env, ffi::OsStr, fs, io::Error as IoError, path::Path, str::FromStr,
};

use basic_toml::Error as TomlError;
use pico_args::Arguments;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::{
	config::{ListenAddress, LogLevel},
	store::BackendType,
};

/// Environment variables holding database settings, and the `store_config`
/// keys they are stored under
const DB_ENV_VARS: [(&str, &str); 8] = [
	("MAND_DB_HOST", "host"),
	("MAND_DB_PORT", "port"),
	("MAND_DB_NAME", "name"),
	("MAND_DB_USER", "user"),
	("MAND_DB_PASSWORD", "password"),
	("MAND_DB_OPTIONS", "options"),
	("MAND_DB_CONNECTION_STRING", "connection_string"),
	("MAND_DB_DEBUG", "debug"),
];

/// The error returned by fallible conversions into a [`Partial`]
#[derive(Debug, Error)]
pub enum IntoPartialError {
	/// Failed to parse from toml
	#[error("failed to parse from toml")]
	Toml(#[from] TomlError),
	/// Failed to parse from yaml
	#[error("failed to parse from yaml")]
	Yaml(#[from] YamlError),
	/// Failed to parse from json
	#[error("failed to parse from json")]
	Json(#[from] JsonError),
	/// Failed to read config file
	#[error("failed to read config file")]
	Io(#[from] IoError),
	/// File extension unknown, could not determine format
	#[error("file extension unknown, could not determine format")]
	UnknownExtension,
}

/// Parse the provided environment variable, returning `Some(...)` if it is
/// present, has a value, and was successfully parsed, and `None` otherwise
fn parse_env_var<T: FromStr>(key: &'static str) -> Option<T> {
	env::var(key).map_or(None, |s| s.parse().ok())
}

/// Parse the provided environment variable as json, logging a warning if it
/// is present but invalid
fn parse_env_json<T: DeserializeOwned>(key: &'static str) -> Option<T> {
	env::var(key)
		.map_or(None, |s| {
			serde_json::from_str(&s)
				.map_err(|err| {
					warn!(%err, "Error parsing configuration from environment variable '{key}'");
				})
				.ok()
		})
		.flatten()
}

/// Parse the provided command-line argument as json, logging a warning if it
/// is present but invalid
fn parse_arg_json<T: DeserializeOwned>(args: &mut Arguments, key: &'static str) -> Option<T> {
	args.opt_value_from_fn(key, |s| serde_json::from_str(s))
		.map_err(|err| {
			warn!(%err, "Error parsing configuration from command-line argument '{key}'");
		})
		.ok()
		.flatten()
}

/// mand configuration as seen from the user's perspective. This is easier to
/// parse, but less idiomatic and not as easy to use as [`Config`]. As this is
/// a representation of mand's configuration from one source only, all fields
/// are optional, which allows incremental updates to the actual [`Config`]
/// struct.
///
/// [`Config`]: super::Config
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partial {
	/// Minimum level of logs to be collected/displayed. Debug and trace levels
	/// may expose secret information, so are not recommended for production
	/// deployments.
	pub log_level: Option<LogLevel>,
	/// Listener addresses, see [`ListenAddress`] for details
	pub listeners: Option<Vec<ListenAddress>>,
	/// Send the `Server` header
	pub send_server: Option<bool>,
	/// Destination for requests without a link name
	pub empty_redirect: Option<String>,
	/// Destination for requests for unknown links
	pub not_found_redirect: Option<String>,
	/// The store backend type
	pub store: Option<BackendType>,
	/// The store backend configuration. All of these options are
	/// backend-specific, and have ASCII alphanumeric string keys in
	/// `snake_case`. The values are UTF-8 strings in any format.
	pub store_config: Option<HashMap<String, String>>,
	/// OpenID Connect issuer URL
	pub oidc_issuer_url: Option<String>,
	/// OAuth client ID
	pub oidc_client_id: Option<String>,
	/// OAuth client secret
	pub oidc_client_secret: Option<String>,
	/// OAuth redirect (callback) URL
	pub oidc_redirect_url: Option<String>,
	/// Group required to use the admin API
	pub oidc_allowed_group: Option<String>,
	/// Name of the ID token claim containing groups
	pub oidc_group_claim: Option<String>,
	/// Scope requested to get the group claim
	pub oidc_group_scope: Option<String>,
	/// Lifetime of a login attempt in seconds
	pub oidc_state_ttl: Option<u64>,
}

impl Partial {
	/// Parse a [`Partial`] from a [toml](https://toml.io/en/) string
	///
	/// # Errors
	/// Returns a `IntoPartialError::Toml` if deserialization fails.
	pub fn from_toml(toml: &str) -> Result<Self, IntoPartialError> {
		Ok(basic_toml::from_str(toml)?)
	}

	/// Parse a [`Partial`] from a [yaml](https://yaml.org/) string
	///
	/// # Errors
	/// Returns a `IntoPartialError::Yaml` if deserialization fails.
	pub fn from_yaml(yaml: &str) -> Result<Self, IntoPartialError> {
		Ok(serde_yaml::from_str(yaml)?)
	}

	/// Parse a [`Partial`] from a [json](https://json.org/) string
	///
	/// # Errors
	/// Returns a `IntoPartialError::Json` if deserialization fails.
	pub fn from_json(json: &str) -> Result<Self, IntoPartialError> {
		Ok(serde_json::from_str(json)?)
	}

	/// Read and parse a configuration file into a [`Partial`]. The format of
	/// the file is determined from its extension:
	/// - `*.toml` files are parsed as [toml](https://toml.io/en/)
	/// - `*.yaml` and `*.yml` files are parsed as [yaml](https://yaml.org/)
	/// - `*.json` files are parsed as [json](https://json.org/)
	///
	/// # IO
	/// This function performs synchronous file IO, and should not be used in an
	/// asynchronous context.
	///
	/// # Errors
	/// Returns an error when reading of parsing the file fails.
	#[instrument(level = "debug", err)]
	pub fn from_file(path: &Path) -> Result<Self, IntoPartialError> {
		let parse = match path.extension().map(OsStr::to_str) {
			Some(Some("toml")) => Self::from_toml,
			Some(Some("yaml" | "yml")) => Self::from_yaml,
			Some(Some("json")) => Self::from_json,
			_ => return Err(IntoPartialError::UnknownExtension),
		};

		parse(&fs::read_to_string(path)?)
	}

	/// Parse this process's command-line arguments into a [`Partial`]. See
	/// [`Partial::from_arguments`] for details.
	#[must_use]
	pub fn from_args() -> Self {
		Self::from_arguments(Arguments::from_env())
	}

	/// Parse command-line arguments into a [`Partial`]. Listeners and store
	/// configuration are parsed from json strings. Options are named like
	/// their configuration file counterparts, in `kebab-case` with a `--`
	/// prefix, e.g. `--not-found-redirect`.
	#[must_use]
	pub fn from_arguments(mut args: Arguments) -> Self {
		let listeners = parse_arg_json(&mut args, "--listeners");
		let store_config = parse_arg_json(&mut args, "--store-config");

		Self {
			log_level: args.opt_value_from_str("--log-level").unwrap_or(None),
			listeners,
			send_server: args.opt_value_from_str("--send-server").unwrap_or(None),
			empty_redirect: args.opt_value_from_str("--empty-redirect").unwrap_or(None),
			not_found_redirect: args
				.opt_value_from_str("--not-found-redirect")
				.unwrap_or(None),
			store: args.opt_value_from_str("--store").unwrap_or(None),
			store_config,
			oidc_issuer_url: args.opt_value_from_str("--oidc-issuer-url").unwrap_or(None),
			oidc_client_id: args.opt_value_from_str("--oidc-client-id").unwrap_or(None),
			oidc_client_secret: args
				.opt_value_from_str("--oidc-client-secret")
				.unwrap_or(None),
			oidc_redirect_url: args
				.opt_value_from_str("--oidc-redirect-url")
				.unwrap_or(None),
			oidc_allowed_group: args
				.opt_value_from_str("--oidc-allowed-group")
				.unwrap_or(None),
			oidc_group_claim: args.opt_value_from_str("--oidc-group-claim").unwrap_or(None),
			oidc_group_scope: args.opt_value_from_str("--oidc-group-scope").unwrap_or(None),
			oidc_state_ttl: args.opt_value_from_str("--oidc-state-ttl").unwrap_or(None),
		}
	}

	/// Parse environment variables with the prefix `MAND_` into a [`Partial`].
	/// Listeners and store configuration are parsed from json strings.
	///
	/// The flat database variables (`MAND_DB_HOST`, `MAND_DB_PORT`,
	/// `MAND_DB_NAME`, `MAND_DB_USER`, `MAND_DB_PASSWORD`, `MAND_DB_OPTIONS`,
	/// `MAND_DB_CONNECTION_STRING`, and `MAND_DB_DEBUG`) are added to the
	/// store configuration, overriding the same keys in `MAND_STORE_CONFIG`.
	/// If any of them is set and `MAND_STORE` is not, the `sql` store is used.
	#[must_use]
	#[instrument(level = "debug")]
	pub fn from_env_vars() -> Self {
		let mut store_config: Option<HashMap<String, String>> =
			parse_env_json("MAND_STORE_CONFIG");

		let db_config = DB_ENV_VARS
			.iter()
			.filter_map(|&(var, key)| env::var(var).ok().map(|val| (key.to_string(), val)))
			.collect::<HashMap<_, _>>();
		let has_db_config = !db_config.is_empty();

		if has_db_config {
			store_config.get_or_insert_with(HashMap::new).extend(db_config);
		}

		Self {
			log_level: parse_env_var("MAND_LOG_LEVEL"),
			listeners: parse_env_json("MAND_LISTENERS"),
			send_server: parse_env_var("MAND_SEND_SERVER"),
			empty_redirect: parse_env_var("MAND_EMPTY_REDIRECT"),
			not_found_redirect: parse_env_var("MAND_NOT_FOUND_REDIRECT"),
			store: parse_env_var("MAND_STORE")
				.or_else(|| has_db_config.then_some(BackendType::Sql)),
			store_config,
			oidc_issuer_url: parse_env_var("MAND_OIDC_ISSUER_URL"),
			oidc_client_id: parse_env_var("MAND_OIDC_CLIENT_ID"),
			oidc_client_secret: parse_env_var("MAND_OIDC_CLIENT_SECRET"),
			oidc_redirect_url: parse_env_var("MAND_OIDC_REDIRECT_URL"),
			oidc_allowed_group: parse_env_var("MAND_OIDC_ALLOWED_GROUP"),
			oidc_group_claim: parse_env_var("MAND_OIDC_GROUP_CLAIM"),
			oidc_group_scope: parse_env_var("MAND_OIDC_GROUP_SCOPE"),
			oidc_state_ttl: parse_env_var("MAND_OIDC_STATE_TTL"),
		}
	}
}

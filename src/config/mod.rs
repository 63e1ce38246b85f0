//! mand server configuration handling
//!
//! The mand server currently accepts the following configuration options:
//!
//! - `log_level` - Tracing log level. Possible values: `trace`, `debug`,
//!   `verbose`, `info`, `warn`, `error`. **Default `info`**.
//! - `listeners` - A list of listener addresses (strings) in the format of
//!   `ip-address:port` (see [`ListenAddress`] for details). **Default
//!   `:8080`**.
//! - `send_server` - Whether to send the Server HTTP header (`Server:
//!   mand/[VERSION]`). **Default `true`**.
//! - `empty_redirect` - Where requests without a link name (e.g. `/`) are
//!   redirected to. **Required**.
//! - `not_found_redirect` - Where requests for unknown links are redirected
//!   to. **Required**.
//! - `store` - The store backend type to use. See store documentation.
//!   **Default `memory`**.
//! - `store_config` - Store backend configuration. Depends on the store backend
//!   used. **Default empty**.
//! - `oidc_issuer_url` - The OpenID Connect provider's issuer URL, used for
//!   discovery. **Required**.
//! - `oidc_client_id` - The OAuth client ID registered with the provider.
//!   **Required**.
//! - `oidc_client_secret` - The OAuth client secret. **Required**.
//! - `oidc_redirect_url` - The callback URL registered with the provider,
//!   usually `https://[host]/auth/connect/callback`. **Required**.
//! - `oidc_allowed_group` - The group whose members may use the admin API.
//!   **Required**.
//! - `oidc_group_claim` - The ID token claim listing the user's groups.
//!   **Default `ldap_groups`**.
//! - `oidc_group_scope` - The extra scope requested to get the group claim.
//!   **Default `ldap`**.
//! - `oidc_state_ttl` - How long (in seconds) a login attempt stays valid.
//!   **Default `600`**.

mod global;
mod partial;

use std::{
	fmt::{Debug, Display, Formatter, Result as FmtResult},
	net::{AddrParseError, IpAddr, Ipv4Addr, Ipv6Addr},
	num::ParseIntError,
	str::FromStr,
};

use serde::{Deserialize, Serialize};
use strum::{Display as EnumDisplay, EnumString};
use tracing::Level;

pub use self::{
	global::{Config, Oidc, Redirector},
	partial::{IntoPartialError, Partial},
};

/// The error returned when a configuration option required for some part of
/// the server is not set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("the `{0}` configuration option is required but not set")]
pub struct MissingOptionError(pub &'static str);

/// The error returned by fallible conversions into [`ListenAddress`],
/// containing the invalid input value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntoListenAddressError {
	/// General listener address parse error
	#[error("\"{0}\" is not a valid listen address")]
	General(String),
	/// Parse error from the IP address
	#[error("invalid IP address for listener: {0}")]
	Address(#[from] AddrParseError),
	/// Parse error from the port number
	#[error("invalid port number for listener: {0}")]
	Port(#[from] ParseIntError),
}

/// A listener's address, with the ip address and port.
///
/// # String representation
/// A [`ListenAddress`] can be represented as a string in the format
/// `ip-address:port`.
///
/// The ip address is an IPv4 address literal (e.g. `0.0.0.0` or `127.0.0.1`),
/// an IPv6 address literal in square brackets (e.g. `[::]` or `[::1]`), or can
/// be omitted. An omitted address listens on all addresses, IPv4 and IPv6, if
/// the OS supports dual stack sockets, and on all IPv6 addresses otherwise.
///
/// An omitted port means [`ListenAddress::DEFAULT_PORT`]. Port `0` requests an
/// ephemeral port from the operating system.
#[derive(Copy, Clone, Default, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ListenAddress {
	/// The address of the listener. An unspecified (omitted) address will
	/// listen on all addresses (OS support is not universal, see
	/// [`ListenAddress`]).
	pub address: Option<IpAddr>,
	/// The TCP port that the listener will use. An unspecified port means
	/// [`ListenAddress::DEFAULT_PORT`].
	pub port: Option<u16>,
}

impl ListenAddress {
	/// The port used when none is specified
	pub const DEFAULT_PORT: u16 = 8080;

	/// The port this listener will actually use
	#[must_use]
	pub fn port_or_default(&self) -> u16 {
		self.port.unwrap_or(Self::DEFAULT_PORT)
	}
}

impl Debug for ListenAddress {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		Display::fmt(self, fmt)
	}
}

impl Display for ListenAddress {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		fmt.write_fmt(format_args!(
			"{}:{}",
			self.address.map_or(String::new(), |a| match a {
				IpAddr::V4(a) => a.to_string(),
				IpAddr::V6(a) => format!("[{a}]"),
			}),
			self.port.map_or(String::new(), |n| n.to_string())
		))
	}
}

impl PartialEq for ListenAddress {
	fn eq(&self, other: &Self) -> bool {
		self.address == other.address && self.port_or_default() == other.port_or_default()
	}
}

impl FromStr for ListenAddress {
	type Err = IntoListenAddressError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (address, port) = s
			.rsplit_once(':')
			.ok_or_else(|| IntoListenAddressError::General(s.to_string()))?;

		let address = if address.starts_with('[') && address.ends_with(']') {
			Some(Ipv6Addr::from_str(address.trim_start_matches('[').trim_end_matches(']'))?.into())
		} else if address.is_empty() {
			None
		} else {
			Some(Ipv4Addr::from_str(address)?.into())
		};

		Ok(Self {
			address,
			port: match port {
				"" => None,
				s => Some(s.parse()?),
			},
		})
	}
}

impl TryFrom<&str> for ListenAddress {
	type Error = IntoListenAddressError;

	fn try_from(s: &str) -> Result<Self, Self::Error> {
		s.parse()
	}
}

impl TryFrom<String> for ListenAddress {
	type Error = IntoListenAddressError;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		s.parse()
	}
}

impl From<ListenAddress> for String {
	fn from(address: ListenAddress) -> Self {
		address.to_string()
	}
}

/// Log level, corresponding roughly to `tracing`'s, but with the addition of
/// [`Verbose`][`LogLevel::Verbose`] between debug and info.
#[derive(
	Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, EnumDisplay,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
	/// Lowest log level. Log everything, including very verbose debug/trace
	/// info. May expose private/secret information in logs.
	Trace,
	/// Log most things, including more verbose debug info. May expose
	/// private/secret information in logs.
	Debug,
	/// Logs more verbose information (`debug`-level or higher) from mand,
	/// while only logging `info`-level or higher information from dependencies.
	/// May expose private/secret information in logs.
	Verbose,
	/// Recommended log level. Logs general information, warnings, and errors.
	#[default]
	Info,
	/// Log only warnings and errors.
	Warn,
	/// Log only critical errors.
	Error,
}

impl From<LogLevel> for Level {
	fn from(log_level: LogLevel) -> Self {
		match log_level {
			LogLevel::Trace => Level::TRACE,
			LogLevel::Debug => Level::DEBUG,
			LogLevel::Verbose | LogLevel::Info => Level::INFO,
			LogLevel::Warn => Level::WARN,
			LogLevel::Error => Level::ERROR,
		}
	}
}

impl From<Level> for LogLevel {
	fn from(log_level: Level) -> Self {
		match log_level {
			Level::TRACE => LogLevel::Trace,
			Level::DEBUG => LogLevel::Debug,
			Level::INFO => LogLevel::Info,
			Level::WARN => LogLevel::Warn,
			Level::ERROR => LogLevel::Error,
		}
	}
}

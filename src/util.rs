//! Miscellaneous statics and utilities used throughout mand.

use hyper::{
	header::{HeaderValue, CONTENT_TYPE},
	Response, StatusCode,
};
use lazy_static::lazy_static;
use serde::Serialize;
use serde_json::json;
use tracing::error;

/// Help string for server CLI
pub const SERVER_HELP: &str = r#"mand server

USAGE:
    server [FLAGS] [OPTIONS]

EXAMPLE:
    server -c ./config.toml --log-level warn

FLAGS:
 -h --help                  Print this and exit
    --example-redirect      Set an example redirect on server start ("example" -> "https://example.com/")

OPTIONS:
 -c --config      PATH      Configuration file path. Supported formats: toml (*.toml), yaml/json (*.yaml, *.yml, *.json)
    --env-file    PATH      File with environment variables to load on start [default: mand.env]
    --log-level   LEVEL     Log level [default: info, possible values: trace, debug, verbose, info, warn, error]
    --listeners   JSON      Listener addresses, e.g. '[":8080", "127.0.0.1:9000"]' [default: '[":8080"]']
    --send-server BOOL      Whether to send the Server header [default: true]
    --empty-redirect URL    Redirect destination for requests without a link name
    --not-found-redirect URL
                            Redirect destination for unknown links
    --store       STORE     Store backend type [default: memory, possible values: memory, sql]
    --store-config JSON     Store backend configuration, e.g. '{"host": "localhost", "name": "mand"}'
    --oidc-issuer-url URL   OpenID Connect issuer URL
    --oidc-client-id ID     OAuth client ID
    --oidc-client-secret SECRET
                            OAuth client secret
    --oidc-redirect-url URL OAuth callback URL, ending in /auth/connect/callback
    --oidc-allowed-group GROUP
                            Group allowed to manage links
    --oidc-group-claim CLAIM
                            ID token claim listing groups [default: ldap_groups]
    --oidc-group-scope SCOPE
                            Scope requested to get groups [default: ldap]
    --oidc-state-ttl SECONDS
                            How long a login attempt stays valid [default: 600]

All options can also be set with MAND_[OPTION] environment variables (e.g. MAND_LOG_LEVEL), or in the configuration file.
"#;

lazy_static! {
	/// A string representation of this crate's version. In debug builds, this
	/// is in the form of `[full semver crate version]+debug`. In release
	/// builds this gets shortened to `MAJOR.MINOR`.
	pub static ref VERSION: String = if cfg!(debug_assertions) {
		env!("CARGO_PKG_VERSION").to_string() + "+debug"
	} else {
		env!("CARGO_PKG_VERSION_MAJOR").to_string() + "." + env!("CARGO_PKG_VERSION_MINOR")
	};

	/// The name of the http server implemented by this crate. Used in e.g.
	/// the `Server` http header. Currently this is `mand/[version]`, where the
	/// version is `util::VERSION`.
	pub static ref SERVER_NAME: String = format!("mand/{}", &*VERSION);
}

/// Create a response with a plain text body
#[must_use]
pub fn text_response(status: StatusCode, body: impl Into<String>) -> Response<String> {
	let mut res = Response::new(body.into());
	*res.status_mut() = status;
	res.headers_mut().insert(
		CONTENT_TYPE,
		HeaderValue::from_static("text/plain; charset=UTF-8"),
	);
	res
}

/// Create a response with `value` serialized as the json body. If `value`
/// can't be serialized, a `500 Internal Server Error` is returned instead.
#[must_use]
pub fn json_response(status: StatusCode, value: &impl Serialize) -> Response<String> {
	let (status, body) = match serde_json::to_string(value) {
		Ok(body) => (status, body),
		Err(err) => {
			error!(%err, "Response serialization failed");
			(
				StatusCode::INTERNAL_SERVER_ERROR,
				r#"{"errorMessage":"Internal server error"}"#.to_string(),
			)
		}
	};

	let mut res = Response::new(body);
	*res.status_mut() = status;
	res.headers_mut()
		.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
	res
}

/// Create a json error response in the form of `{"errorMessage": "..."}`
#[must_use]
pub fn error_response(status: StatusCode, message: impl AsRef<str>) -> Response<String> {
	json_response(status, &json!({ "errorMessage": message.as_ref() }))
}

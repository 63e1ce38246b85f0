//! OpenID Connect identity provider client: discovery, authorization code
//! exchange, and ID token verification.
//!
//! # Verification
//! 1. Decode the JWT header (no verification) to get the `kid` and `alg`.
//! 2. Find the key in the provider's JWKS (cached for an hour, refreshed once
//!    when the `kid` is unknown).
//! 3. Verify the signature, `exp` (with 60 seconds of leeway), `iss` (the
//!    discovered issuer), and `aud` (the client ID).
//! 4. Read the subject and the groups from the configured group claim.

use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	time::{Duration, Instant},
};

use async_trait::async_trait;
use jsonwebtoken::{
	jwk::{AlgorithmParameters, JwkSet},
	Algorithm, DecodingKey, Header, Validation,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config;

/// How long a fetched JWKS is used before being fetched again
const JWKS_TTL: Duration = Duration::from_secs(60 * 60);

/// Timeout for all requests to the identity provider
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Allowed clock skew between the identity provider and this server
const LEEWAY: u64 = 60;

/// Error variants for identity provider failures
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
	/// JWT decoding or verification failed
	#[error("JWT verification failed: {0}")]
	Jwt(#[from] jsonwebtoken::errors::Error),
	/// The JWT header has no `kid`
	#[error("JWT missing 'kid' field in header")]
	MissingKeyId,
	/// The `kid` in the JWT header is not in the provider's JWKS
	#[error("unknown key ID: {0}")]
	UnknownKeyId(String),
	/// The token is signed with an algorithm that is not accepted
	#[error("unsupported JWT algorithm: {0:?}")]
	UnsupportedAlgorithm(Algorithm),
	/// A request to the identity provider failed
	#[error("identity provider request failed: {0}")]
	Http(#[from] reqwest::Error),
	/// A URL from the configuration or the provider is invalid
	#[error("invalid identity provider URL: {0}")]
	Url(#[from] url::ParseError),
}

/// The subset of the provider's discovery document used by mand
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderMetadata {
	/// The issuer, as it appears in the `iss` claim of ID tokens
	pub issuer: String,
	/// Where users are sent to log in
	pub authorization_endpoint: String,
	/// Where authorization codes are exchanged for tokens
	pub token_endpoint: String,
	/// Where the provider's signing keys are published
	pub jwks_uri: String,
}

/// The token endpoint's response. Only the ID token is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
	/// The ID token, if the provider issued one
	pub id_token: Option<String>,
}

/// The identity of a user, extracted from a verified ID token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
	/// The `sub` claim
	pub subject: String,
	/// The groups from the configured group claim, empty if it is missing
	pub groups: Vec<String>,
}

/// Raw ID token claims. Everything other than `sub` is kept to look up the
/// configurable group claim.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
	sub: String,
	#[serde(flatten)]
	extra: Map<String, Value>,
}

/// Something that can authenticate users via the OpenID Connect
/// authorization code flow
#[async_trait]
pub trait IdentityProvider: Debug + Send + Sync {
	/// Get the URL to send a user to for logging in, with this `state`
	fn authorization_url(&self, state: &str) -> String;

	/// Exchange an authorization code for tokens
	async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OidcError>;

	/// Verify an ID token, returning the user's identity
	async fn verify(&self, token: &str) -> Result<Claims, OidcError>;
}

/// A cached JWKS
struct CachedJwks {
	keys: JwkSet,
	fetched_at: Instant,
}

impl CachedJwks {
	fn is_stale(&self) -> bool {
		self.fetched_at.elapsed() >= JWKS_TTL
	}
}

/// An [`IdentityProvider`] talking to a real OpenID Connect provider over
/// HTTP
pub struct OidcProvider {
	http: reqwest::Client,
	metadata: ProviderMetadata,
	client_id: String,
	client_secret: String,
	redirect_url: String,
	scope: String,
	group_claim: String,
	jwks: Mutex<Option<CachedJwks>>,
}

impl OidcProvider {
	/// Discover the provider's endpoints from
	/// `<issuer>/.well-known/openid-configuration` and create a client for it.
	///
	/// # Errors
	/// Returns an error if the discovery document can not be fetched or
	/// parsed.
	#[instrument(level = "debug", skip(config), fields(issuer = %config.issuer_url), err)]
	pub async fn discover(config: &config::Oidc) -> Result<Self, OidcError> {
		let http = http_client()?;
		let discovery_url = format!(
			"{}/.well-known/openid-configuration",
			config.issuer_url.trim_end_matches('/')
		);

		debug!("Fetching provider metadata from {discovery_url}");
		let metadata = http
			.get(discovery_url)
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;

		Ok(Self::with_metadata(http, metadata, config))
	}

	/// Create a client for a provider with already known endpoints
	///
	/// # Errors
	/// Returns an error if the HTTP client can not be created.
	pub fn new(metadata: ProviderMetadata, config: &config::Oidc) -> Result<Self, OidcError> {
		Ok(Self::with_metadata(http_client()?, metadata, config))
	}

	fn with_metadata(
		http: reqwest::Client,
		metadata: ProviderMetadata,
		config: &config::Oidc,
	) -> Self {
		Self {
			http,
			metadata,
			client_id: config.client_id.clone(),
			client_secret: config.client_secret.clone(),
			redirect_url: config.redirect_url.clone(),
			scope: format!("openid {}", config.group_scope),
			group_claim: config.group_claim.clone(),
			jwks: Mutex::new(None),
		}
	}

	/// Get the provider's discovered endpoints
	#[must_use]
	pub const fn metadata(&self) -> &ProviderMetadata {
		&self.metadata
	}

	/// Get the JWKS, from the cache if it is fresh and `force_refresh` is not
	/// set
	async fn jwks(&self, force_refresh: bool) -> Result<JwkSet, OidcError> {
		if !force_refresh {
			if let Some(cached) = &*self.jwks.lock() {
				if !cached.is_stale() {
					return Ok(cached.keys.clone());
				}
			}
		}

		debug!("Fetching JWKS from {}", self.metadata.jwks_uri);
		let keys: JwkSet = self
			.http
			.get(&self.metadata.jwks_uri)
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;

		*self.jwks.lock() = Some(CachedJwks {
			keys: keys.clone(),
			fetched_at: Instant::now(),
		});

		Ok(keys)
	}

	/// Find a decoding key by `kid`, refreshing the JWKS once if it is not
	/// found
	async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, OidcError> {
		if let Some(key) = find_key_in_jwks(&self.jwks(false).await?, kid) {
			return Ok(key);
		}

		debug!(%kid, "Key not found in cached JWKS, refreshing");
		find_key_in_jwks(&self.jwks(true).await?, kid)
			.ok_or_else(|| OidcError::UnknownKeyId(kid.to_string()))
	}

	#[cfg(test)]
	fn seed_jwks(&self, keys: JwkSet) {
		*self.jwks.lock() = Some(CachedJwks {
			keys,
			fetched_at: Instant::now(),
		});
	}
}

#[async_trait]
impl IdentityProvider for OidcProvider {
	fn authorization_url(&self, state: &str) -> String {
		match Url::parse(&self.metadata.authorization_endpoint) {
			Ok(mut url) => {
				url.query_pairs_mut()
					.append_pair("response_type", "code")
					.append_pair("client_id", &self.client_id)
					.append_pair("redirect_uri", &self.redirect_url)
					.append_pair("scope", &self.scope)
					.append_pair("state", state);
				url.into()
			}
			Err(err) => {
				warn!(%err, "Invalid authorization endpoint");
				self.metadata.authorization_endpoint.clone()
			}
		}
	}

	#[instrument(level = "debug", skip_all, err)]
	async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OidcError> {
		let form = [
			("grant_type", "authorization_code"),
			("code", code),
			("redirect_uri", &self.redirect_url),
			("client_id", &self.client_id),
			("client_secret", &self.client_secret),
		];

		Ok(self
			.http
			.post(&self.metadata.token_endpoint)
			.form(&form)
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?)
	}

	#[instrument(level = "debug", skip_all, err)]
	async fn verify(&self, token: &str) -> Result<Claims, OidcError> {
		let header = jsonwebtoken::decode_header(token)?;
		let kid = header.kid.as_deref().ok_or(OidcError::MissingKeyId)?;
		let key = self.decoding_key(kid).await?;

		let mut validation = build_validation(&header)?;
		validation.set_issuer(&[&self.metadata.issuer]);
		validation.set_audience(&[&self.client_id]);

		let claims = jsonwebtoken::decode::<IdTokenClaims>(token, &key, &validation)?.claims;

		Ok(Claims {
			groups: groups(claims.extra.get(&self.group_claim)),
			subject: claims.sub,
		})
	}
}

impl Debug for OidcProvider {
	fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
		fmt.debug_struct("OidcProvider")
			.field("metadata", &self.metadata)
			.field("client_id", &self.client_id)
			.field("redirect_url", &self.redirect_url)
			.field("scope", &self.scope)
			.field("group_claim", &self.group_claim)
			.finish_non_exhaustive()
	}
}

fn http_client() -> Result<reqwest::Client, OidcError> {
	Ok(reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

/// Read groups from a group claim, which may be a list of strings or a single
/// string
fn groups(claim: Option<&Value>) -> Vec<String> {
	match claim {
		Some(Value::Array(groups)) => groups
			.iter()
			.filter_map(Value::as_str)
			.map(ToString::to_string)
			.collect(),
		Some(Value::String(group)) => vec![group.clone()],
		_ => Vec::new(),
	}
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
	let jwk = jwks
		.keys
		.iter()
		.find(|jwk| jwk.common.key_id.as_deref() == Some(kid))?;

	match &jwk.algorithm {
		AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
		AlgorithmParameters::EllipticCurve(ec) => {
			DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
		}
		_ => None,
	}
}

/// Build a [`Validation`] for the JWT header's algorithm, which must be one
/// of RS256, RS384, RS512, ES256, or ES384
fn build_validation(header: &Header) -> Result<Validation, OidcError> {
	match header.alg {
		alg @ (Algorithm::RS256
		| Algorithm::RS384
		| Algorithm::RS512
		| Algorithm::ES256
		| Algorithm::ES384) => {
			let mut validation = Validation::new(alg);
			validation.leeway = LEEWAY;
			Ok(validation)
		}
		alg => Err(OidcError::UnsupportedAlgorithm(alg)),
	}
}

//! Authentication of admin API users via OpenID Connect.
//!
//! Users log in at `/auth/connect/login`, which sends them to the identity
//! provider with a random single-use `state`. The provider sends them back to
//! `/auth/connect/callback` with an authorization code, which is exchanged
//! for an ID token. If that token is valid and the user is a member of the
//! allowed group, the token is returned to the user, who then sends it as a
//! bearer token with every admin API request.

mod oidc;
mod state;

use std::{collections::HashMap, sync::Arc};

use hyper::{header::LOCATION, Response, StatusCode};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use url::form_urlencoded;

pub use self::{
	oidc::{Claims, IdentityProvider, OidcError, OidcProvider, ProviderMetadata, TokenResponse},
	state::PendingStates,
};
use crate::{
	config,
	util::{error_response, json_response, text_response},
};

/// The error returned when authentication or authorization fails
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
	/// The `state` of a callback is missing, unknown, expired, or was already
	/// used
	#[error("invalid or expired login state")]
	InvalidState,
	/// A callback has no authorization code
	#[error("missing authorization code")]
	MissingCode,
	/// The authorization code could not be exchanged for tokens
	#[error("unable to exchange authorization code: {0}")]
	Exchange(#[source] OidcError),
	/// The identity provider did not return an ID token
	#[error("no id_token in token response")]
	MissingIdToken,
	/// The `Authorization` header is missing or not a bearer token
	#[error("Incorrect authorization header")]
	InvalidHeader,
	/// The ID token could not be verified
	#[error("unable to verify id_token: {0}")]
	InvalidToken(#[source] OidcError),
	/// The user is not a member of the allowed group
	#[error("user {0} is not a member of the allowed group")]
	NotInGroup(String),
}

impl AuthError {
	/// The HTTP status code for this error
	#[must_use]
	pub const fn status(&self) -> StatusCode {
		match self {
			Self::MissingCode => StatusCode::BAD_REQUEST,
			Self::Exchange(_) | Self::MissingIdToken => StatusCode::INTERNAL_SERVER_ERROR,
			Self::InvalidState | Self::InvalidHeader | Self::InvalidToken(_) | Self::NotInGroup(_) => {
				StatusCode::UNAUTHORIZED
			}
		}
	}

	/// The message shown to the user for this error
	#[must_use]
	pub fn message(&self) -> String {
		match self {
			Self::InvalidHeader => self.to_string(),
			Self::InvalidToken(_) => "Missing authentication".to_string(),
			Self::NotInGroup(_) => "Access denied, not a member of the allowed group".to_string(),
			Self::InvalidState | Self::MissingCode => format!("Login failed: {self}"),
			Self::Exchange(_) | Self::MissingIdToken => "Login failed".to_string(),
		}
	}

	/// Convert this error into a json error response
	#[must_use]
	pub fn into_response(self) -> Response<String> {
		error_response(self.status(), self.message())
	}
}

/// The authentication gateway, holding the identity provider and the pending
/// login attempts
#[derive(Debug)]
pub struct Auth {
	provider: Arc<dyn IdentityProvider>,
	states: PendingStates,
	allowed_group: String,
}

impl Auth {
	/// Create a new [`Auth`] using `provider` to authenticate users, which
	/// must be members of `allowed_group`
	#[must_use]
	pub fn new(
		provider: Arc<dyn IdentityProvider>,
		states: PendingStates,
		allowed_group: impl Into<String>,
	) -> Self {
		Self {
			provider,
			states,
			allowed_group: allowed_group.into(),
		}
	}

	/// Discover the configured OpenID Connect provider and create a new
	/// [`Auth`] for it
	///
	/// # Errors
	/// Returns an error if provider discovery fails.
	pub async fn from_config(config: &config::Oidc) -> Result<Self, OidcError> {
		let provider = OidcProvider::discover(config).await?;
		info!(issuer = %provider.metadata().issuer, "OpenID Connect provider discovered");

		Ok(Self::new(
			Arc::new(provider),
			PendingStates::new(config.state_ttl, PendingStates::DEFAULT_CAPACITY),
			config.allowed_group.clone(),
		))
	}

	/// Start a login, returning the URL to send the user to
	#[must_use]
	pub fn login(&self) -> String {
		let state = self.states.generate();
		self.provider.authorization_url(&state)
	}

	/// Finish a login, returning the user's ID token
	///
	/// # Errors
	/// Returns an error if the `state` is not valid, the `code` is missing or
	/// can not be exchanged, or the resulting ID token is not valid or
	/// belongs to a user not in the allowed group.
	#[instrument(level = "debug", skip_all, err)]
	pub async fn callback(
		&self,
		code: Option<&str>,
		state: Option<&str>,
	) -> Result<String, AuthError> {
		if !state.is_some_and(|state| self.states.consume(state)) {
			return Err(AuthError::InvalidState);
		}

		let code = code.filter(|c| !c.is_empty()).ok_or(AuthError::MissingCode)?;

		let token = self
			.provider
			.exchange_code(code)
			.await
			.map_err(AuthError::Exchange)?
			.id_token
			.ok_or(AuthError::MissingIdToken)?;

		self.check(&token).await?;

		Ok(token)
	}

	/// Check the `Authorization` header of an admin API request, which must
	/// be in the form of `Bearer <id token>`
	///
	/// # Errors
	/// Returns an error if the header is missing or malformed, or the token
	/// is not valid or belongs to a user not in the allowed group.
	pub async fn authorize(&self, header: Option<&str>) -> Result<Claims, AuthError> {
		let header = header.unwrap_or_default();

		match header.split(' ').collect::<Vec<_>>()[..] {
			["Bearer", token] => self.check(token).await,
			_ => {
				debug!("Wrong authorization header, was {header:?}");
				Err(AuthError::InvalidHeader)
			}
		}
	}

	/// Verify an ID token and check the user's groups
	async fn check(&self, token: &str) -> Result<Claims, AuthError> {
		let claims = self
			.provider
			.verify(token)
			.await
			.map_err(AuthError::InvalidToken)?;

		if claims.groups.iter().any(|g| g == &self.allowed_group) {
			Ok(claims)
		} else {
			Err(AuthError::NotInGroup(claims.subject))
		}
	}

	/// Handle a request to `/auth/connect/login`
	#[must_use]
	pub fn login_response(&self) -> Response<String> {
		let url = self.login();
		let mut res = text_response(StatusCode::FOUND, "");

		match url.parse() {
			Ok(location) => {
				res.headers_mut().insert(LOCATION, location);
				res
			}
			Err(err) => {
				error!(%err, "Authorization URL is not a valid header value");
				error_response(StatusCode::INTERNAL_SERVER_ERROR, "Login failed")
			}
		}
	}

	/// Handle a request to `/auth/connect/callback` with this query string
	pub async fn callback_response(&self, query: Option<&str>) -> Response<String> {
		let params = form_urlencoded::parse(query.unwrap_or_default().as_bytes())
			.into_owned()
			.collect::<HashMap<_, _>>();

		match self
			.callback(
				params.get("code").map(String::as_str),
				params.get("state").map(String::as_str),
			)
			.await
		{
			Ok(token) => json_response(StatusCode::OK, &json!({ "token": token })),
			Err(err) => {
				warn!(%err, "Login failed");
				err.into_response()
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;

	use super::*;

	/// An identity provider accepting tokens in the form of
	/// `valid:<subject>:<group>,<group>`, issued for the code `good-code`
	#[derive(Debug)]
	struct FakeProvider;

	#[async_trait]
	impl IdentityProvider for FakeProvider {
		fn authorization_url(&self, state: &str) -> String {
			format!("https://id.example.com/authorize?state={state}")
		}

		async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OidcError> {
			match code {
				"good-code" => Ok(TokenResponse {
					id_token: Some("valid:alice:admins".to_string()),
				}),
				"outsider-code" => Ok(TokenResponse {
					id_token: Some("valid:mallory:staff".to_string()),
				}),
				"no-token-code" => Ok(TokenResponse { id_token: None }),
				_ => Err(OidcError::MissingKeyId),
			}
		}

		async fn verify(&self, token: &str) -> Result<Claims, OidcError> {
			match token.split(':').collect::<Vec<_>>()[..] {
				["valid", subject, groups] => Ok(Claims {
					subject: subject.to_string(),
					groups: groups.split(',').map(ToString::to_string).collect(),
				}),
				_ => Err(OidcError::MissingKeyId),
			}
		}
	}

	fn auth() -> Auth {
		Auth::new(Arc::new(FakeProvider), PendingStates::default(), "admins")
	}

	fn state_of(url: &str) -> String {
		url.split_once("state=").unwrap().1.to_string()
	}

	#[tokio::test]
	async fn login_callback() {
		let auth = auth();
		let state = state_of(&auth.login());

		assert_eq!(
			auth.callback(Some("good-code"), Some(&state)).await.unwrap(),
			"valid:alice:admins"
		);
	}

	#[tokio::test]
	async fn callback_state_is_single_use() {
		let auth = auth();
		let state = state_of(&auth.login());

		auth.callback(Some("good-code"), Some(&state)).await.unwrap();
		let err = auth
			.callback(Some("good-code"), Some(&state))
			.await
			.unwrap_err();

		assert!(matches!(err, AuthError::InvalidState));
		assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn callback_errors() {
		let auth = auth();

		for (code, state, status) in [
			(Some("good-code"), None, StatusCode::UNAUTHORIZED),
			(Some("good-code"), Some("forged"), StatusCode::UNAUTHORIZED),
			(None, Some("login"), StatusCode::BAD_REQUEST),
			(Some("bad-code"), Some("login"), StatusCode::INTERNAL_SERVER_ERROR),
			(Some("no-token-code"), Some("login"), StatusCode::INTERNAL_SERVER_ERROR),
			(Some("outsider-code"), Some("login"), StatusCode::UNAUTHORIZED),
		] {
			// "login" stands for a fresh valid state
			let state = state.map(|s| {
				if s == "login" {
					state_of(&auth.login())
				} else {
					s.to_string()
				}
			});

			let err = auth.callback(code, state.as_deref()).await.unwrap_err();
			assert_eq!(err.status(), status, "{code:?}: {err}");
		}
	}

	#[tokio::test]
	async fn authorize() {
		let auth = auth();

		assert_eq!(
			auth.authorize(Some("Bearer valid:alice:staff,admins"))
				.await
				.unwrap()
				.subject,
			"alice"
		);

		for header in [
			None,
			Some(""),
			Some("valid:alice:admins"),
			Some("bearer valid:alice:admins"),
			Some("Bearer  valid:alice:admins"),
			Some("Bearer valid:alice:admins extra"),
		] {
			assert!(matches!(
				auth.authorize(header).await,
				Err(AuthError::InvalidHeader)
			));
		}

		assert!(matches!(
			auth.authorize(Some("Bearer invalid")).await,
			Err(AuthError::InvalidToken(_))
		));
		assert!(matches!(
			auth.authorize(Some("Bearer valid:mallory:staff")).await,
			Err(AuthError::NotInGroup(subject)) if subject == "mallory"
		));
	}

	#[tokio::test]
	async fn responses() {
		let auth = auth();

		let login = auth.login_response();
		assert_eq!(login.status(), StatusCode::FOUND);
		let location = login.headers()[LOCATION].to_str().unwrap();
		assert!(location.starts_with("https://id.example.com/authorize?state="));

		let query = format!("code=good-code&state={}", state_of(location));
		let callback = auth.callback_response(Some(&query)).await;
		assert_eq!(callback.status(), StatusCode::OK);
		assert_eq!(callback.body(), r#"{"token":"valid:alice:admins"}"#);

		let replay = auth.callback_response(Some(&query)).await;
		assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
		assert!(replay.body().contains("errorMessage"));
	}
}

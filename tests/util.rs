//! Utilities for end-to-end tests of the mand server

#![allow(dead_code)] // Not every test uses every utility

use std::{
	collections::HashMap,
	convert::Infallible,
	process::Command,
	sync::Arc,
	time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
	body::Incoming, header::AUTHORIZATION, server::conn::http1, service::service_fn, Request,
	Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use mand::{
	auth::{Auth, Claims, IdentityProvider, OidcError, PendingStates, TokenResponse},
	config::{Oidc, Redirector},
	server::{handle, App},
	normalized::{Name, Redirect},
	store::{BackendType, Link, Selector, Store, StoreBackend, StoreError},
};
use serde_json::{json, Value};
use tokio::{net::TcpListener, task::JoinHandle};
use url::form_urlencoded;

/// The group allowed to use the admin API in tests
pub const ALLOWED_GROUP: &str = "mand-admins";
/// Destination for requests without a link name
pub const EMPTY_REDIRECT: &str = "https://example.com/";
/// Destination for unknown links
pub const NOT_FOUND_REDIRECT: &str = "https://example.com/404";

const KEY: &[u8] = include_bytes!("fixtures/oidc-test-key.pem");
const JWKS: &str = include_str!("fixtures/oidc-test-jwks.json");

/// Run a function automatically on drop.
#[must_use]
pub struct Terminator<F: FnMut()>(F);

impl<F: FnMut()> Terminator<F> {
	pub fn new(f: F) -> Self {
		Self(f)
	}

	pub fn call(&mut self) {
		self.0();
	}
}

impl<F: FnMut()> Drop for Terminator<F> {
	fn drop(&mut self) {
		self.call();
	}
}

/// Start the mand server binary in the background with the specified
/// command-line arguments. To kill the server process call or drop the
/// returned function. Panics on any error.
pub fn start_server_with_args(args: Vec<String>) -> Terminator<impl FnMut()> {
	let mut cmd = Command::new(env!("CARGO_BIN_EXE_server"));
	cmd.args(args);

	let mut server = cmd.spawn().unwrap();

	Terminator::new(move || {
		server.kill().ok();
		server.wait().ok();
	})
}

/// Wait until the mand server at `base` is healthy, panicking after a few
/// seconds
pub async fn wait_for_server(base: &str) {
	let client = reqwest::Client::new();

	for _ in 0..100 {
		if let Ok(res) = client.get(format!("{base}/healthz")).send().await {
			if res.status() == StatusCode::OK {
				return;
			}
		}

		tokio::time::sleep(Duration::from_millis(100)).await;
	}

	panic!("server at {base} did not start");
}

/// An identity provider accepting tokens in the form of
/// `valid:<subject>:<group>,<group>`. The code `good-code` is exchanged for a
/// token of a member of the allowed group, `outsider-code` for a token of
/// someone who isn't.
#[derive(Debug)]
pub struct FakeProvider;

#[async_trait]
impl IdentityProvider for FakeProvider {
	fn authorization_url(&self, state: &str) -> String {
		format!("https://id.example.com/authorize?state={state}")
	}

	async fn exchange_code(&self, code: &str) -> Result<TokenResponse, OidcError> {
		match code {
			"good-code" => Ok(TokenResponse {
				id_token: Some(format!("valid:alice:{ALLOWED_GROUP}")),
			}),
			"outsider-code" => Ok(TokenResponse {
				id_token: Some("valid:mallory:staff".to_string()),
			}),
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

/// A bearer token accepted by [`FakeProvider`] for a member of the allowed
/// group
pub fn admin_token() -> String {
	format!("valid:alice:staff,{ALLOWED_GROUP}")
}

/// A bearer token accepted by [`FakeProvider`] for someone not in the allowed
/// group
pub fn outsider_token() -> String {
	"valid:mallory:staff".to_string()
}

pub fn redirector() -> Redirector {
	Redirector {
		send_server: true,
		empty_redirect: EMPTY_REDIRECT.to_string(),
		not_found_redirect: NOT_FOUND_REDIRECT.to_string(),
	}
}

/// Create a new in-memory store
pub async fn store() -> Store {
	Store::new(BackendType::Memory, &HashMap::new()).await.unwrap()
}

/// A store backend where every operation fails, like a database that went
/// away
#[derive(Debug)]
pub struct BrokenStore;

impl BrokenStore {
	fn error() -> StoreError {
		StoreError::Backend(anyhow!("connection refused"))
	}
}

#[async_trait]
impl StoreBackend for BrokenStore {
	fn store_type() -> BackendType {
		BackendType::Memory
	}

	fn get_store_type(&self) -> BackendType {
		BackendType::Memory
	}

	async fn new(_config: &HashMap<String, String>) -> anyhow::Result<Self> {
		Ok(Self)
	}

	async fn get(&self, _name: Name) -> Result<Option<Link>, StoreError> {
		Err(Self::error())
	}

	async fn list(&self, _search: Option<String>) -> Result<Vec<Link>, StoreError> {
		Err(Self::error())
	}

	async fn create(&self, _name: Name, _redirect: Redirect) -> Result<Link, StoreError> {
		Err(Self::error())
	}

	async fn update(&self, _name: Name, _redirect: Redirect) -> Result<Option<Link>, StoreError> {
		Err(Self::error())
	}

	async fn delete(&self, _selector: Selector) -> Result<Option<Link>, StoreError> {
		Err(Self::error())
	}

	async fn incr_visits(&self, _name: Name) -> Result<Option<u64>, StoreError> {
		Err(Self::error())
	}

	async fn ping(&self) -> Result<(), StoreError> {
		Err(Self::error())
	}
}

fn fake_auth() -> Arc<Auth> {
	Arc::new(Auth::new(
		Arc::new(FakeProvider),
		PendingStates::default(),
		ALLOWED_GROUP,
	))
}

/// Create an [`App`] with an empty in-memory store and [`FakeProvider`]
pub async fn fake_app() -> App {
	App::new(store().await, fake_auth(), redirector())
}

/// Create an [`App`] with a [`BrokenStore`] and [`FakeProvider`]
pub fn broken_app() -> App {
	App::new(Store::from_backend(BrokenStore), fake_auth(), redirector())
}

/// Send a request through the full request router
pub async fn send(
	app: &App,
	method: &str,
	uri: &str,
	token: Option<&str>,
	body: &str,
) -> Response<String> {
	let mut req = Request::builder().method(method).uri(uri);

	if let Some(token) = token {
		req = req.header(AUTHORIZATION, format!("Bearer {token}"));
	}

	let req = req
		.body(Full::new(Bytes::from(body.to_string())))
		.unwrap();

	handle(app, req).await.unwrap()
}

/// Parse a json response body
pub fn json_body(res: &Response<String>) -> Value {
	serde_json::from_str(res.body()).unwrap()
}

/// Get the `state` parameter of an authorization URL
pub fn state_of(location: &str) -> String {
	let url = url::Url::parse(location).unwrap();
	url.query_pairs()
		.find(|(k, _)| k == "state")
		.map(|(_, v)| v.into_owned())
		.unwrap()
}

fn now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap()
		.as_secs()
}

/// Sign an ID token for `subject` in `groups`, issued by `issuer` for the
/// `mand` client
pub fn sign_token(issuer: &str, subject: &str, groups: &[&str]) -> String {
	let mut header = Header::new(Algorithm::RS256);
	header.kid = Some("test-key-1".to_string());

	let claims = json!({
		"iss": issuer,
		"aud": "mand",
		"sub": subject,
		"exp": now() + 300,
		"iat": now(),
		"ldap_groups": groups,
	});

	jsonwebtoken::encode(&header, &claims, &EncodingKey::from_rsa_pem(KEY).unwrap()).unwrap()
}

/// OpenID Connect configuration for the `mand` client at the provider
/// `issuer`, with callbacks going to `callback_base`
pub fn oidc_config(issuer: &str, callback_base: &str) -> Oidc {
	Oidc {
		issuer_url: issuer.to_string(),
		client_id: "mand".to_string(),
		client_secret: "secret".to_string(),
		redirect_url: format!("{callback_base}/auth/connect/callback"),
		allowed_group: ALLOWED_GROUP.to_string(),
		group_claim: Oidc::DEFAULT_GROUP_CLAIM.to_string(),
		group_scope: Oidc::DEFAULT_GROUP_SCOPE.to_string(),
		state_ttl: Oidc::DEFAULT_STATE_TTL,
	}
}

/// Start a minimal OpenID Connect provider on a random local port, returning
/// its issuer URL. The provider exchanges the codes `good-code` and
/// `outsider-code` (see [`FakeProvider`]) for signed ID tokens, and rejects
/// everything else.
pub async fn start_idp() -> (String, JoinHandle<()>) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let issuer = format!("http://{}", listener.local_addr().unwrap());
	let base = issuer.clone();

	let handle = tokio::spawn(async move {
		loop {
			let Ok((stream, _)) = listener.accept().await else {
				continue;
			};
			let base = base.clone();

			tokio::spawn(async move {
				let service = service_fn(move |req| idp(req, base.clone()));
				http1::Builder::new()
					.serve_connection(TokioIo::new(stream), service)
					.await
					.ok();
			});
		}
	});

	(issuer, handle)
}

async fn idp(req: Request<Incoming>, issuer: String) -> Result<Response<String>, Infallible> {
	let json = |status: StatusCode, body: String| {
		Ok(Response::builder()
			.status(status)
			.header("Content-Type", "application/json")
			.body(body)
			.unwrap())
	};

	match (req.method().as_str(), req.uri().path()) {
		("GET", "/.well-known/openid-configuration") => json(
			StatusCode::OK,
			json!({
				"issuer": issuer,
				"authorization_endpoint": format!("{issuer}/authorize"),
				"token_endpoint": format!("{issuer}/token"),
				"jwks_uri": format!("{issuer}/jwks"),
			})
			.to_string(),
		),
		("GET", "/jwks") => json(StatusCode::OK, JWKS.to_string()),
		("POST", "/token") => {
			let body = req.into_body().collect().await.unwrap().to_bytes();
			let form = form_urlencoded::parse(&body)
				.into_owned()
				.collect::<HashMap<_, _>>();

			if form.get("client_secret").map(String::as_str) != Some("secret") {
				return json(
					StatusCode::UNAUTHORIZED,
					json!({ "error": "invalid_client" }).to_string(),
				);
			}

			let (subject, groups) = match form.get("code").map(String::as_str) {
				Some("good-code") => ("alice", vec!["staff", ALLOWED_GROUP]),
				Some("outsider-code") => ("mallory", vec!["staff"]),
				_ => {
					return json(
						StatusCode::BAD_REQUEST,
						json!({ "error": "invalid_grant" }).to_string(),
					)
				}
			};

			json(
				StatusCode::OK,
				json!({
					"access_token": "opaque",
					"token_type": "Bearer",
					"id_token": sign_token(&issuer, subject, &groups),
				})
				.to_string(),
			)
		}
		_ => json(StatusCode::NOT_FOUND, "{}".to_string()),
	}
}

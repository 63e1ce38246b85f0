//! The admin API, used to manage links. All API requests must be
//! authenticated with a bearer token (see [`auth`][crate::auth]).
//!
//! | Method   | Path           | Body                   | Response                |
//! |----------|----------------|------------------------|-------------------------|
//! | `GET`    | `/link`        |                        | all links (`?search=`)  |
//! | `POST`   | `/link`        | `{"name", "redirect"}` | the created link        |
//! | `GET`    | `/link/<name>` |                        | the link                |
//! | `PATCH`  | `/link/<name>` | `{"redirect"}`         | the updated link        |
//! | `DELETE` | `/link/<name>` |                        | the deleted link        |
//!
//! Errors are returned as `{"errorMessage": "..."}`.

use std::error::Error;

use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::{
	body::Body,
	header::{HeaderValue, AUTHORIZATION},
	Method, Request, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize};
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use url::form_urlencoded;

use crate::{
	auth::Auth,
	normalized::{Name, Redirect},
	store::{Selector, Store, StoreError},
	util::{error_response, json_response},
};

/// Maximum size of a request body in bytes
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Body of a link creation request
#[derive(Debug, Deserialize)]
struct CreateLink {
	name: String,
	redirect: String,
}

/// Body of a link update request
#[derive(Debug, Deserialize)]
struct UpdateLink {
	redirect: String,
}

/// Get the search term from a query string, from either the `search` or the
/// `Search` parameter
fn search_term(query: Option<&str>) -> Option<String> {
	form_urlencoded::parse(query.unwrap_or_default().as_bytes())
		.find(|(key, _)| key == "search" || key == "Search")
		.map(|(_, value)| value.into_owned())
}

/// Map a store error to an error response
fn store_error(err: &StoreError, action: &str) -> Response<String> {
	match err {
		StoreError::AlreadyExists(_) => {
			error_response(StatusCode::CONFLICT, format!("Unable to {action} link: {err}"))
		}
		StoreError::Backend(_) => {
			error!(%err, "Unable to {action} link");
			error_response(
				StatusCode::INTERNAL_SERVER_ERROR,
				format!("Unable to {action} link"),
			)
		}
	}
}

fn not_found(name: &str) -> Response<String> {
	error_response(
		StatusCode::NOT_FOUND,
		format!("link with name={name} does not exist"),
	)
}

fn method_not_allowed(allow: &'static str) -> Response<String> {
	let mut res = error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
	res.headers_mut()
		.insert("Allow", HeaderValue::from_static(allow));
	res
}

/// Read a json request body
async fn read_json<B, T>(body: B) -> Result<T, Response<String>>
where
	B: Body<Data = Bytes> + Send,
	B::Error: Into<Box<dyn Error + Send + Sync>>,
	T: DeserializeOwned,
{
	let bytes = Limited::new(body, MAX_BODY_SIZE)
		.collect()
		.await
		.map_err(|err| {
			error_response(
				StatusCode::BAD_REQUEST,
				format!("unable to read request, error {err}"),
			)
		})?
		.to_bytes();

	serde_json::from_slice(&bytes).map_err(|err| {
		error_response(
			StatusCode::BAD_REQUEST,
			format!("unable to parse request, error {err}"),
		)
	})
}

/// Handle an admin API request to `/link` or `/link/<name>`. The request is
/// authorized before anything else is done.
#[instrument(level = "info", name = "api-request", skip_all, fields(http.path = ?req.uri().path(), http.method = %req.method(), store = %store.backend_name()))]
pub async fn api<B>(req: Request<B>, store: &Store, auth: &Auth) -> Response<String>
where
	B: Body<Data = Bytes> + Send,
	B::Error: Into<Box<dyn Error + Send + Sync>>,
{
	let api_start = Instant::now();
	let method = req.method().clone();
	let path = req.uri().path().to_string();

	let header = req
		.headers()
		.get(AUTHORIZATION)
		.and_then(|h| h.to_str().ok());
	let authorized = auth.authorize(header).await;

	let (user, res) = match authorized {
		Ok(claims) => (Some(claims.subject), route(req, store).await),
		Err(err) => {
			warn!(%err, "Unauthorized API request");
			(None, err.into_response())
		}
	};

	let api_time = api_start.elapsed();

	info!(
		time_ns = %api_time.as_nanos(),
		user = %user.as_deref().unwrap_or("[none]"),
		%method,
		%path,
		status_code = %res.status(),
		"api request processed in {:.6} seconds",
		api_time.as_secs_f64()
	);

	res
}

/// Route an authorized API request
async fn route<B>(req: Request<B>, store: &Store) -> Response<String>
where
	B: Body<Data = Bytes> + Send,
	B::Error: Into<Box<dyn Error + Send + Sync>>,
{
	let path = req.uri().path();
	let rest = path
		.strip_prefix("/link")
		.map_or("", |rest| rest.trim_start_matches('/'));

	if rest.is_empty() {
		match *req.method() {
			Method::GET => list(store, search_term(req.uri().query()).as_deref()).await,
			Method::POST => create(store, req.into_body()).await,
			_ => method_not_allowed("GET, POST"),
		}
	} else {
		let rest = rest.to_string();

		match *req.method() {
			Method::GET => get(store, &rest).await,
			Method::PATCH => update(store, &rest, req.into_body()).await,
			Method::DELETE => delete(store, &rest).await,
			_ => method_not_allowed("GET, PATCH, DELETE"),
		}
	}
}

async fn list(store: &Store, search: Option<&str>) -> Response<String> {
	match store.list(search).await {
		Ok(links) => json_response(StatusCode::OK, &links),
		Err(err) => {
			error!(%err, "Unable to retrieve links");
			error_response(StatusCode::INTERNAL_SERVER_ERROR, "Unable to retrieve links")
		}
	}
}

async fn get(store: &Store, name: &str) -> Response<String> {
	let Ok(name) = Name::new(name) else {
		return not_found(name);
	};

	match store.get(name.clone()).await {
		Ok(Some(link)) => json_response(StatusCode::OK, &link),
		Ok(None) => not_found(name.as_str()),
		Err(err) => {
			error!(%err, %name, "Unable to retrieve link");
			error_response(StatusCode::INTERNAL_SERVER_ERROR, "Unable to retrieve link")
		}
	}
}

async fn create<B>(store: &Store, body: B) -> Response<String>
where
	B: Body<Data = Bytes> + Send,
	B::Error: Into<Box<dyn Error + Send + Sync>>,
{
	let body: CreateLink = match read_json(body).await {
		Ok(body) => body,
		Err(res) => return res,
	};

	let name = match Name::new(&body.name) {
		Ok(name) => name,
		Err(err) => {
			return error_response(
				StatusCode::BAD_REQUEST,
				format!("unable to parse request, error {err}"),
			)
		}
	};

	let redirect = match Redirect::new(&body.redirect) {
		Ok(redirect) => redirect,
		Err(err) => {
			return error_response(
				StatusCode::BAD_REQUEST,
				format!("unable to parse request, error {err}"),
			)
		}
	};

	match store.create(name, redirect).await {
		Ok(link) => json_response(StatusCode::OK, &link),
		Err(err) => store_error(&err, "create"),
	}
}

async fn update<B>(store: &Store, name: &str, body: B) -> Response<String>
where
	B: Body<Data = Bytes> + Send,
	B::Error: Into<Box<dyn Error + Send + Sync>>,
{
	let body: UpdateLink = match read_json(body).await {
		Ok(body) => body,
		Err(res) => return res,
	};

	let Ok(name) = Name::new(name) else {
		return not_found(name);
	};

	let redirect = match Redirect::new(&body.redirect) {
		Ok(redirect) => redirect,
		Err(err) => {
			return error_response(
				StatusCode::BAD_REQUEST,
				format!("unable to parse request, error {err}"),
			)
		}
	};

	match store.update(name.clone(), redirect).await {
		Ok(Some(link)) => json_response(StatusCode::OK, &link),
		Ok(None) => not_found(name.as_str()),
		Err(err) => store_error(&err, "update"),
	}
}

async fn delete(store: &Store, name: &str) -> Response<String> {
	let Ok(name) = Name::new(name) else {
		return not_found(name);
	};

	match store.delete(Selector::Name(name.clone())).await {
		Ok(Some(link)) => json_response(StatusCode::OK, &link),
		Ok(None) => not_found(name.as_str()),
		Err(err) => store_error(&err, "delete"),
	}
}

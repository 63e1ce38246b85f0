//! The main part of mand. This module contains code relating to actually
//! redirecting requests.

use hyper::{Request, Response, StatusCode};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, trace};

use crate::{config::Redirector, normalized::Name, store::Store, util::SERVER_NAME};

/// Get the link name from a request path, which is the first path segment
fn link_name(path: &str) -> &str {
	let path = path.strip_prefix('/').unwrap_or(path);
	path.split('/').next().unwrap_or_default()
}

/// Redirects the `req`uest to the appropriate target URL, if one is found in
/// the `store`, or to one of the configured fallback destinations otherwise.
/// Redirects always use the `302 Found` status code. A store error results in
/// a `500 Internal Server Error` without any redirect.
///
/// # Errors
/// Returns an error if the response can not be built, e.g. because the
/// destination is not a valid header value.
#[instrument(level = "trace", name = "request-details", skip_all, fields(headers = ?req.headers()))]
#[instrument(level = "info", name = "request", skip_all, fields(http.version = ?req.version(), http.path = ?req.uri().path(), http.method = %req.method(), store = %store.backend_name()))]
pub async fn redirector<B>(
	req: Request<B>,
	store: &Store,
	config: &Redirector,
) -> Result<Response<String>, anyhow::Error> {
	let redirect_start = Instant::now();

	let mut res = Response::builder();

	// Set default response headers
	res = res.header("Referrer-Policy", "unsafe-url");
	if config.send_server {
		res = res.header("Server", &*SERVER_NAME);
	}

	let segment = link_name(req.uri().path());

	let (name, destination) = if segment.is_empty() {
		trace!("path has no link name");
		(None, Some(config.empty_redirect.clone()))
	} else if let Ok(name) = Name::new(segment) {
		trace!("path is a link name, normalized to \"{name}\"");

		match store.get(name.clone()).await {
			Ok(Some(link)) => {
				res = res.header("Link-Id", link.id.to_string());
				store.incr_visits(name.clone());
				(Some(name), Some(link.redirect.into_string()))
			}
			Ok(None) => (Some(name), Some(config.not_found_redirect.clone())),
			Err(err) => {
				error!(%err, %name, "Unable to retrieve link");
				(Some(name), None)
			}
		}
	} else {
		trace!("path is not a valid link name");
		(None, Some(config.not_found_redirect.clone()))
	};

	let res = if let Some(destination) = &destination {
		res.status(StatusCode::FOUND)
			.header("Location", destination)
			.body(String::new())?
	} else {
		res.status(StatusCode::INTERNAL_SERVER_ERROR)
			.body(String::new())?
	};

	let redirect_time = redirect_start.elapsed();

	debug!(?res);
	info!(
		time_ns = %redirect_time.as_nanos(),
		name = %name.map_or_else(|| "[none]".to_string(), |name| name.to_string()),
		destination = %destination.as_deref().unwrap_or("[none]"),
		status_code = %res.status(),
		"redirect processed in {:.6} seconds",
		redirect_time.as_secs_f64()
	);

	Ok(res)
}

#[cfg(test)]
mod tests {
	use std::{collections::HashMap, time::Duration};

	use hyper::header::{LOCATION, SERVER};

	use super::*;
	use crate::{
		normalized::Redirect,
		store::{BackendType, Link},
	};

	fn config() -> Redirector {
		Redirector {
			send_server: true,
			empty_redirect: "https://example.com/".to_string(),
			not_found_redirect: "https://example.com/404".to_string(),
		}
	}

	async fn store() -> (Store, Link) {
		let store = Store::new(BackendType::Memory, &HashMap::new())
			.await
			.unwrap();
		let link = store
			.create(
				Name::new("docs").unwrap(),
				Redirect::new("example.com/docs").unwrap(),
			)
			.await
			.unwrap();
		(store, link)
	}

	async fn redirect(store: &Store, path: &str) -> Response<String> {
		let req = Request::builder().uri(path).body(()).unwrap();
		redirector(req, store, &config()).await.unwrap()
	}

	#[test]
	fn fn_link_name() {
		assert_eq!(link_name("/docs"), "docs");
		assert_eq!(link_name("/docs/extra/path"), "docs");
		assert_eq!(link_name("/"), "");
		assert_eq!(link_name(""), "");
		assert_eq!(link_name("//docs"), "");
	}

	#[tokio::test]
	async fn found() {
		let (store, link) = store().await;

		for path in ["/docs", "/DOCS", "/Docs/anything", "/docs?query=string"] {
			let res = redirect(&store, path).await;

			assert_eq!(res.status(), StatusCode::FOUND, "{path}");
			assert_eq!(res.headers()[LOCATION], "https://example.com/docs");
			assert_eq!(res.headers()["Link-Id"], link.id.to_string().as_str());
			assert_eq!(res.headers()["Referrer-Policy"], "unsafe-url");
			assert_eq!(res.headers()[SERVER], SERVER_NAME.as_str());
		}
	}

	#[tokio::test]
	async fn fallbacks() {
		let (store, _) = store().await;

		for (path, location) in [
			("/", "https://example.com/"),
			("//docs", "https://example.com/"),
			("/missing", "https://example.com/404"),
			("/not.a.name", "https://example.com/404"),
			("/%20", "https://example.com/404"),
		] {
			let res = redirect(&store, path).await;

			assert_eq!(res.status(), StatusCode::FOUND, "{path}");
			assert_eq!(res.headers()[LOCATION], location, "{path}");
			assert!(!res.headers().contains_key("Link-Id"));
		}
	}

	#[tokio::test]
	async fn counts_visits() {
		let (store, _) = store().await;
		let name = Name::new("docs").unwrap();

		redirect(&store, "/docs").await;
		redirect(&store, "/missing").await;

		for _ in 0..100 {
			if store.get(name.clone()).await.unwrap().unwrap().visits == 1 {
				return;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}

		panic!("visit was not counted");
	}

	#[tokio::test]
	async fn no_server_header() {
		let (store, _) = store().await;
		let req = Request::builder().uri("/docs").body(()).unwrap();
		let res = redirector(req, &store, &Redirector {
			send_server: false,
			..config()
		})
		.await
		.unwrap();

		assert!(!res.headers().contains_key(SERVER));
	}
}

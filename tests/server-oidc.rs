//! End-to-end tests of the OpenID Connect login flow, using a minimal local
//! identity provider

mod util;

use std::sync::Arc;

use hyper::{header::LOCATION, StatusCode};
use mand::{auth::Auth, server::App};
use reqwest::{redirect::Policy, ClientBuilder};
use util::{json_body, send, state_of};

/// Log in via the router, then use the resulting ID token with the admin API
#[tokio::test]
async fn login_and_use_token() {
	let (issuer, _idp) = util::start_idp().await;
	let auth = Auth::from_config(&util::oidc_config(&issuer, "https://go.example.com"))
		.await
		.unwrap();
	let app = App::new(util::store().await, Arc::new(auth), util::redirector());

	let login = send(&app, "GET", "/auth/connect/login", None, "").await;
	assert_eq!(login.status(), StatusCode::FOUND);
	let location = login.headers()[LOCATION].to_str().unwrap().to_string();
	assert!(location.starts_with(&format!("{issuer}/authorize?")));
	assert!(location.contains("scope=openid+ldap"));

	let callback_uri = format!(
		"/auth/connect/callback?code=good-code&state={}",
		state_of(&location)
	);
	let callback = send(&app, "GET", &callback_uri, None, "").await;
	assert_eq!(callback.status(), StatusCode::OK);
	let token = json_body(&callback)["token"].as_str().unwrap().to_string();

	let created = send(
		&app,
		"POST",
		"/link",
		Some(&token),
		r#"{"name":"docs","redirect":"example.com/docs"}"#,
	)
	.await;
	assert_eq!(created.status(), StatusCode::OK);

	let redirect = send(&app, "GET", "/docs", None, "").await;
	assert_eq!(redirect.headers()[LOCATION], "https://example.com/docs");

	let replay = send(&app, "GET", &callback_uri, None, "").await;
	assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_failures() {
	let (issuer, _idp) = util::start_idp().await;
	let auth = Auth::from_config(&util::oidc_config(&issuer, "https://go.example.com"))
		.await
		.unwrap();
	let app = App::new(util::store().await, Arc::new(auth), util::redirector());

	for (code, status) in [
		("outsider-code", StatusCode::UNAUTHORIZED),
		("bad-code", StatusCode::INTERNAL_SERVER_ERROR),
	] {
		let login = send(&app, "GET", "/auth/connect/login", None, "").await;
		let state = state_of(login.headers()[LOCATION].to_str().unwrap());

		let callback = send(
			&app,
			"GET",
			&format!("/auth/connect/callback?code={code}&state={state}"),
			None,
			"",
		)
		.await;
		assert_eq!(callback.status(), status, "{code}");
	}

	// A token for someone outside of the allowed group, signed by the provider
	let outsider = util::sign_token(&issuer, "mallory", &["staff"]);
	let res = send(&app, "GET", "/link", Some(&outsider), "").await;
	assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

	// A token signed by the provider, but for another issuer
	let foreign = util::sign_token("https://id.example.org", "alice", &[util::ALLOWED_GROUP]);
	let res = send(&app, "GET", "/link", Some(&foreign), "").await;
	assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn discovery_failure() {
	// Nothing listens here
	let config = util::oidc_config("http://127.0.0.1:9", "https://go.example.com");

	assert!(Auth::from_config(&config).await.is_err());
}

/// Run the server binary, log in, and manage links over the network
#[tokio::test(flavor = "multi_thread")]
#[serial_test::serial]
async fn server_binary() {
	let (issuer, _idp) = util::start_idp().await;
	let base = "http://127.0.0.1:18181";
	let redirect_url = format!("{base}/auth/connect/callback");

	let _terminator = util::start_server_with_args(
		[
			"--example-redirect",
			"--listeners",
			r#"["127.0.0.1:18181"]"#,
			"--empty-redirect",
			util::EMPTY_REDIRECT,
			"--not-found-redirect",
			util::NOT_FOUND_REDIRECT,
			"--oidc-issuer-url",
			issuer.as_str(),
			"--oidc-client-id",
			"mand",
			"--oidc-client-secret",
			"secret",
			"--oidc-redirect-url",
			redirect_url.as_str(),
			"--oidc-allowed-group",
			util::ALLOWED_GROUP,
		]
		.into_iter()
		.map(ToString::to_string)
		.collect(),
	);

	util::wait_for_server(base).await;

	let client = ClientBuilder::new()
		.redirect(Policy::none())
		.build()
		.unwrap();

	let example = client.get(format!("{base}/example")).send().await.unwrap();
	assert_eq!(example.status(), StatusCode::FOUND);
	assert_eq!(example.headers()[LOCATION], "https://example.com/");
	assert!(example
		.headers()["Server"]
		.to_str()
		.unwrap()
		.starts_with("mand/"));

	let root = client.get(base).send().await.unwrap();
	assert_eq!(root.headers()[LOCATION], util::EMPTY_REDIRECT);

	let unauthorized = client.get(format!("{base}/link")).send().await.unwrap();
	assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

	let login = client
		.get(format!("{base}/auth/connect/login"))
		.send()
		.await
		.unwrap();
	assert_eq!(login.status(), StatusCode::FOUND);
	let state = state_of(login.headers()[LOCATION].to_str().unwrap());

	let callback: serde_json::Value = client
		.get(format!("{base}/auth/connect/callback"))
		.query(&[("code", "good-code"), ("state", state.as_str())])
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	let token = callback["token"].as_str().unwrap();

	let created = client
		.post(format!("{base}/link"))
		.bearer_auth(token)
		.json(&serde_json::json!({ "name": "docs", "redirect": "example.com/docs" }))
		.send()
		.await
		.unwrap();
	assert_eq!(created.status(), StatusCode::OK);

	let docs = client.get(format!("{base}/Docs")).send().await.unwrap();
	assert_eq!(docs.status(), StatusCode::FOUND);
	assert_eq!(docs.headers()[LOCATION], "https://example.com/docs");
}

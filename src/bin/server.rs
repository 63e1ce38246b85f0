//! # mand server
//!
//! The mand server redirects requests to their proper destinations and serves
//! the admin API used to manage links. It has three external interfaces: an
//! HTTP server, an OpenID Connect identity provider used to authenticate
//! admin API users, and (usually) a database used as the link store.
//!
//! ## The HTTP server
//! mand uses [hyper](https://hyper.rs/) for HTTP/1.0 and HTTP/1.1. It listens
//! for incoming requests and either redirects them (always using the 302
//! status code) or routes them to the admin API or the login flow.
//!
//! ## The identity provider
//! The identity provider is discovered on startup. Users log in via the
//! provider, and the resulting ID token is used as a bearer token for the
//! admin API.
//!
//! ## The store backend
//! Links are kept either in memory or in a PostgreSQL or SQLite database.

use std::{
	path::PathBuf,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
};

use anyhow::anyhow;
use mand::{
	auth::Auth,
	config::{Config, LogLevel},
	server::{store_setup, App, Listener, PlainHttpAcceptor},
	util::{SERVER_HELP, SERVER_NAME},
};
use pico_args::Arguments;
use tokio::runtime::Builder;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{filter::DynFilterFn, prelude::*, FmtSubscriber};

/// Default file with environment variables loaded on startup
const DEFAULT_ENV_FILE: &str = "mand.env";

/// Run the mand server using configuration from the provided command line
/// arguments, environment variables, and configuration file.
///
/// # Errors
/// Returns an error if setup fails, or an unexpected and unrecoverable runtime
/// error occurs.
fn main() -> Result<(), anyhow::Error> {
	// Create a temporary tracing subscriber to collect and show logs on startup
	let tracing_subscriber = FmtSubscriber::builder()
		.with_level(true)
		.with_max_level(if cfg!(debug_assertions) {
			Level::DEBUG
		} else {
			Level::INFO
		})
		.finish();

	// Set the subscriber as the current default so logs are sent there
	let subscriber_guard = tracing::subscriber::set_default(tracing_subscriber);

	let server = &*SERVER_NAME;
	info!(%server, "Starting mand");

	// Parse cli args
	let mut args = Arguments::from_env();

	if args.contains(["-h", "--help"]) {
		println!("{SERVER_HELP}");
		Err(anyhow!(""))?;
	}

	let example_redirect = args.contains("--example-redirect");

	// Load extra environment variables, which don't override existing ones
	let env_file: Option<PathBuf> = args.opt_value_from_str("--env-file")?;
	let explicit_env_file = env_file.is_some();
	let env_file = env_file.unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_FILE));
	match dotenvy::from_path(&env_file) {
		Ok(()) => debug!("Loaded environment variables from {}", env_file.display()),
		// The default file is optional
		Err(err) if err.not_found() && !explicit_env_file => (),
		Err(err) => warn!(%err, "Could not load environment variables from {}", env_file.display()),
	}

	info!("Getting server configuration");

	// Configure the server
	let config = Config::new_static(args.opt_value_from_str(["-c", "--config"])?);

	debug!(?config, "Server configuration parsed");

	// Set a tracing filter which can change the minimum log level on the fly.
	let tracing_filter = DynFilterFn::new(move |metadata, _| {
		let log_level = config.log_level();
		let level = metadata.level();
		if log_level == LogLevel::Verbose {
			let module = metadata.module_path();
			level <= &Level::INFO
				|| (module.is_some_and(|m| m.starts_with("mand::") || m == "server")
					&& level <= &Level::DEBUG)
		} else {
			level <= &Level::from(log_level)
		}
	});

	// Create the permanent global tracing subscriber to collect and show logs
	let (non_blocking, _tracing_appender_guard) = tracing_appender::non_blocking(std::io::stdout());
	let tracing_subscriber = FmtSubscriber::builder()
		.with_level(true)
		.with_max_level(Level::TRACE)
		.with_writer(non_blocking)
		.finish()
		.with(tracing_filter);

	drop(subscriber_guard);
	tracing::subscriber::set_global_default(tracing_subscriber)?;

	// Options without a reasonable default must be configured
	let redirector = config.redirector()?;
	let oidc = config.oidc()?;

	// Start tokio async runtime
	let rt = Builder::new_multi_thread()
		.enable_all()
		.thread_name_fn(|| {
			static ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
			let id = ATOMIC_ID.fetch_add(1, Ordering::Relaxed);
			format!("mand-worker-{id:#04x}")
		})
		.build()?;

	// Discover the identity provider
	let auth = Arc::new(rt.block_on(Auth::from_config(&oidc))?);

	// Initialize the store
	let store = rt.block_on(store_setup(config, example_redirect))?;

	// Initialize the acceptor
	let acceptor = PlainHttpAcceptor::new(App::new(store, auth, redirector));

	// Set up listeners
	let mut listeners = Vec::new();

	for addr in config.listeners() {
		listeners.push(rt.block_on(Listener::new(addr.address, addr.port, acceptor))?);
	}

	debug!(
		"Listening on {:?}",
		listeners
			.iter()
			.map(Listener::listen_address)
			.collect::<Vec<_>>()
	);

	info!(%config, "mand server started");

	rt.block_on(std::future::pending::<()>());

	unreachable!("The server stopped unexpectedly")
}

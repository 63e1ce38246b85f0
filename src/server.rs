//! mand server utilities, including:
//! - Listeners, which listen for incoming network traffic
//! - Acceptors, which accept incoming connections and direct it to the handler
//! - The handler, which routes requests to the redirector, the admin API, or
//!   the login flow
//! - miscellaneous functions used by the server binary
//!
//! # Listeners
//! A listener controls a network socket and calls its associated acceptor when
//! a new connection is received. One listener exists for every socket that the
//! mand server listens on.
//!
//! # Acceptors
//! Acceptors are the bridge between listeners and the handler. They hold
//! (references to) all necessary state used by themselves and the handler.
//! Acceptors are initialized at server startup and live for the rest of the
//! process.
//!
//! # Routing
//! | Path                      | Destination                            |
//! |---------------------------|----------------------------------------|
//! | `/healthz`                | health check, pings the store          |
//! | `/auth/connect/login`     | start of the OpenID Connect login      |
//! | `/auth/connect/callback`  | end of the OpenID Connect login        |
//! | `/link`, `/link/*`        | the admin [API][crate::api]            |
//! | anything else             | the [redirector][crate::redirector]    |

use std::{
	convert::Infallible,
	net::{IpAddr, Ipv6Addr, SocketAddr},
	os::raw::c_int,
	sync::Arc,
	thread,
};

use bytes::Bytes;
use hyper::{
	body::{Body, Incoming},
	server::conn::http1,
	service::service_fn,
	Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use socket2::{Domain, Protocol as SocketProtocol, Socket, Type};
use tokio::{
	io::{AsyncRead, AsyncWrite, Error as IoError},
	net::{TcpListener, TcpStream},
	spawn,
	task::JoinHandle,
};
use tracing::{debug, error, trace, warn};

use crate::{
	api::api,
	auth::Auth,
	config::{self, Config, ListenAddress},
	normalized::{Name, Redirect},
	redirector::redirector,
	store::{Store, StoreError},
	util::text_response,
};

/// Number of incoming connections that can be kept in the TCP socket backlog of
/// a listener (see `listen`'s [linux man page] or [winsock docs] for details)
///
/// [linux man page]: https://linux.die.net/man/2/listen
/// [winsock docs]: https://learn.microsoft.com/en-us/windows/win32/api/winsock2/nf-winsock2-listen
const LISTENER_TCP_BACKLOG_SIZE: c_int = 1024;

/// Everything needed to handle a request
#[derive(Debug, Clone)]
pub struct App {
	/// The link store
	pub store: Store,
	/// The admin API authentication gateway
	pub auth: Arc<Auth>,
	/// Redirector configuration
	pub redirector: config::Redirector,
}

impl App {
	/// Create a new [`App`]
	#[must_use]
	pub const fn new(store: Store, auth: Arc<Auth>, redirector: config::Redirector) -> Self {
		Self {
			store,
			auth,
			redirector,
		}
	}
}

/// Handle a single request, routing it by its path. Failures that can't be
/// expressed as a proper response become an empty `500 Internal Server Error`.
pub async fn handle<B>(app: &App, req: Request<B>) -> Result<Response<String>, Infallible>
where
	B: Body<Data = Bytes> + Send,
	B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
	let path = req.uri().path();

	let res = match path {
		"/healthz" => Ok(match app.store.ping().await {
			Ok(()) => text_response(StatusCode::OK, "ok"),
			Err(err) => {
				error!(%err, "Health check failed");
				text_response(StatusCode::INTERNAL_SERVER_ERROR, "database ping failed")
			}
		}),
		"/auth/connect/login" => Ok(app.auth.login_response()),
		"/auth/connect/callback" => {
			let query = req.uri().query().map(ToString::to_string);
			Ok(app.auth.callback_response(query.as_deref()).await)
		}
		"/link" => Ok(api(req, &app.store, &app.auth).await),
		path if path.starts_with("/link/") => Ok(api(req, &app.store, &app.auth).await),
		_ => redirector(req, &app.store, &app.redirector).await,
	};

	Ok(res.unwrap_or_else(|err| {
		error!(?err, "Error while handling request");
		text_response(StatusCode::INTERNAL_SERVER_ERROR, "")
	}))
}

/// A handler that serves HTTP/1 requests on `stream` using the provided
/// [`App`]
pub async fn http_handler(
	stream: impl AsyncRead + AsyncWrite + Send + Unpin + 'static,
	app: &'static App,
) {
	let service = service_fn(move |req: Request<Incoming>| handle(app, req));

	if let Err(err) = http1::Builder::new()
		.serve_connection(TokioIo::new(stream), service)
		.await
	{
		error!(?err, "Error while handling HTTP connection");
	}
}

/// A trait for defining mand server acceptors.
///
/// For more info about acceptors in general, please see the [module-level
/// documentation][mod].
///
/// [mod]: crate::server
#[async_trait::async_trait]
pub trait Acceptor<S: AsyncRead + AsyncWrite + Send + Unpin + 'static>:
	Send + Sync + 'static
{
	/// Accept an incoming connection in `stream` from `remote_addr` to
	/// `local_addr`. This function should [spawn a task][spawn] to handle the
	/// request using this acceptor's associated handler.
	///
	/// [spawn]: tokio::task
	async fn accept(&self, stream: S, local_addr: SocketAddr, remote_addr: SocketAddr);
}

/// An acceptor for plaintext (unencrypted) HTTP/1 requests
#[derive(Debug)]
pub struct PlainHttpAcceptor {
	app: &'static App,
}

impl PlainHttpAcceptor {
	/// Create a new [`PlainHttpAcceptor`] handling requests with `app`
	///
	/// # Memory
	/// This function leaks memory, and should therefore not be called an
	/// unbounded number of times
	#[must_use]
	pub fn new(app: App) -> &'static Self {
		Box::leak(Box::new(Self {
			app: Box::leak(Box::new(app)),
		}))
	}
}

#[async_trait::async_trait]
impl Acceptor<TcpStream> for PlainHttpAcceptor {
	async fn accept(&self, stream: TcpStream, local_addr: SocketAddr, remote_addr: SocketAddr) {
		let app = self.app;

		spawn(async move {
			trace!("New plain connection from {remote_addr} on {local_addr}");

			http_handler(stream, app).await;
		});
	}
}

/// A mand listener. This listens for incoming network connections on a
/// specified address in an async task in the background. On drop, the async
/// task is aborted in order to stop listening.
#[derive(Debug)]
pub struct Listener {
	addr: Option<IpAddr>,
	port: u16,
	handle: JoinHandle<()>,
}

impl Listener {
	/// Create a new [`Listener`] on the specified address, which will use the
	/// specified acceptor to accept incoming connections. If no address is
	/// specified, the listener will listen on all IPv4 and IPv6 addresses.
	/// Address `0.0.0.0` can be used to listen on all IPv4 (but not IPv6)
	/// addresses, and address `[::]` can be used to listen on all IPv6 (but not
	/// IPv4) addresses. If the port is not specified,
	/// [`ListenAddress::DEFAULT_PORT`] is used.
	///
	/// **Note:**
	/// Support for dual stack sockets (IPv4 and IPv6 in one socket, available
	/// via an empty address) is not universal on all platforms (such as some
	/// BSDs). On those platforms, an empty address and `[::]` will behave the
	/// same, i.e. an empty address will only listen on IPv6, not IPv4.
	///
	/// # Drop
	/// When dropped, a listener will wait until its internal task is fully
	/// cancelled. Dropping a listener should therefore be considered blocking,
	/// and can not be done inside of a single-threaded tokio runtime.
	///
	/// # Errors
	/// This function returns an error if it can not set up the listening
	/// socket.
	#[allow(clippy::unused_async)]
	pub async fn new(
		addr: Option<IpAddr>,
		port: Option<u16>,
		acceptor: &'static impl Acceptor<TcpStream>,
	) -> Result<Self, IoError> {
		let port = port.unwrap_or(ListenAddress::DEFAULT_PORT);
		let socket_addr = (addr.unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED)), port).into();

		let socket = Socket::new(
			Domain::for_address(socket_addr),
			Type::STREAM,
			Some(SocketProtocol::TCP),
		)?;

		// On Windows, `SO_REUSEADDR` allows multiple listeners per socket
		socket.set_reuse_address(cfg!(unix))?;
		// An explicit `[::]` is IPv6-only, no address is dual stack
		if socket_addr.is_ipv6() {
			socket.set_only_v6(addr.is_some())?;
		}
		socket.set_nonblocking(true)?;
		socket.set_nodelay(true)?;

		socket.bind(&socket_addr.into())?;
		socket.listen(LISTENER_TCP_BACKLOG_SIZE)?;
		let listener = TcpListener::from_std(socket.into())?;

		let handle = spawn(async move {
			loop {
				match listener.accept().await {
					Ok((stream, remote_addr)) => {
						acceptor.accept(stream, socket_addr, remote_addr).await;
					}
					Err(err) => {
						warn!("Error accepting TCP connection on {socket_addr}: {err:?}");
						continue;
					}
				}
			}
		});

		let listener = Self { addr, port, handle };
		debug!("Opened new listener on {}", listener.listen_address());

		Ok(listener)
	}

	/// Get the [`ListenAddress`] of this listener
	#[must_use]
	pub const fn listen_address(&self) -> ListenAddress {
		ListenAddress {
			address: self.addr,
			port: Some(self.port),
		}
	}
}

impl Drop for Listener {
	/// Cancel the task responsible for listening
	///
	/// # Blocking
	/// This functions blocks the current thread until the task is fully
	/// aborted. Additionally, if used in the context of a single-threaded tokio
	/// runtime, this function can completely block the entire program.
	fn drop(&mut self) {
		trace!("Closing listener on {}", self.listen_address());

		self.handle.abort();

		while !self.handle.is_finished() {
			thread::yield_now();
		}
	}
}

/// Set up the link store, optionally setting an example redirect
/// (`example` -> `https://example.com/`). An already existing `example` link
/// is left untouched.
///
/// # Errors
/// This function returns an error if construction of the [`Store`] (using
/// `Store::new`) fails or if the example redirect can not be set when
/// requested.
pub async fn store_setup(config: &Config, example_redirect: bool) -> Result<Store, anyhow::Error> {
	let store = Store::new(config.store(), &config.store_config()).await?;

	if example_redirect {
		match store
			.create(
				Name::new("example")?,
				Redirect::new("https://example.com/")?,
			)
			.await
		{
			Ok(_) | Err(StoreError::AlreadyExists(_)) => (),
			Err(err) => return Err(err.into()),
		}
	}

	Ok(store)
}

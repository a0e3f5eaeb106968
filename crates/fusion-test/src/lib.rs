//! Helpers for testing the cache and the command line front end.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. The filesystem backing store creates its root lazily, so a
//!    directory dropped too early is silently created again and leaked.
//!
//!  - When using [`TemplateServer`], hold on to the server until all requests have been made.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use tower_http::services::ServeDir;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `fusion` crates and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("fusion_cache=trace,fusion=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`keep`](TempDir::keep) is called. Use it as a guard to automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Returns the absolute path to the given fixture.
///
/// Fixtures are located in the `tests/fixtures` directory, located from the workspace root.
///
/// # Panics
///
/// Panics if the fixture path does not exist on the file system.
pub fn fixture(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();

    let mut full_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    full_path.pop(); // to /crates/
    full_path.pop(); // to /
    full_path.push("./tests/fixtures/");
    full_path.push(path);

    assert!(full_path.exists(), "'{}' does not exist", path.display());

    full_path
}

/// Returns the contents of a fixture.
///
/// # Panics
///
/// Panics if the fixture does not exist or cannot be read.
pub fn read_fixture(path: impl AsRef<Path>) -> Vec<u8> {
    std::fs::read(fixture(path)).unwrap()
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

/// A web server serving the template fixtures, counting how often each path was requested.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct TemplateServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    hits: Hits,
}

impl TemplateServer {
    pub fn new() -> Self {
        let hits = Hits::default();

        let router = Router::new()
            .fallback_service(ServeDir::new(fixture("templates")))
            .layer(middleware::from_fn_with_state(hits.clone(), count_hits));

        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            handle,
            socket,
            hits,
        }
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.socket.port(), path)
            .parse()
            .unwrap()
    }

    /// The number of requests made for `path` so far.
    pub fn hits(&self, path: &str) -> usize {
        let path = format!("/{}", path.trim_start_matches('/'));
        self.hits.lock().unwrap().get(&path).copied().unwrap_or(0)
    }
}

impl Default for TemplateServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TemplateServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn count_hits(State(hits): State<Hits>, request: Request, next: Next) -> Response {
    {
        let mut hits = hits.lock().unwrap();
        *hits.entry(request.uri().path().to_owned()).or_default() += 1;
    }
    next.run(request).await
}

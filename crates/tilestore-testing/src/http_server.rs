//! Local HTTP server serving a directory

use anyhow::{Context, Result};
use axum::Router;
use std::path::Path;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tower_http::services::ServeDir;
use url::Url;

/// Static file server on a random localhost port
///
/// The server runs on its own runtime so that blocking storage calls can be
/// made from the test thread.
pub struct TestHttpServer {
    base_url: Url,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    runtime: Option<Runtime>,
}

impl TestHttpServer {
    /// Serve the files below `root`
    pub fn serve_dir(root: &Path) -> Result<Self> {
        Self::new(Router::new().fallback_service(ServeDir::new(root)))
    }

    /// Serve `router`
    pub fn new(router: Router) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .thread_name("test-http-server")
            .build()
            .context("start test HTTP runtime")?;

        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .context("bind test HTTP listener")?;
        let addr = listener.local_addr().context("read test listener local addr")?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });

        runtime.spawn(async move {
            if let Err(e) = server.await {
                eprintln!("test HTTP server failed: {}", e);
            }
        });
        std::thread::sleep(std::time::Duration::from_millis(100));

        Ok(Self {
            base_url: Url::parse(&format!("http://{}", addr)).context("parse base URL")?,
            shutdown_tx: Some(shutdown_tx),
            runtime: Some(runtime),
        })
    }

    /// Address of `path` on this server
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Base URL of this server
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

//! HTTP API server for the voice relay

pub mod health;
pub mod voice;
pub mod websocket;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::config::AudioMode;
use crate::pipeline::Pipeline;

/// Shared state for API handlers
pub struct ApiState {
    pub pipeline: Arc<Pipeline>,
    /// Default audio transport for `/ws/voice`; overridable per connection
    pub audio_mode: AudioMode,
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    pipeline: Arc<Pipeline>,
    port: u16,
    static_dir: Option<PathBuf>,
    audio_mode: AudioMode,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, port: u16) -> Self {
        Self {
            pipeline,
            port,
            static_dir: None,
            audio_mode: AudioMode::default(),
        }
    }

    /// Set the static files directory for serving the browser client
    #[must_use]
    pub fn static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Set the default audio transport for the voice WebSocket
    #[must_use]
    pub const fn audio_mode(mut self, mode: AudioMode) -> Self {
        self.audio_mode = mode;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let state = Arc::new(ApiState {
            pipeline: self.pipeline,
            audio_mode: self.audio_mode,
        });

        ApiServer {
            state,
            port: self.port,
            static_dir: self.static_dir,
        }
    }
}

/// HTTP API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Build the full application router
    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .nest("/ws", websocket::router(self.state.clone()))
            .merge(voice::router(self.state.clone()))
            .merge(health::router());

        // Serve static files if configured
        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            router = router
                .nest_service("/static", ServeDir::new(static_dir))
                .fallback_service(
                    ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file)),
                );
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        // CORS layer for cross-origin requests from the browser client
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or serve
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Spawn the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

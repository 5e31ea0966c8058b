//! Pixelchat server.
//!
//! Chat rooms rendered server-side into images and streamed to viewers as
//! `multipart/x-mixed-replace` frame sequences.
//!
//! # Architecture
//!
//! - [`Channel`]: the per-room state machine. Appends messages, renders
//!   frames outside its lock, fans them out to viewer [`Mailbox`]es, enforces
//!   the one-session-per-identity join policy
//! - [`RoomDirectory`]: name → live channel, loads lazily, purges idle rooms
//! - [`Ingress`]: sanitizes, rate limits and token-checks submissions
//! - [`Storage`]: durable message history ([`RedbStorage`], with
//!   [`MemoryStorage`] and [`ChaoticStorage`] for tests)
//! - [`Environment`]: clock and RNG ([`SystemEnv`] in production)
//! - [`http`]: axum routes around all of the above
//!
//! Rendering and storage are synchronous; async handlers call them on the
//! blocking pool.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod directory;
mod env;
mod error;
pub mod http;
mod ingress;
mod mailbox;
mod registry;
pub mod storage;

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use channel::{
    BOUNDARY, Channel, ChannelConfig, ChannelError, DISPLACED_NOTICE, DeliveryOutcome, ViewerSession,
};
pub use directory::{DirectoryConfig, DirectoryError, RoomDirectory};
pub use env::{Environment, SystemEnv};
pub use error::ServerError;
pub use ingress::{
    Ingress, IngressConfig, SubmitError, SubmitOutcome, Submission, address_identity,
    randomize_channel_name, sanitize_channel_name, sanitize_identity, sanitize_message,
};
pub use mailbox::{Delivery, Mailbox};
use pixelchat_render::{CosmicFace, FacePool, FrameFormat, FrameRenderer, GlyphFace, GraphemeTable};
pub use registry::{ViewerEntry, ViewerRegistry};
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
use tokio::net::TcpListener;

/// Font and emoji assets. Anything unset falls back to a built-in default.
#[derive(Debug, Clone, Default)]
pub struct AssetConfig {
    /// TTF/OTF file loaded into every glyph face
    pub font_path: Option<PathBuf>,
    /// Family to select; defaults to the system sans-serif
    pub font_family: Option<String>,
    /// Binary emoji cluster table
    pub emoji_table: Option<PathBuf>,
    /// PNG sprite atlas matching the table
    pub emoji_atlas: Option<PathBuf>,
}

impl AssetConfig {
    /// Build the shared renderer from these assets.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if a file cannot be read
    /// - `ServerError::Render` if the table or atlas is invalid
    pub fn build_renderer(&self, format: FrameFormat) -> Result<FrameRenderer, ServerError> {
        let font: Option<Arc<[u8]>> = self.font_path.as_deref().map(read_asset).transpose()?.map(Arc::from);
        let family = self.font_family.clone();
        let faces = FacePool::new(move || {
            Box::new(CosmicFace::new(font.as_deref(), family.clone())) as Box<dyn GlyphFace>
        });

        let graphemes = match &self.emoji_table {
            Some(path) => GraphemeTable::parse(&read_asset(path)?)?,
            None => GraphemeTable::empty(),
        };
        let atlas = match &self.emoji_atlas {
            Some(path) => Some(FrameRenderer::load_atlas(&read_asset(path)?)?),
            None => None,
        };

        tracing::info!(clusters = graphemes.len(), atlas = atlas.is_some(), "render assets loaded");
        Ok(FrameRenderer::new(faces, Arc::new(graphemes), atlas, format))
    }
}

fn read_asset(path: &Path) -> Result<Vec<u8>, ServerError> {
    std::fs::read(path).map_err(|e| ServerError::Config(format!("reading {}: {e}", path.display())))
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:8080")
    pub bind_address: String,
    /// Path of the redb message store
    pub db_path: PathBuf,
    /// Render assets
    pub assets: AssetConfig,
    /// Codec for streamed frames
    pub frame_format: FrameFormat,
    /// Per-channel tuning
    pub channel: ChannelConfig,
    /// Directory tuning
    pub directory: DirectoryConfig,
    /// Submission limits
    pub ingress: IngressConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            db_path: PathBuf::from("pixelchat.redb"),
            assets: AssetConfig::default(),
            frame_format: FrameFormat::default(),
            channel: ChannelConfig::default(),
            directory: DirectoryConfig::default(),
            ingress: IngressConfig::default(),
        }
    }
}

/// Production pixelchat server.
pub struct Server {
    listener: TcpListener,
    directory: Arc<RoomDirectory<SystemEnv, RedbStorage>>,
    ingress: Arc<Ingress<SystemEnv, RedbStorage>>,
    directory_config: DirectoryConfig,
}

impl Server {
    /// Open the store, load assets and bind the listener.
    ///
    /// # Errors
    ///
    /// Any startup failure: store, assets or bind.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let storage = RedbStorage::open(&config.db_path)?;
        let renderer = Arc::new(config.assets.build_renderer(config.frame_format)?);

        let directory = Arc::new(RoomDirectory::new(env, storage, renderer, config.channel));
        let ingress = Arc::new(Ingress::new(Arc::clone(&directory), config.ingress, env));

        let listener = TcpListener::bind(&config.bind_address)
            .await
            .map_err(|e| ServerError::Transport(format!("binding {}: {e}", config.bind_address)))?;

        Ok(Self { listener, directory, ingress, directory_config: config.directory })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.local_addr()?);

        let _purge = self.directory.spawn_purge_task(&self.directory_config);
        let app = http::router(http::AppState { directory: self.directory, ingress: self.ingress });

        axum::serve(self.listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))
    }
}

//! Pixelchat server binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: JPEG frames, system font, no emoji sprites
//! pixelchat-server --bind 0.0.0.0:8080 --db pixelchat.redb
//!
//! # Custom font and emoji assets, lossless frames
//! pixelchat-server --font Inter.ttf --emoji-table emoji.bin --emoji-atlas emoji.png --format webp
//! ```

use std::{backtrace::Backtrace, path::PathBuf};

use clap::Parser;
use pixelchat_render::FrameFormat;
use pixelchat_server::{AssetConfig, IngressConfig, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Pixelchat server
#[derive(Parser, Debug)]
#[command(name = "pixelchat-server")]
#[command(about = "Chat rooms streamed as rendered image frames")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Path of the message store
    #[arg(long, default_value = "pixelchat.redb")]
    db: PathBuf,

    /// Font file for message text
    #[arg(long)]
    font: Option<PathBuf>,

    /// Font family to select
    #[arg(long)]
    font_family: Option<String>,

    /// Binary emoji cluster table
    #[arg(long)]
    emoji_table: Option<PathBuf>,

    /// PNG emoji sprite atlas
    #[arg(long)]
    emoji_atlas: Option<PathBuf>,

    /// Frame codec (jpeg, jpeg:<quality>, webp)
    #[arg(long, default_value = "jpeg")]
    format: FrameFormat,

    /// JPEG quality, overrides the one in --format
    #[arg(long)]
    quality: Option<u8>,

    /// Require a submission token on every message
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    require_token: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!(backtrace = %Backtrace::force_capture(), "{info}");
    }));

    let frame_format = match (args.format, args.quality) {
        (FrameFormat::Jpeg { .. }, Some(quality)) => FrameFormat::Jpeg { quality: quality.clamp(1, 100) },
        (format, _) => format,
    };

    tracing::info!("Pixelchat server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        db_path: args.db,
        assets: AssetConfig {
            font_path: args.font,
            font_family: args.font_family,
            emoji_table: args.emoji_table,
            emoji_atlas: args.emoji_atlas,
        },
        frame_format,
        ingress: IngressConfig { require_token: args.require_token, ..Default::default() },
        ..Default::default()
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}

//! HTTP glue.
//!
//! | Path | Description |
//! |------|-------------|
//! | `GET /~stream?name=&screen=&uid=` | `multipart/x-mixed-replace` frame stream |
//! | `GET /~token?uid=` | Submission token for the send form |
//! | `POST /~send` | Submit a message (form: `name`, `uid`, `text`, `token`) |
//! | `GET /~link/:channel/:index?screen=` | Redirect to link badge `index` (hex) of the viewer's frame |
//! | `GET /~recent` | Recently active channels |
//!
//! Channel work that renders or touches storage runs on the blocking pool.

use std::{fmt::Write as _, net::SocketAddr, sync::Arc};

use axum::{
    Form, Router,
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use pixelchat_render::ViewportClass;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::{
    channel::{BOUNDARY, ChannelError, ViewerSession},
    directory::RoomDirectory,
    env::Environment,
    ingress::{
        Ingress, SubmitError, SubmitOutcome, Submission, address_identity, sanitize_channel_name,
        sanitize_identity,
    },
    storage::{Storage, StorageError},
};

/// Bytes buffered between a viewer's delivery loop and its response body.
const STREAM_BUFFER: usize = 64 * 1024;

/// Channels listed by `/~recent`.
const RECENT_LIMIT: usize = 50;

/// Shared state passed to all request handlers.
pub struct AppState<E: Environment, S: Storage> {
    /// Live channels
    pub directory: Arc<RoomDirectory<E, S>>,
    /// Submission front door
    pub ingress: Arc<Ingress<E, S>>,
}

impl<E: Environment, S: Storage> Clone for AppState<E, S> {
    fn clone(&self) -> Self {
        Self { directory: Arc::clone(&self.directory), ingress: Arc::clone(&self.ingress) }
    }
}

/// Router with every pixelchat endpoint.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// handlers need the peer address.
pub fn router<E: Environment, S: Storage>(state: AppState<E, S>) -> Router {
    Router::new()
        .route("/~stream", get(stream::<E, S>))
        .route("/~token", get(token::<E, S>))
        .route("/~send", post(send::<E, S>))
        .route("/~link/:channel/:index", get(link::<E, S>))
        .route("/~recent", get(recent::<E, S>))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    name: String,
    #[serde(default)]
    screen: Option<u32>,
    #[serde(default)]
    uid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LinkParams {
    #[serde(default)]
    screen: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TokenParams {
    #[serde(default)]
    uid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendForm {
    name: String,
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    token: Option<String>,
}

fn resolve_identity<E: Environment, S: Storage>(
    state: &AppState<E, S>,
    uid: Option<&str>,
    peer: SocketAddr,
) -> String {
    let max = state.ingress.config().max_identity_chars;
    uid.map(|u| sanitize_identity(u, max)).filter(|u| !u.is_empty()).unwrap_or_else(|| address_identity(peer.ip()))
}

async fn stream<E: Environment, S: Storage>(
    State(state): State<AppState<E, S>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<StreamParams>,
) -> Response {
    let name = sanitize_channel_name(&params.name, state.ingress.config().max_name_chars);
    let identity = resolve_identity(&state, params.uid.as_deref(), peer);
    let class = ViewportClass::from_width(params.screen.unwrap_or_default());
    let directory = Arc::clone(&state.directory);

    let joined = tokio::task::spawn_blocking(move || join_channel(&directory, &name, &identity, class, peer)).await;
    match joined {
        Ok(Ok(session)) => stream_response(session),
        Ok(Err(response)) => response,
        Err(e) => {
            warn!(error = %e, "join task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

/// Open and join, retrying once if the channel was purged in between.
fn join_channel<E: Environment, S: Storage>(
    directory: &RoomDirectory<E, S>,
    name: &str,
    identity: &str,
    class: ViewportClass,
    peer: SocketAddr,
) -> Result<ViewerSession<E, S>, Response> {
    for _ in 0..2 {
        let channel = match directory.open(name) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(channel = %name, error = %e, "opening channel failed");
                return Err((StatusCode::BAD_REQUEST, e.to_string()).into_response());
            },
        };

        match channel.join(identity, class, peer.ip()) {
            Ok(session) => return Ok(session),
            Err(ChannelError::Closed) => continue,
            Err(ChannelError::JoinRejected { frame }) => {
                return Err(([(header::CONTENT_TYPE, frame.content_type)], frame.data).into_response());
            },
            Err(e) => return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()),
        }
    }
    Err((StatusCode::SERVICE_UNAVAILABLE, ChannelError::Closed.to_string()).into_response())
}

fn stream_response<E: Environment, S: Storage>(session: ViewerSession<E, S>) -> Response {
    let (mut writer, reader) = tokio::io::duplex(STREAM_BUFFER);

    tokio::spawn(async move {
        let session_id = session.session_id();
        let outcome = session.deliver(&mut writer).await;
        debug!(session = session_id, ?outcome, "stream closed");
    });

    let content_type = format!("multipart/x-mixed-replace; boundary={BOUNDARY}");
    (
        [(header::CONTENT_TYPE, content_type), (header::CACHE_CONTROL, "no-store".to_string())],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

async fn token<E: Environment, S: Storage>(
    State(state): State<AppState<E, S>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<TokenParams>,
) -> String {
    let identity = resolve_identity(&state, params.uid.as_deref(), peer);
    state.ingress.issue_token(&identity, peer.ip())
}

async fn send<E: Environment, S: Storage>(
    State(state): State<AppState<E, S>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Form(form): Form<SendForm>,
) -> Response {
    let submission = Submission {
        channel: form.name,
        identity: resolve_identity(&state, form.uid.as_deref(), peer),
        text: form.text,
        token: form.token,
        address: peer.ip(),
    };
    let ingress = Arc::clone(&state.ingress);

    match tokio::task::spawn_blocking(move || ingress.submit(submission)).await {
        Ok(Ok(SubmitOutcome::Posted(_) | SubmitOutcome::Ignored)) => StatusCode::NO_CONTENT.into_response(),
        Ok(Ok(SubmitOutcome::Dropped)) => (StatusCode::NOT_FOUND, "channel is not active").into_response(),
        Ok(Err(e)) => {
            let status = match e {
                SubmitError::CoolingDown => StatusCode::TOO_MANY_REQUESTS,
                SubmitError::Token(_) => StatusCode::FORBIDDEN,
                SubmitError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                SubmitError::Channel(_) => StatusCode::CONFLICT,
            };
            (status, e.to_string()).into_response()
        },
        Err(e) => {
            warn!(error = %e, "submit task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

async fn link<E: Environment, S: Storage>(
    State(state): State<AppState<E, S>>,
    Path((channel, index)): Path<(String, String)>,
    Query(params): Query<LinkParams>,
) -> Response {
    let class = ViewportClass::from_width(params.screen.unwrap_or_default());
    let Some(channel) = state.directory.find(&channel) else {
        return (StatusCode::NOT_FOUND, "channel is not active").into_response();
    };

    let url = usize::from_str_radix(&index, 16).ok().and_then(|i| channel.link(class, i));
    if let Some(url) = url {
        return Redirect::to(&url).into_response();
    }

    let mut listing = String::new();
    for (i, url) in channel.links(class).iter().enumerate() {
        let _ = writeln!(listing, "{i:x}: {url}");
    }
    (StatusCode::NOT_FOUND, listing).into_response()
}

async fn recent<E: Environment, S: Storage>(State(state): State<AppState<E, S>>) -> Response {
    let directory = Arc::clone(&state.directory);
    let listed = tokio::task::spawn_blocking(move || {
        let recent = directory.recent_channels(RECENT_LIMIT)?;
        let stored = directory.channel_count()?;
        Ok::<_, StorageError>((recent, stored, directory.active_count(), directory.total_viewers()))
    })
    .await;

    match listed {
        Ok(Ok((recent, stored, live, viewers))) => {
            let mut body = format!("# live={live} viewers={viewers} stored={stored}\n");
            for (name, active) in recent {
                let _ = writeln!(body, "{name}\t{active}");
            }
            body.into_response()
        },
        Ok(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        Err(e) => {
            warn!(error = %e, "recent task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

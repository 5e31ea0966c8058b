//! Message submission: sanitizing, rate limiting and token checks in front
//! of [`Channel::append`](crate::Channel::append).

use std::{net::IpAddr, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Local, TimeZone};
use moka::{policy::EvictionPolicy, sync::Cache};
use pixelchat_crypto::{DEFAULT_DEDUP_CAPACITY, NONCE_SIZE, ReplayGuard, TokenError};
use pixelchat_proto::Message;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    channel::ChannelError,
    directory::RoomDirectory,
    env::Environment,
    storage::{Storage, StorageError},
};

/// Ingress limits.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Reject submissions without a valid token
    pub require_token: bool,
    /// Minimum time between submissions from one address
    pub cooldown: Duration,
    /// Addresses tracked by the cooldown cache
    pub cooldown_capacity: u64,
    /// Message body limit in bytes
    pub max_message_bytes: usize,
    /// Message body limit in lines
    pub max_message_lines: usize,
    /// Channel name limit in characters
    pub max_name_chars: usize,
    /// Identity limit in characters
    pub max_identity_chars: usize,
    /// Tokens remembered for replay detection
    pub token_capacity: u64,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            require_token: true,
            cooldown: Duration::from_secs(1),
            cooldown_capacity: 100_000,
            max_message_bytes: 1024,
            max_message_lines: 10,
            max_name_chars: 50,
            max_identity_chars: 20,
            token_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

/// A raw message submission.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Target channel, unsanitized
    pub channel: String,
    /// Author identity, unsanitized
    pub identity: String,
    /// Message body, unsanitized
    pub text: String,
    /// Token from the send form
    pub token: Option<String>,
    /// Submitter's address
    pub address: IpAddr,
}

/// What happened to an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Appended and rendered.
    Posted(Message),
    /// The channel is not live; the message was discarded.
    Dropped,
    /// Nothing left after sanitizing.
    Ignored,
}

/// Why a submission was refused.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The address submitted too recently.
    #[error("cooling down")]
    CoolingDown,

    /// The submission token was missing or invalid.
    #[error("token rejected: {0}")]
    Token(#[from] TokenError),

    /// The message is shown but was not persisted.
    #[error("message not persisted: {0}")]
    Persistence(StorageError),

    /// The channel refused the message.
    #[error("channel error: {0}")]
    Channel(ChannelError),
}

/// Front door for message submissions.
pub struct Ingress<E: Environment, S: Storage> {
    directory: Arc<RoomDirectory<E, S>>,
    guard: ReplayGuard,
    cooldowns: Option<Cache<IpAddr, ()>>,
    config: IngressConfig,
    env: E,
}

impl<E: Environment, S: Storage> Ingress<E, S> {
    /// Ingress for `directory`. Tokens are sealed under a fresh random key.
    pub fn new(directory: Arc<RoomDirectory<E, S>>, config: IngressConfig, env: E) -> Self {
        let mut key = [0u8; 32];
        env.random_bytes(&mut key);

        let cooldowns = (!config.cooldown.is_zero())
            .then(|| {
            Cache::builder()
                .max_capacity(config.cooldown_capacity)
                .eviction_policy(EvictionPolicy::lru())
                .time_to_live(config.cooldown)
                .build()
        });

        Self { directory, guard: ReplayGuard::new(key, config.token_capacity), cooldowns, config, env }
    }

    /// Limits in effect.
    pub fn config(&self) -> &IngressConfig {
        &self.config
    }

    /// Addresses currently cooling down. Runs pending cache maintenance first.
    pub fn cooling_down(&self) -> u64 {
        self.cooldowns.as_ref().map_or(0, |cache| {
            cache.run_pending_tasks();
            cache.entry_count()
        })
    }

    /// Single-use token authorizing one submission by `identity` from
    /// `address`.
    pub fn issue_token(&self, identity: &str, address: IpAddr) -> String {
        let identity = sanitize_identity(identity, self.config.max_identity_chars);
        let mut nonce = [0u8; NONCE_SIZE];
        self.env.random_bytes(&mut nonce);
        self.guard.issue(&binding(&identity, address), self.now(), nonce)
    }

    /// Validate and post a submission.
    ///
    /// Checks run in order: cooldown, token, channel liveness, empty body.
    /// The channel is refreshed even when persistence fails, since the
    /// message is already in its log.
    ///
    /// # Errors
    ///
    /// See [`SubmitError`].
    pub fn submit(&self, submission: Submission) -> Result<SubmitOutcome, SubmitError> {
        let channel_name = sanitize_channel_name(&submission.channel, self.config.max_name_chars);
        let identity = sanitize_identity(&submission.identity, self.config.max_identity_chars);

        if let Some(cooldowns) = &self.cooldowns {
            if cooldowns.contains_key(&submission.address) {
                debug!(address = %submission.address, "submission cooling down");
                return Err(SubmitError::CoolingDown);
            }
            cooldowns.insert(submission.address, ());
        }

        if self.config.require_token {
            let token = submission.token.as_deref().unwrap_or_default();
            if let Err(e) = self.guard.validate(token, &binding(&identity, submission.address), self.now()) {
                info!(identity = %identity, address = %submission.address, reason = %e, "submission token rejected");
                return Err(SubmitError::Token(e));
            }
        }

        let Some(channel) = self.directory.find(&channel_name) else {
            debug!(channel = %channel_name, "submission for idle channel dropped");
            return Ok(SubmitOutcome::Dropped);
        };

        let text = sanitize_message(&submission.text, self.config.max_message_bytes, self.config.max_message_lines);
        if text.trim().is_empty() {
            return Ok(SubmitOutcome::Ignored);
        }

        let appended = channel.append(Message::text(identity, text));
        match appended {
            Ok(message) => {
                channel.refresh();
                Ok(SubmitOutcome::Posted(message))
            },
            Err(ChannelError::Persistence(e)) => {
                channel.refresh();
                Err(SubmitError::Persistence(e))
            },
            Err(ChannelError::Closed) => Ok(SubmitOutcome::Dropped),
            Err(e) => Err(SubmitError::Channel(e)),
        }
    }

    fn now(&self) -> u64 {
        self.env.wall_clock_secs().max(0) as u64
    }
}

fn binding(identity: &str, address: IpAddr) -> String {
    format!("{identity}@{address}")
}

fn keep_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') || (u32::from(c) > 0xFF && !c.is_whitespace())
}

/// Keep `[A-Za-z0-9._-]` and non-space characters above U+00FF, at most
/// `max_chars` of them.
pub fn sanitize_channel_name(raw: &str, max_chars: usize) -> String {
    raw.chars().filter(|c| keep_name_char(*c)).take(max_chars).collect()
}

/// Same character set as channel names, with the identity limit.
pub fn sanitize_identity(raw: &str, max_chars: usize) -> String {
    sanitize_channel_name(raw, max_chars)
}

/// Drop carriage returns and stop at `max_bytes` or before the
/// `max_lines`-th newline.
pub fn sanitize_message(raw: &str, max_bytes: usize, max_lines: usize) -> String {
    let mut out = String::with_capacity(raw.len().min(max_bytes));
    let mut newlines = 0;

    for c in raw.chars().filter(|c| *c != '\r') {
        if c == '\n' {
            newlines += 1;
            if newlines >= max_lines {
                break;
            }
        }
        if out.len() + c.len_utf8() > max_bytes {
            break;
        }
        out.push(c);
    }
    out
}

/// A fresh room name derived from `base`: `base--MMDD` followed by four
/// URL-safe random characters.
pub fn randomize_channel_name<E: Environment>(base: &str, env: &E) -> String {
    let mut suffix = [0u8; 3];
    env.random_bytes(&mut suffix);

    let date = Local
        .timestamp_opt(env.wall_clock_secs(), 0)
        .single()
        .map(|t| t.format("%m%d").to_string())
        .unwrap_or_default();
    format!("{base}--{date}{}", URL_SAFE_NO_PAD.encode(suffix))
}

/// Stable fallback identity for viewers that did not choose one.
pub fn address_identity(address: IpAddr) -> String {
    let digest = Sha256::digest(address.to_string().as_bytes());
    format!("anon-{}", URL_SAFE_NO_PAD.encode(&digest[..6]))
}

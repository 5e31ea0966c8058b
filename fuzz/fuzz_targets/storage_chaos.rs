//! Fuzz target for channel appends under storage failures
//!
//! # Strategy
//!
//! - Variable failure rates (0% to 90%)
//! - Random interleaving of text, join and leave messages and clock steps
//!
//! # Invariants
//!
//! - Storage errors surface as `ChannelError::Persistence`, never panics
//! - Ids stay strictly increasing even when the clock steps backwards
//! - The in-memory log never exceeds the history limit
//! - Everything persisted is a text message also seen in memory

#![no_main]

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pixelchat_proto::{Message, MessageKind};
use pixelchat_render::{FacePool, FixedFace, FrameFormat, FrameRenderer, GlyphFace, GraphemeTable};
use pixelchat_server::{
    Channel, ChannelConfig, ChannelError, ChaoticStorage, Environment, MemoryStorage, Storage,
};

#[derive(Clone)]
struct FuzzEnv {
    clock: Arc<AtomicI64>,
}

impl Environment for FuzzEnv {
    fn wall_clock_secs(&self) -> i64 {
        self.clock.load(Ordering::Relaxed)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0x5A);
    }
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    chaos_seed: u64,
    /// 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    history_limit: u8,
    ops: Vec<Op>,
}

#[derive(Debug, Arbitrary)]
enum Op {
    Text(String),
    Presence(bool),
    Clock(i8),
}

fuzz_target!(|scenario: Scenario| {
    let rate = f64::from(scenario.failure_rate_tenth % 10) / 10.0;
    let inner = MemoryStorage::new();
    let storage = ChaoticStorage::with_seed(inner.clone(), rate, scenario.chaos_seed);
    let env = FuzzEnv { clock: Arc::new(AtomicI64::new(1_700_000_000)) };
    let faces = FacePool::new(|| Box::new(FixedFace::new(6.0)) as Box<dyn GlyphFace>);
    let renderer = Arc::new(FrameRenderer::new(faces, Arc::new(GraphemeTable::empty()), None, FrameFormat::WebP));
    let limit = usize::from(scenario.history_limit % 64) + 1;
    let config = ChannelConfig { history_limit: limit, ..ChannelConfig::default() };

    let Ok(channel) = Channel::load("fuzz", env.clone(), storage, renderer, config) else {
        return;
    };

    let mut last_id = 0;
    for op in scenario.ops.into_iter().take(64) {
        let message = match op {
            Op::Text(text) => Message::text("fuzzer", text),
            Op::Presence(join) => {
                Message::presence("fuzzer", if join { MessageKind::Join } else { MessageKind::Leave })
            },
            Op::Clock(step) => {
                env.clock.fetch_add(i64::from(step), Ordering::Relaxed);
                continue;
            },
        };

        match channel.append(message) {
            Ok(appended) => {
                assert!(appended.id > last_id);
                last_id = appended.id;
            },
            Err(ChannelError::Persistence(_)) => {
                let newest = channel.messages().last().map(|m| m.id).unwrap_or_default();
                assert!(newest > last_id);
                last_id = newest;
            },
            Err(e) => panic!("unexpected channel error: {e}"),
        }
        assert!(channel.messages().len() <= limit);
    }

    let in_memory: Vec<u64> = channel.messages().iter().map(|m| m.id).collect();
    let persisted = inner.load_messages("fuzz").unwrap_or_default();
    assert!(persisted.len() <= limit);
    for message in persisted.iter().filter(|m| in_memory.first().is_some_and(|first| m.id >= *first)) {
        assert_eq!(message.kind, MessageKind::Text);
        assert!(in_memory.contains(&message.id));
    }
});

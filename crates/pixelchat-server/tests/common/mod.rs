//! Shared fixtures: a controllable environment and a font-free renderer.

#![allow(dead_code)]

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
};

use pixelchat_render::{FacePool, FixedFace, FrameFormat, FrameRenderer, GlyphFace, GraphemeTable};
use pixelchat_server::{Channel, ChannelConfig, Environment, Storage};

/// 2023-11-14, well past the id epoch.
pub const START: i64 = 1_700_000_000;

/// Environment with a settable clock and a seeded RNG.
#[derive(Clone)]
pub struct TestEnv {
    clock: Arc<AtomicI64>,
    rng: Arc<AtomicU64>,
}

impl TestEnv {
    pub fn new(seed: u64) -> Self {
        Self { clock: Arc::new(AtomicI64::new(START)), rng: Arc::new(AtomicU64::new(seed)) }
    }

    pub fn set_clock(&self, secs: i64) {
        self.clock.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.clock.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    fn wall_clock_secs(&self) -> i64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        for chunk in buffer.chunks_mut(8) {
            // splitmix64
            let mut z = self.rng.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::SeqCst).wrapping_add(0x9E37_79B9_7F4A_7C15);
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^= z >> 31;
            chunk.copy_from_slice(&z.to_le_bytes()[..chunk.len()]);
        }
    }
}

/// Renderer with fixed metrics, no emoji and JPEG output.
pub fn renderer() -> Arc<FrameRenderer> {
    let faces = FacePool::new(|| Box::new(FixedFace::new(7.0)) as Box<dyn GlyphFace>);
    Arc::new(FrameRenderer::new(faces, Arc::new(GraphemeTable::empty()), None, FrameFormat::default()))
}

pub fn channel<S: Storage>(name: &str, env: &TestEnv, storage: S) -> Arc<Channel<TestEnv, S>> {
    Channel::load(name, env.clone(), storage, renderer(), ChannelConfig::default()).unwrap()
}

pub fn peer(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 0, 2, n))
}

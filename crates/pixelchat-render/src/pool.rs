//! Pool of reusable glyph faces.
//!
//! Building a face loads fonts, so faces are created lazily and recycled.
//! A checked-out face goes back to the pool when its guard drops, including
//! while unwinding from a panic inside a render.

use std::{
    ops::{Deref, DerefMut},
    sync::{Mutex, PoisonError},
};

use crate::face::GlyphFace;

type FaceFactory = Box<dyn Fn() -> Box<dyn GlyphFace> + Send + Sync>;

/// Process-wide pool of glyph faces.
pub struct FacePool {
    idle: Mutex<Vec<Box<dyn GlyphFace>>>,
    factory: FaceFactory,
}

impl FacePool {
    /// Pool creating faces with `factory` when none are idle.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn GlyphFace> + Send + Sync + 'static,
    {
        Self { idle: Mutex::new(Vec::new()), factory: Box::new(factory) }
    }

    /// Take an idle face or build a new one.
    pub fn checkout(&self) -> PooledFace<'_> {
        let recycled = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let face = recycled.unwrap_or_else(|| (self.factory)());
        PooledFace { face: Some(face), pool: self }
    }

    /// Faces currently waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn give_back(&self, face: Box<dyn GlyphFace>) {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).push(face);
    }
}

/// A face on loan from a [`FacePool`].
pub struct PooledFace<'a> {
    face: Option<Box<dyn GlyphFace>>,
    pool: &'a FacePool,
}

impl Deref for PooledFace<'_> {
    type Target = dyn GlyphFace;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        self.face.as_deref().expect("invariant: face is present until drop")
    }
}

impl DerefMut for PooledFace<'_> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.face.as_deref_mut().expect("invariant: face is present until drop")
    }
}

impl Drop for PooledFace<'_> {
    fn drop(&mut self) {
        if let Some(face) = self.face.take() {
            self.pool.give_back(face);
        }
    }
}

//! Emoji cluster lookup keyed by leading code point.
//!
//! The table is built once from a binary asset and is read-only afterwards;
//! share it behind an `Arc`. Each asset record is
//!
//! ```text
//! [n: u8][lead: u32 BE][(n - 1) x code point: u32 BE]
//! ```
//!
//! and the record's ordinal selects its sprite cell in the emoji atlas.

use std::collections::HashMap;

use crate::error::RenderError;

/// Sprite cell edge in the emoji atlas.
pub const SPRITE_SIZE: u32 = 24;

/// Sprite cells per atlas row.
pub const SPRITES_PER_ROW: u32 = 40;

/// Top-left pixel of a sprite in the emoji atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpriteCell {
    /// Column offset in pixels
    pub x: u32,
    /// Row offset in pixels
    pub y: u32,
}

impl SpriteCell {
    /// Cell for the `ordinal`-th table record.
    pub fn for_ordinal(ordinal: u32) -> Self {
        Self { x: ordinal % SPRITES_PER_ROW * SPRITE_SIZE, y: ordinal / SPRITES_PER_ROW * SPRITE_SIZE }
    }
}

/// Successful probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphemeMatch {
    /// Bytes of the remaining text consumed after the lead rune
    pub suffix_len: usize,
    /// Sprite to draw
    pub sprite: SpriteCell,
}

#[derive(Debug, Clone)]
struct Candidate {
    suffix: String,
    sprite: SpriteCell,
}

/// Map from lead code point to candidate clusters.
#[derive(Debug, Clone, Default)]
pub struct GraphemeTable {
    entries: HashMap<char, Vec<Candidate>>,
    records: u32,
}

impl GraphemeTable {
    /// A table that never matches.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the binary asset.
    ///
    /// # Errors
    ///
    /// Truncated records, zero-length records and invalid code points are
    /// rejected with the offset of the offending record.
    pub fn parse(mut data: &[u8]) -> Result<Self, RenderError> {
        let mut table = Self::default();
        let total = data.len();

        while let Some((&n, rest)) = data.split_first() {
            let offset = total - data.len();
            let n = usize::from(n);
            if n == 0 {
                return Err(RenderError::GraphemeTable { offset, reason: "empty record" });
            }
            if rest.len() < n * 4 {
                return Err(RenderError::GraphemeTable { offset, reason: "truncated record" });
            }

            let mut sequence = Vec::with_capacity(n);
            for word in rest[..n * 4].chunks_exact(4) {
                let value = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
                let c = char::from_u32(value)
                    .ok_or(RenderError::GraphemeTable { offset, reason: "invalid code point" })?;
                sequence.push(c);
            }

            table.insert(&sequence);
            data = &rest[n * 4..];
        }

        table.sort();
        Ok(table)
    }

    /// Build a table from explicit sequences; each sequence's position is its
    /// sprite ordinal.
    pub fn from_sequences<I, S>(sequences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[char]>,
    {
        let mut table = Self::default();
        for sequence in sequences {
            table.insert(sequence.as_ref());
        }
        table.sort();
        table
    }

    /// Longest cluster starting with `lead` whose remainder prefixes `rest`.
    pub fn probe(&self, lead: char, rest: &str) -> Option<GraphemeMatch> {
        self.entries.get(&lead)?.iter().find(|candidate| rest.starts_with(&candidate.suffix)).map(
            |candidate| GraphemeMatch { suffix_len: candidate.suffix.len(), sprite: candidate.sprite },
        )
    }

    /// Number of records loaded.
    pub fn len(&self) -> usize {
        self.records as usize
    }

    /// True if no records were loaded.
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    fn insert(&mut self, sequence: &[char]) {
        let Some((&lead, suffix)) = sequence.split_first() else {
            return;
        };
        let sprite = SpriteCell::for_ordinal(self.records);
        self.records += 1;
        self.entries
            .entry(lead)
            .or_default()
            .push(Candidate { suffix: suffix.iter().collect(), sprite });
    }

    // Longest suffix first so the first prefix hit is the longest match.
    fn sort(&mut self) {
        for candidates in self.entries.values_mut() {
            candidates.sort_by(|a, b| b.suffix.len().cmp(&a.suffix.len()).then(a.suffix.cmp(&b.suffix)));
        }
    }
}

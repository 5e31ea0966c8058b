//! Message text layout: wrapping, kerning, emoji substitution and link
//! detection.
//!
//! Layout is a pure function of the face metrics, the grapheme table and the
//! text. It produces positioned glyphs and overlays; drawing is done by the
//! frame renderer.

use crate::{
    face::GlyphFace,
    grapheme::{GraphemeTable, SpriteCell},
};

/// Left edge of wrapped message text.
pub const CONTENT_LEFT: f32 = 10.0;

/// Space kept free on the right of wrapped text.
pub const WRAP_MARGIN: u32 = 24;

/// Advance reserved for an emoji sprite.
pub const EMOJI_ADVANCE: f32 = 30.0;

/// Links recorded per frame.
pub const MAX_LINKS: usize = 16;

/// Messages reaching this many lines are truncated.
pub const MAX_MESSAGE_LINES: usize = 10;

/// Code points consumed without drawing or advancing: carriage return, zero
/// width joiner and variation selectors.
pub fn is_invisible(c: char) -> bool {
    c == '\r' || c == '\u{200D}' || ('\u{FE00}'..='\u{FE0F}').contains(&c)
}

/// A glyph with its pen position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedGlyph {
    /// Code point
    pub c: char,
    /// Pen x position, kerning applied
    pub x: f32,
}

/// One wrapped line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaidLine {
    /// Glyphs left to right
    pub glyphs: Vec<PlacedGlyph>,
    /// Advance consumed from `CONTENT_LEFT`
    pub width: f32,
}

/// What an overlay draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    /// Link badge showing the frame-wide link index
    Link(usize),
    /// Emoji sprite
    Emoji(SpriteCell),
}

/// Something drawn over the text at a pen position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlay {
    /// Badge or sprite
    pub kind: OverlayKind,
    /// Pen x position
    pub x: f32,
    /// Index into `MessageLayout::lines`
    pub line: usize,
}

/// Layout of one text message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageLayout {
    /// Wrapped lines
    pub lines: Vec<LaidLine>,
    /// Link badges and emoji sprites
    pub overlays: Vec<Overlay>,
    /// Trailing "more" marker when the message was truncated
    pub more_marker: Option<String>,
    /// Links found in this message, in order
    pub links: Vec<String>,
}

impl MessageLayout {
    /// Rows occupied on the canvas, marker included.
    pub fn row_count(&self) -> usize {
        self.lines.len() + usize::from(self.more_marker.is_some())
    }

    /// True if the message was cut short.
    pub fn is_truncated(&self) -> bool {
        self.more_marker.is_some()
    }
}

/// Lay out `text` for a canvas `width` pixels wide.
///
/// `link_base` is the number of links already recorded for the frame; link
/// overlays carry frame-wide indices and recording stops at [`MAX_LINKS`].
/// Tabs expand to two spaces. A glyph fits on the current line if its advance
/// ends at or before `width - WRAP_MARGIN`.
pub fn layout_message(
    face: &mut dyn GlyphFace,
    table: &GraphemeTable,
    text: &str,
    width: u32,
    author: &str,
    link_base: usize,
) -> MessageLayout {
    let right = width.saturating_sub(WRAP_MARGIN) as f32;
    let text = text.replace('\t', "  ");
    let mut layout = MessageLayout::default();

    for source in text.lines() {
        let mut line = LaidLine::default();
        let mut occupied = false;
        let mut x = CONTENT_LEFT;
        let mut prev: Option<char> = None;
        let mut rest = source;

        while let Some(c) = rest.chars().next() {
            let link = (link_base + layout.links.len() < MAX_LINKS
                && (rest.starts_with("http://") || rest.starts_with("https://")))
            .then(|| {
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                rest[..end].to_string()
            });

            rest = &rest[c.len_utf8()..];
            if is_invisible(c) {
                continue;
            }

            let (advance, sprite) = match table.probe(c, rest) {
                Some(hit) => {
                    rest = &rest[hit.suffix_len..];
                    (EMOJI_ADVANCE, Some(hit.sprite))
                },
                None => (face.advance(c), None),
            };

            let mut pen = match (prev, sprite) {
                (Some(p), None) => x + face.kern(p, c),
                _ => x,
            };
            if occupied && pen + advance > right {
                line.width = x - CONTENT_LEFT;
                layout.lines.push(std::mem::take(&mut line));
                pen = CONTENT_LEFT;
            }
            let row = layout.lines.len();

            if let Some(url) = link {
                let index = link_base + layout.links.len();
                layout.overlays.push(Overlay { kind: OverlayKind::Link(index), x: pen, line: row });
                layout.links.push(url);
            }

            match sprite {
                Some(cell) => {
                    layout.overlays.push(Overlay { kind: OverlayKind::Emoji(cell), x: pen, line: row });
                    prev = None;
                },
                None => {
                    line.glyphs.push(PlacedGlyph { c, x: pen });
                    prev = Some(c);
                },
            }

            x = pen + advance;
            occupied = true;
        }

        line.width = x - CONTENT_LEFT;
        layout.lines.push(line);
    }

    if layout.lines.len() >= MAX_MESSAGE_LINES {
        truncate(&mut layout, author);
    }
    layout
}

fn truncate(layout: &mut MessageLayout, author: &str) {
    let keep = MAX_MESSAGE_LINES - 1;
    layout.lines.truncate(keep);
    layout.overlays.retain(|overlay| overlay.line < keep);

    // Links are recorded in line order, so dropped lines own a suffix.
    let kept_links =
        layout.overlays.iter().filter(|o| matches!(o.kind, OverlayKind::Link(_))).count();
    layout.links.truncate(kept_links);
    layout.more_marker = Some(format!("more \u{2014} {author}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::FixedFace;

    /// Kerns "AV" by -2 so kerning effects are observable.
    struct KerningFace;

    impl GlyphFace for KerningFace {
        fn advance(&mut self, _c: char) -> f32 {
            8.0
        }

        fn kern(&mut self, prev: char, c: char) -> f32 {
            if (prev, c) == ('A', 'V') { -2.0 } else { 0.0 }
        }

        fn draw_glyph(&mut self, _: &mut image::RgbaImage, _: f32, _: i32, _: char, _: image::Rgba<u8>) {}
    }

    fn lay(text: &str) -> MessageLayout {
        layout_message(&mut FixedFace::new(6.0), &GraphemeTable::empty(), text, 400, "bob", 0)
    }

    #[test]
    fn empty_text_has_no_lines() {
        let layout = lay("");
        assert!(layout.lines.is_empty());
        assert_eq!(layout.row_count(), 0);
    }

    #[test]
    fn pen_positions_advance_from_content_left() {
        let layout = lay("abc");
        let xs: Vec<f32> = layout.lines[0].glyphs.iter().map(|g| g.x).collect();
        assert_eq!(xs, vec![10.0, 16.0, 22.0]);
        assert_eq!(layout.lines[0].width, 18.0);
    }

    #[test]
    fn kerning_applies_between_adjacent_runes() {
        let layout =
            layout_message(&mut KerningFace, &GraphemeTable::empty(), "AVA", 400, "bob", 0);
        let xs: Vec<f32> = layout.lines[0].glyphs.iter().map(|g| g.x).collect();
        assert_eq!(xs, vec![10.0, 16.0, 24.0]);
    }

    #[test]
    fn kerning_skips_emoji_neighbours() {
        let table = GraphemeTable::from_sequences([vec!['V']]);
        let layout = layout_message(&mut KerningFace, &table, "AV", 400, "bob", 0);
        assert_eq!(layout.overlays[0].x, 18.0);
    }

    #[test]
    fn invisible_runes_take_no_space() {
        let layout = lay("a\u{FE0F}\u{200D}b\r");
        let glyphs: Vec<char> = layout.lines[0].glyphs.iter().map(|g| g.c).collect();
        assert_eq!(glyphs, vec!['a', 'b']);
        assert_eq!(layout.lines[0].width, 12.0);
    }

    #[test]
    fn tabs_expand_to_two_spaces() {
        assert_eq!(lay("\tx").lines[0].glyphs.len(), 3);
    }

    #[test]
    fn newlines_split_lines() {
        let layout = lay("one\n\nthree");
        assert_eq!(layout.lines.len(), 3);
        assert!(layout.lines[1].glyphs.is_empty());
    }

    #[test]
    fn link_runs_to_whitespace() {
        let layout = lay("see https://a.example/x and http://b");
        assert_eq!(layout.links, vec!["https://a.example/x".to_string(), "http://b".to_string()]);

        let badges: Vec<_> = layout.overlays.iter().map(|o| (o.kind, o.x)).collect();
        assert_eq!(badges, vec![(OverlayKind::Link(0), 34.0), (OverlayKind::Link(1), 178.0)]);
    }

    #[test]
    fn link_indices_continue_from_base() {
        let layout = layout_message(
            &mut FixedFace::new(6.0),
            &GraphemeTable::empty(),
            "http://a http://b",
            400,
            "bob",
            MAX_LINKS - 1,
        );
        assert_eq!(layout.links, vec!["http://a".to_string()]);
        assert_eq!(layout.overlays[0].kind, OverlayKind::Link(MAX_LINKS - 1));
    }

    #[test]
    fn oversized_glyph_still_occupies_a_line() {
        let layout = layout_message(&mut FixedFace::new(500.0), &GraphemeTable::empty(), "ab", 400, "bob", 0);
        assert_eq!(layout.lines.len(), 2);
        assert_eq!(layout.lines[1].glyphs[0].x, CONTENT_LEFT);
    }

    #[test]
    fn truncation_drops_overlays_and_links_on_hidden_lines() {
        let mut text = "x\n".repeat(9);
        text.push_str("http://late");
        let layout = lay(&text);

        assert_eq!(layout.lines.len(), MAX_MESSAGE_LINES - 1);
        assert!(layout.overlays.is_empty());
        assert!(layout.links.is_empty());
        assert_eq!(layout.more_marker.as_deref(), Some("more \u{2014} bob"));
        assert_eq!(layout.row_count(), MAX_MESSAGE_LINES);
    }
}

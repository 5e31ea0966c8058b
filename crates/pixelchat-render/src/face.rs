//! Glyph faces: per-codepoint metrics and rasterization.
//!
//! Layout only needs advances and pairwise kerning, so a face is modelled as
//! a small stateful object rather than a shaping engine. Faces are not
//! `Sync`; the [`FacePool`](crate::FacePool) hands each render its own.

use std::collections::HashMap;

use cosmic_text::{
    Attrs, Buffer, Family, FontSystem, Metrics, Shaping, SwashCache, SwashContent,
};
use image::{Pixel, Rgba, RgbaImage};

/// Point size used for all text.
pub const FONT_SIZE: f32 = 16.0;

/// Metrics and rasterization for one font at one size.
pub trait GlyphFace: Send {
    /// Horizontal advance of `c` in pixels.
    fn advance(&mut self, c: char) -> f32;

    /// Kerning adjustment between `prev` and `c`.
    fn kern(&mut self, prev: char, c: char) -> f32;

    /// Rasterize `c` with its pen at `x` on `baseline`, blending `color` into
    /// `canvas`. Pixels outside the canvas are clipped.
    fn draw_glyph(&mut self, canvas: &mut RgbaImage, x: f32, baseline: i32, c: char, color: Rgba<u8>);

    /// Width of `text` drawn in one run.
    fn measure(&mut self, text: &str) -> f32 {
        let mut width = 0.0;
        let mut prev = None;
        for c in text.chars().filter(|c| !crate::layout::is_invisible(*c)) {
            if let Some(p) = prev {
                width += self.kern(p, c);
            }
            width += self.advance(c);
            prev = Some(c);
        }
        width
    }
}

/// Monospace face with a fixed advance and no kerning.
///
/// Draws each visible glyph as a solid block, which is enough to tell
/// rendered text apart from background in tests and diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct FixedFace {
    advance: f32,
}

impl FixedFace {
    /// Face advancing `advance` pixels per code point.
    pub fn new(advance: f32) -> Self {
        Self { advance }
    }
}

impl GlyphFace for FixedFace {
    fn advance(&mut self, _c: char) -> f32 {
        self.advance
    }

    fn kern(&mut self, _prev: char, _c: char) -> f32 {
        0.0
    }

    fn draw_glyph(&mut self, canvas: &mut RgbaImage, x: f32, baseline: i32, c: char, color: Rgba<u8>) {
        if c.is_whitespace() {
            return;
        }
        let left = x.round() as i32;
        let right = left + (self.advance as i32 - 1).max(1);
        crate::paint::fill_rect(canvas, left, baseline - 11, right, baseline, color);
    }
}

/// Face backed by cosmic-text shaping and swash rasterization.
///
/// Advances and kerning pairs are shaped once and cached.
pub struct CosmicFace {
    font_system: FontSystem,
    swash_cache: SwashCache,
    metrics: Metrics,
    family: Option<String>,
    advances: HashMap<char, f32>,
    kerning: HashMap<(char, char), f32>,
}

impl CosmicFace {
    /// Load system fonts plus an optional font file.
    ///
    /// Text is set in `family` when given, otherwise in the system sans-serif
    /// family.
    pub fn new(font_data: Option<&[u8]>, family: Option<String>) -> Self {
        let mut font_system = FontSystem::new();
        if let Some(data) = font_data {
            font_system.db_mut().load_font_data(data.to_vec());
        }

        Self {
            font_system,
            swash_cache: SwashCache::new(),
            metrics: Metrics::new(FONT_SIZE, FONT_SIZE * 1.25),
            family,
            advances: HashMap::new(),
            kerning: HashMap::new(),
        }
    }

    fn shape(&mut self, text: &str) -> Buffer {
        let attrs = Attrs::new().family(select_family(self.family.as_deref()));

        let mut buffer = Buffer::new(&mut self.font_system, self.metrics);
        buffer.set_size(&mut self.font_system, None, None);
        buffer.set_text(&mut self.font_system, text, &attrs, Shaping::Advanced);
        buffer.shape_until_scroll(&mut self.font_system, false);
        buffer
    }

    fn shaped_width(&mut self, text: &str) -> f32 {
        let buffer = self.shape(text);
        buffer.layout_runs().map(|run| run.line_w).fold(0.0, f32::max)
    }
}

impl GlyphFace for CosmicFace {
    fn advance(&mut self, c: char) -> f32 {
        if let Some(&advance) = self.advances.get(&c) {
            return advance;
        }
        let advance = self.shaped_width(c.encode_utf8(&mut [0u8; 4]));
        self.advances.insert(c, advance);
        advance
    }

    fn kern(&mut self, prev: char, c: char) -> f32 {
        if let Some(&kern) = self.kerning.get(&(prev, c)) {
            return kern;
        }
        let pair: String = [prev, c].iter().collect();
        let kern = self.shaped_width(&pair) - self.advance(prev) - self.advance(c);
        self.kerning.insert((prev, c), kern);
        kern
    }

    fn draw_glyph(&mut self, canvas: &mut RgbaImage, x: f32, baseline: i32, c: char, color: Rgba<u8>) {
        if c.is_whitespace() {
            return;
        }
        let buffer = self.shape(c.encode_utf8(&mut [0u8; 4]));

        for run in buffer.layout_runs() {
            let offset_y = baseline as f32 - run.line_y;

            for glyph in run.glyphs {
                let physical_glyph = glyph.physical((x, offset_y), 1.0);

                let Some(image) =
                    self.swash_cache.get_image(&mut self.font_system, physical_glyph.cache_key)
                else {
                    continue;
                };

                let glyph_x = physical_glyph.x + image.placement.left;
                let glyph_y = physical_glyph.y + run.line_y as i32 - image.placement.top;
                let glyph_width = image.placement.width as usize;
                let glyph_height = image.placement.height as usize;

                for cy in 0..glyph_height {
                    for cx in 0..glyph_width {
                        let ink = match image.content {
                            SwashContent::Mask => {
                                let alpha = image.data[cy * glyph_width + cx];
                                Rgba([color[0], color[1], color[2], alpha])
                            },
                            SwashContent::Color => {
                                let i = (cy * glyph_width + cx) * 4;
                                Rgba([
                                    image.data[i],
                                    image.data[i + 1],
                                    image.data[i + 2],
                                    image.data[i + 3],
                                ])
                            },
                            SwashContent::SubpixelMask => continue,
                        };
                        if ink[3] == 0 {
                            continue;
                        }

                        let px = glyph_x + cx as i32;
                        let py = glyph_y + cy as i32;
                        if px < 0 || py < 0 || px >= canvas.width() as i32 || py >= canvas.height() as i32 {
                            continue;
                        }
                        canvas.get_pixel_mut(px as u32, py as u32).blend(&ink);
                    }
                }
            }
        }
    }

    fn measure(&mut self, text: &str) -> f32 {
        self.shaped_width(text)
    }
}

/// The configured family, or the system sans-serif.
fn select_family(name: Option<&str>) -> Family<'_> {
    name.map_or(Family::SansSerif, Family::Name)
}

//! Frame composition: message log plus status bar into one bitmap.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use bytes::Bytes;
use chrono::{DateTime, Local, TimeZone};
use image::{Rgba, RgbaImage};
use pixelchat_proto::{Message, MessageKind};
use tracing::{error, warn};

use crate::{
    encode::{EncodedFrame, FrameFormat, NOTICE_JPEG_QUALITY},
    error::RenderError,
    face::GlyphFace,
    grapheme::{GraphemeTable, SPRITE_SIZE},
    layout::{self, CONTENT_LEFT, EMOJI_ADVANCE, MessageLayout, OverlayKind},
    paint,
    pool::FacePool,
};

/// Baseline-to-baseline distance.
pub const LINE_HEIGHT: i32 = 22;

/// Height of the status bar.
pub const BAR_HEIGHT: i32 = LINE_HEIGHT * 3 / 2;

const MARGIN: i32 = 4;
const BAR_MARGIN: i32 = MARGIN * 3 / 2;
const BADGE_SIZE: i32 = 16;

/// Supported output sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewportClass {
    /// 400x960
    Narrow,
    /// 800x960
    Wide,
}

impl ViewportClass {
    /// Every class, narrowest first.
    pub const ALL: [Self; 2] = [Self::Narrow, Self::Wide];

    /// Class for a requested width: 800 selects `Wide`, anything else
    /// `Narrow`.
    pub fn from_width(width: u32) -> Self {
        if width == 800 { Self::Wide } else { Self::Narrow }
    }

    /// Canvas size in pixels.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Narrow => (400, 960),
            Self::Wide => (800, 960),
        }
    }

    /// Position in [`ViewportClass::ALL`].
    pub fn index(self) -> usize {
        match self {
            Self::Narrow => 0,
            Self::Wide => 1,
        }
    }
}

/// Everything a frame shows, snapshotted from a channel.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    /// Message log, oldest first
    pub messages: &'a [Message],
    /// Connected viewers
    pub viewers: usize,
    /// Bytes delivered by the channel so far
    pub traffic_bytes: u64,
    /// Size of the previous frame for this class
    pub last_frame_bytes: usize,
    /// Duration of the previous render
    pub last_render_ms: u64,
    /// Wall clock, seconds since the Unix epoch
    pub now_secs: i64,
}

/// A composed frame before encoding.
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    /// The bitmap
    pub image: RgbaImage,
    /// Links badged in the frame, by badge index
    pub links: Vec<String>,
}

/// Renders channel state into frames.
///
/// One renderer is shared by every channel; the face pool and grapheme table
/// are process-wide.
pub struct FrameRenderer {
    faces: FacePool,
    graphemes: Arc<GraphemeTable>,
    atlas: Option<RgbaImage>,
    format: FrameFormat,
}

impl FrameRenderer {
    /// Build a renderer. Without an atlas, emoji render as placeholder tiles.
    pub fn new(faces: FacePool, graphemes: Arc<GraphemeTable>, atlas: Option<RgbaImage>, format: FrameFormat) -> Self {
        Self { faces, graphemes, atlas, format }
    }

    /// Decode a PNG sprite atlas.
    ///
    /// # Errors
    ///
    /// Returns `RenderError::Asset` if the bytes are not a decodable image.
    pub fn load_atlas(png: &[u8]) -> Result<RgbaImage, RenderError> {
        image::load_from_memory(png).map(|img| img.to_rgba8()).map_err(|e| RenderError::Asset(e.to_string()))
    }

    /// Faces waiting in the pool between renders.
    pub fn idle_faces(&self) -> usize {
        self.faces.idle_count()
    }

    /// Codec used for streamed frames.
    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Compose a frame for `class`.
    ///
    /// A panic while drawing is caught and logged; the face still returns to
    /// the pool and `None` is returned so the caller keeps its previous frame.
    pub fn render(&self, input: &FrameInput<'_>, class: ViewportClass) -> Option<RenderedFrame> {
        let mut face = self.faces.checkout();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.compose(&mut *face, input, class)));

        match outcome {
            Ok(frame) => Some(frame),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                error!(?class, %reason, "frame render panicked");
                None
            },
        }
    }

    /// Compose and encode a frame for `class`.
    pub fn render_encoded(&self, input: &FrameInput<'_>, class: ViewportClass) -> Option<(EncodedFrame, Vec<String>)> {
        let frame = self.render(input, class)?;
        match self.encode(&frame.image) {
            Ok(data) => Some((EncodedFrame { data, content_type: self.format.content_type() }, frame.links)),
            Err(e) => {
                warn!(?class, error = %e, "frame encode failed");
                None
            },
        }
    }

    /// Encode with the configured stream codec.
    ///
    /// # Errors
    ///
    /// Propagates encoder failures.
    pub fn encode(&self, image: &RgbaImage) -> Result<Bytes, RenderError> {
        self.format.encode(image)
    }

    /// A white JPEG sized for `class` with `text` centered near the bottom.
    ///
    /// Used for rejected joins and displacement notices. Never fails: an
    /// encoder error yields an empty frame, which viewers ignore.
    pub fn error_frame(&self, class: ViewportClass, text: &str) -> EncodedFrame {
        let (w, h) = class.dimensions();
        let mut canvas = RgbaImage::from_pixel(w, h, paint::WHITE);

        let mut face = self.faces.checkout();
        let drawn = panic::catch_unwind(AssertUnwindSafe(|| {
            let width = face.measure(text);
            let x = (w as f32 - width) / 2.0;
            draw_text(&mut *face, &mut canvas, x, h as i32 - 10, text, paint::BLACK);
        }));
        if drawn.is_err() {
            error!(?class, "error frame render panicked");
        }

        let data = FrameFormat::Jpeg { quality: NOTICE_JPEG_QUALITY }.encode(&canvas).unwrap_or_else(|e| {
            warn!(error = %e, "error frame encode failed");
            Bytes::new()
        });
        EncodedFrame::jpeg(data)
    }

    fn compose(&self, face: &mut dyn GlyphFace, input: &FrameInput<'_>, class: ViewportClass) -> RenderedFrame {
        let (w, h) = class.dimensions();
        let (wi, hi) = (w as i32, h as i32);
        let mut canvas = RgbaImage::from_pixel(w, h, paint::WHITE);
        let mut links = Vec::new();
        let now = local_time(input.now_secs);

        let mut y = hi - MARGIN * 2 - BAR_HEIGHT;

        for (index, message) in input.messages.iter().enumerate().rev() {
            if message.kind.is_presence() {
                let verb = if message.kind == MessageKind::Join { "joined" } else { "left" };
                let tail = format!(" {verb} at {}", clock(message.unix_time, "%H:%M"));
                let total = face.measure(&message.from) + face.measure(&tail);
                let x = ((w as f32 - total) / 2.0).round();
                let x = draw_text(face, &mut canvas, x, y, &message.from, paint::BLUE);
                draw_text(face, &mut canvas, x, y, &tail, paint::BLACK);
                y -= LINE_HEIGHT * 5 / 4;
            } else {
                let layout = layout::layout_message(face, &self.graphemes, &message.text, w, &message.from, links.len());
                let rows = layout.row_count() as i32;
                y -= rows * LINE_HEIGHT - LINE_HEIGHT;

                if index % 2 == 0 {
                    paint::fill_rect(
                        &mut canvas,
                        0,
                        y - LINE_HEIGHT * 2,
                        wi,
                        y + rows * LINE_HEIGHT - LINE_HEIGHT * 5 / 8,
                        paint::GRAY_BAND,
                    );
                }
                self.draw_body(face, &mut canvas, &layout, y);
                links.extend(layout.links);

                y -= LINE_HEIGHT;
                let x = draw_text(face, &mut canvas, MARGIN as f32, y, &message.from, paint::BLUE);
                let stamp = match (local_time(message.unix_time), now) {
                    (Some(at), Some(now)) if at.date_naive() == now.date_naive() => at.format("%H:%M:%S").to_string(),
                    _ => clock(message.unix_time, "%m-%d %H:%M"),
                };
                draw_text(face, &mut canvas, x + (MARGIN * 2) as f32, y, &stamp, paint::BLACK);
                y -= LINE_HEIGHT * 5 / 4;
            }

            if y < 0 {
                break;
            }
        }

        self.draw_status_bar(face, &mut canvas, input);
        RenderedFrame { image: canvas, links }
    }

    fn draw_body(&self, face: &mut dyn GlyphFace, canvas: &mut RgbaImage, layout: &MessageLayout, top: i32) {
        let w = canvas.width() as f32;

        for (row, line) in layout.lines.iter().enumerate() {
            let baseline = top + row as i32 * LINE_HEIGHT;
            for glyph in &line.glyphs {
                face.draw_glyph(canvas, glyph.x, baseline, glyph.c, paint::BLACK);
            }
        }

        if let Some(marker) = &layout.more_marker {
            let baseline = top + layout.lines.len() as i32 * LINE_HEIGHT;
            let x = w - face.measure(marker) - CONTENT_LEFT;
            draw_text(face, canvas, x, baseline, marker, paint::GRAY_TEXT);
        }

        for overlay in &layout.overlays {
            let x = overlay.x.round() as i32;
            let cell_top = top + overlay.line as i32 * LINE_HEIGHT - LINE_HEIGHT;
            match overlay.kind {
                OverlayKind::Link(index) => {
                    let label = format!("{index:x}");
                    paint::blend_rect(canvas, x, cell_top + 4, x + BADGE_SIZE, cell_top + 4 + BADGE_SIZE, paint::BADGE);
                    let lx = x as f32 + (BADGE_SIZE as f32 - face.measure(&label)) / 2.0;
                    draw_text(face, canvas, lx, cell_top + 17, &label, paint::WHITE);
                },
                OverlayKind::Emoji(cell) => {
                    let inset = (EMOJI_ADVANCE as i32 - SPRITE_SIZE as i32) / 2;
                    paint::blit_sprite(canvas, self.atlas.as_ref(), cell, x + inset, cell_top + 4);
                },
            }
        }
    }

    fn draw_status_bar(&self, face: &mut dyn GlyphFace, canvas: &mut RgbaImage, input: &FrameInput<'_>) {
        let (w, h) = (canvas.width() as i32, canvas.height() as i32);
        let top = h - BAR_HEIGHT;
        let baseline = h - (BAR_HEIGHT - paint::ICON_SIZE) / 2 - 3;

        paint::fill_rect(canvas, 0, top, w, h, paint::WHEAT);

        let count = input.viewers.to_string();
        let count_x = BAR_MARGIN + paint::ICON_SIZE + BAR_MARGIN;
        let badge_right = count_x + face.measure(&count).round() as i32 + BAR_MARGIN;
        paint::fill_rect(canvas, 0, top, badge_right, h, paint::GRAY_BAR);
        paint::draw_user_icon(canvas, BAR_MARGIN, top + (BAR_HEIGHT - paint::ICON_SIZE) / 2);
        draw_text(face, canvas, count_x as f32, baseline, &count, paint::BLACK);

        let now = clock(input.now_secs, "%H:%M");
        draw_text(face, canvas, (badge_right + BAR_MARGIN * 2) as f32, baseline, &now, paint::BLACK);

        let traffic = traffic_readout(input);
        let x = w as f32 - CONTENT_LEFT - face.measure(&traffic);
        draw_text(face, canvas, x, baseline, &traffic, paint::BLACK);

        paint::fill_rect(canvas, 0, h - 2, badge_right, h, paint::GRAY_RULE);
        paint::fill_rect(canvas, badge_right, h - 2, w, h, paint::WHEAT_RULE);
    }
}

/// `"{fps}fps {last KiB}:{total MiB}M"` for the status bar.
pub fn traffic_readout(input: &FrameInput<'_>) -> String {
    let fps = 1000.0 / input.last_render_ms.max(1) as f64;
    let total_mib = input.traffic_bytes as f64 / 1024.0 / 1024.0;
    format!("{fps:.1}fps {}:{total_mib:.2}M", input.last_frame_bytes / 1024)
}

/// Draw `text` as a kerned run; returns the pen position after it.
fn draw_text(face: &mut dyn GlyphFace, canvas: &mut RgbaImage, x: f32, baseline: i32, text: &str, color: Rgba<u8>) -> f32 {
    let mut pen = x;
    let mut prev = None;
    for c in text.chars().filter(|c| !layout::is_invisible(*c)) {
        if let Some(p) = prev {
            pen += face.kern(p, c);
        }
        face.draw_glyph(canvas, pen, baseline, c, color);
        pen += face.advance(c);
        prev = Some(c);
    }
    pen
}

fn local_time(secs: i64) -> Option<DateTime<Local>> {
    Local.timestamp_opt(secs, 0).single()
}

fn clock(secs: i64, pattern: &str) -> String {
    local_time(secs).map(|t| t.format(pattern).to_string()).unwrap_or_default()
}

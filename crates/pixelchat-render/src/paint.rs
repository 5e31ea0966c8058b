//! Canvas primitives: rectangles, icons and sprite blits.

use image::{Pixel, Rgba, RgbaImage, imageops};

use crate::grapheme::{SPRITE_SIZE, SpriteCell};

pub(crate) const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub(crate) const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub(crate) const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
pub(crate) const BADGE: Rgba<u8> = Rgba([0, 0, 255, 120]);
pub(crate) const GRAY_BAR: Rgba<u8> = Rgba([200, 200, 200, 255]);
pub(crate) const GRAY_BAND: Rgba<u8> = Rgba([245, 245, 245, 255]);
pub(crate) const GRAY_RULE: Rgba<u8> = Rgba([180, 180, 180, 255]);
pub(crate) const GRAY_TEXT: Rgba<u8> = Rgba([120, 120, 120, 255]);
pub(crate) const WHEAT: Rgba<u8> = Rgba([0xff, 0xec, 0xb3, 255]);
pub(crate) const WHEAT_RULE: Rgba<u8> = Rgba([0xee, 0xdb, 0xa2, 255]);

/// Edge of the status bar user icon.
pub(crate) const ICON_SIZE: i32 = 16;

/// Overwrite the half-open rectangle `[x0, x1) x [y0, y1)`, clipped to the
/// canvas.
pub(crate) fn fill_rect(canvas: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgba<u8>) {
    for_each_clipped(canvas, x0, y0, x1, y1, |pixel| *pixel = color);
}

/// Alpha-blend `color` over the half-open rectangle, clipped to the canvas.
pub(crate) fn blend_rect(canvas: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgba<u8>) {
    for_each_clipped(canvas, x0, y0, x1, y1, |pixel| pixel.blend(&color));
}

fn for_each_clipped(
    canvas: &mut RgbaImage,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
    mut f: impl FnMut(&mut Rgba<u8>),
) {
    let x0 = x0.clamp(0, canvas.width() as i32) as u32;
    let x1 = x1.clamp(0, canvas.width() as i32) as u32;
    let y0 = y0.clamp(0, canvas.height() as i32) as u32;
    let y1 = y1.clamp(0, canvas.height() as i32) as u32;

    for y in y0..y1 {
        for x in x0..x1 {
            f(canvas.get_pixel_mut(x, y));
        }
    }
}

/// Head-and-shoulders silhouette in an `ICON_SIZE` square at `(x, y)`.
pub(crate) fn draw_user_icon(canvas: &mut RgbaImage, x: i32, y: i32) {
    let size = ICON_SIZE as f32;
    for dy in 0..ICON_SIZE {
        for dx in 0..ICON_SIZE {
            let (px, py) = (dx as f32 + 0.5, dy as f32 + 0.5);
            let head = (px - size / 2.0).powi(2) + (py - 5.0).powi(2) <= 3.5f32.powi(2);
            let shoulders = py >= 10.0 && (px - size / 2.0).powi(2) + (py - size).powi(2) <= 7.0f32.powi(2);
            if head || shoulders {
                blend_rect(canvas, x + dx, y + dy, x + dx + 1, y + dy + 1, GRAY_TEXT);
            }
        }
    }
}

/// Copy one emoji sprite from `atlas` onto the canvas. Without an atlas a
/// placeholder tile is drawn instead.
pub(crate) fn blit_sprite(canvas: &mut RgbaImage, atlas: Option<&RgbaImage>, cell: SpriteCell, x: i32, y: i32) {
    let Some(atlas) = atlas else {
        let edge = SPRITE_SIZE as i32;
        fill_rect(canvas, x + 2, y + 2, x + edge - 2, y + edge - 2, WHEAT);
        return;
    };

    if cell.x + SPRITE_SIZE > atlas.width() || cell.y + SPRITE_SIZE > atlas.height() {
        return;
    }
    let sprite = imageops::crop_imm(atlas, cell.x, cell.y, SPRITE_SIZE, SPRITE_SIZE).to_image();
    imageops::overlay(canvas, &sprite, i64::from(x), i64::from(y));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_rect_clips_to_canvas() {
        let mut canvas = RgbaImage::from_pixel(4, 4, WHITE);
        fill_rect(&mut canvas, -2, -2, 2, 2, BLACK);

        assert_eq!(*canvas.get_pixel(0, 0), BLACK);
        assert_eq!(*canvas.get_pixel(1, 1), BLACK);
        assert_eq!(*canvas.get_pixel(2, 2), WHITE);
    }

    #[test]
    fn inverted_rect_is_noop() {
        let mut canvas = RgbaImage::from_pixel(4, 4, WHITE);
        fill_rect(&mut canvas, 3, 3, 1, 1, BLACK);
        assert!(canvas.pixels().all(|p| *p == WHITE));
    }

    #[test]
    fn blend_keeps_opaque_background() {
        let mut canvas = RgbaImage::from_pixel(2, 2, WHITE);
        blend_rect(&mut canvas, 0, 0, 1, 1, BADGE);
        let p = canvas.get_pixel(0, 0);
        assert_eq!(p[3], 255);
        assert!(p[2] == 255 && p[0] < 255);
    }

    #[test]
    fn sprite_is_copied_from_atlas_cell() {
        let mut atlas = RgbaImage::from_pixel(48, 24, WHITE);
        fill_rect(&mut atlas, 24, 0, 48, 24, BLUE);

        let mut canvas = RgbaImage::from_pixel(30, 30, WHITE);
        blit_sprite(&mut canvas, Some(&atlas), SpriteCell { x: 24, y: 0 }, 3, 4);

        assert_eq!(*canvas.get_pixel(3, 4), BLUE);
        assert_eq!(*canvas.get_pixel(26, 27), BLUE);
        assert_eq!(*canvas.get_pixel(2, 4), WHITE);
    }

    #[test]
    fn out_of_range_cell_is_skipped() {
        let atlas = RgbaImage::from_pixel(24, 24, BLUE);
        let mut canvas = RgbaImage::from_pixel(30, 30, WHITE);
        blit_sprite(&mut canvas, Some(&atlas), SpriteCell { x: 24, y: 0 }, 0, 0);
        assert!(canvas.pixels().all(|p| *p == WHITE));
    }
}

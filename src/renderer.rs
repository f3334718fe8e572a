use anyhow::{Context, Result};
use eframe::egui::{self, Color32, ColorImage};

use crate::gesture::ViewTransform;

/// Largest edge uploaded as a texture; bigger images are downsampled first.
pub const MAX_TEXTURE_DIM: u32 = 4096;

pub fn decode_color_image(bytes: &[u8]) -> Result<ColorImage> {
    let decoded = image::load_from_memory(bytes).context("Could not decode image bytes")?;
    let decoded = if decoded.width() > MAX_TEXTURE_DIM || decoded.height() > MAX_TEXTURE_DIM {
        decoded.thumbnail(MAX_TEXTURE_DIM, MAX_TEXTURE_DIM)
    } else {
        decoded
    };
    let rgba = decoded.to_rgba8();
    Ok(render_rgba(
        rgba.width() as usize,
        rgba.height() as usize,
        rgba.as_raw(),
    ))
}

pub fn render_rgba(width_px: usize, height_px: usize, frame_pixels: &[u8]) -> ColorImage {
    let pixel_count = width_px.saturating_mul(height_px);
    let mut pixels = Vec::with_capacity(pixel_count);

    for chunk in frame_pixels.chunks_exact(4).take(pixel_count) {
        pixels.push(Color32::from_rgba_unmultiplied(
            chunk[0], chunk[1], chunk[2], chunk[3],
        ));
    }

    if pixels.len() < pixel_count {
        pixels.resize(pixel_count, Color32::BLACK);
    }

    ColorImage {
        size: [width_px, height_px],
        pixels,
    }
}

/// Size of the image when fitted inside `canvas` at scale 1.
pub fn fit_size(canvas: egui::Rect, image_size: egui::Vec2) -> egui::Vec2 {
    if image_size.x <= 0.0 || image_size.y <= 0.0 {
        return egui::Vec2::ZERO;
    }
    let fit_scale = (canvas.width() / image_size.x)
        .min(canvas.height() / image_size.y)
        .max(0.01);
    image_size * fit_scale
}

/// Screen rect for the image: `scale(s)` about the canvas center, then the
/// pre-scale translation `(tx / s, ty / s)`.
pub fn image_rect(
    canvas: egui::Rect,
    image_size: egui::Vec2,
    transform: &ViewTransform,
) -> egui::Rect {
    let render = transform.render();
    let offset = render.screen_offset();
    let draw_size = fit_size(canvas, image_size) * render.scale;
    egui::Rect::from_center_size(canvas.center() + egui::vec2(offset.x, offset.y), draw_size)
}

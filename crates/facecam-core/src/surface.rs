//! Drawing surfaces for the detection overlay.
//!
//! The overlay is drawn on top of the live video: a transparent surface that
//! is cleared and redrawn on every tick.

use crate::types::BoundingBox;
use ab_glyph::FontVec;
use image::{imageops, DynamicImage, GrayImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use serde::Serialize;
use std::path::Path;

/// Stroke used for face bounding boxes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StrokeStyle {
    pub color: [u8; 4],
    pub line_width: u32,
}

/// Fill used for overlay labels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TextStyle {
    pub color: [u8; 4],
    /// Glyph height in pixels.
    pub size: f32,
}

/// Caption drawn in the top-left corner of saved snapshots.
const CAPTION_STYLE: TextStyle = TextStyle {
    color: [0xff, 0x00, 0x00, 0xff],
    size: 20.0,
};
const CAPTION_ORIGIN: (f32, f32) = (10.0, 30.0);

/// A 2D surface the render step draws onto.
pub trait DrawingSurface: Send {
    /// Resize to the stream's native resolution. Clears existing content.
    fn resize(&mut self, width: u32, height: u32);
    fn size(&self) -> (u32, u32);
    fn clear(&mut self);
    fn stroke_rect(&mut self, bbox: &BoundingBox, style: &StrokeStyle);
    /// Draw `text` with its baseline at `(x, y)`.
    fn fill_text(&mut self, text: &str, x: f32, y: f32, style: &TextStyle);
}

/// A recorded drawing command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    Rect { bbox: BoundingBox, style: StrokeStyle },
    Text { text: String, x: f32, y: f32, style: TextStyle },
}

/// Surface that records draw commands instead of rasterizing them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DisplayList {
    width: u32,
    height: u32,
    ops: Vec<DrawOp>,
}

impl DisplayList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    /// Text of every recorded label, in draw order.
    pub fn texts(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.as_str()),
                DrawOp::Rect { .. } => None,
            })
            .collect()
    }
}

impl DrawingSurface for DisplayList {
    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.ops.clear();
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear(&mut self) {
        self.ops.clear();
    }

    fn stroke_rect(&mut self, bbox: &BoundingBox, style: &StrokeStyle) {
        self.ops.push(DrawOp::Rect {
            bbox: *bbox,
            style: *style,
        });
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, style: &TextStyle) {
        self.ops.push(DrawOp::Text {
            text: text.to_string(),
            x,
            y,
            style: *style,
        });
    }
}

/// Transparent RGBA overlay rasterized with `imageproc`.
///
/// Labels need a TrueType/OpenType font; without one only boxes are drawn.
pub struct RasterSurface {
    image: RgbaImage,
    font: Option<FontVec>,
}

impl RasterSurface {
    pub fn new(font: Option<FontVec>) -> Self {
        Self {
            image: RgbaImage::new(0, 0),
            font,
        }
    }

    /// Load the label font from a file; returns `None` (and logs) on failure.
    pub fn load_font(path: &Path) -> Option<FontVec> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read overlay font");
                return None;
            }
        };
        match FontVec::try_from_vec(bytes) {
            Ok(font) => Some(font),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "invalid overlay font");
                None
            }
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Write the current overlay as a PNG (format chosen from the extension).
    pub fn save(&self, path: &Path) -> Result<(), image::ImageError> {
        self.image.save(path)
    }

    /// Flatten the overlay onto `background`, optionally stamping `caption`
    /// in the top-left corner. The overlay is anchored at the origin.
    pub fn snapshot(&self, background: &RgbaImage, caption: Option<&str>) -> RgbaImage {
        let mut out = background.clone();
        imageops::overlay(&mut out, &self.image, 0, 0);
        if let Some(text) = caption {
            let (x, y) = CAPTION_ORIGIN;
            draw_label(&mut out, self.font.as_ref(), text, x, y, &CAPTION_STYLE);
        }
        out
    }
}

/// Expand a grayscale frame into an opaque RGBA image.
///
/// Returns `None` when `gray` is shorter than `width * height`.
pub fn gray_background(gray: &[u8], width: u32, height: u32) -> Option<RgbaImage> {
    let len = width as usize * height as usize;
    let pixels = gray.get(..len)?.to_vec();
    GrayImage::from_raw(width, height, pixels).map(|g| DynamicImage::ImageLuma8(g).to_rgba8())
}

fn draw_label(
    image: &mut RgbaImage,
    font: Option<&FontVec>,
    text: &str,
    x: f32,
    y: f32,
    style: &TextStyle,
) {
    let Some(font) = font else {
        tracing::trace!(text, "no overlay font loaded; label skipped");
        return;
    };
    // imageproc positions glyphs by their top edge, not the baseline.
    let top = (y - style.size).round() as i32;
    draw_text_mut(
        image,
        Rgba(style.color),
        x.round() as i32,
        top,
        style.size,
        font,
        text,
    );
}

impl DrawingSurface for RasterSurface {
    fn resize(&mut self, width: u32, height: u32) {
        self.image = RgbaImage::new(width, height);
    }

    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn stroke_rect(&mut self, bbox: &BoundingBox, style: &StrokeStyle) {
        let x = bbox.x.round() as i32;
        let y = bbox.y.round() as i32;
        let w = bbox.width.round().max(0.0) as u32;
        let h = bbox.height.round().max(0.0) as u32;
        // Each pass insets by one pixel; stop once the rect would collapse.
        for inset in 0..style.line_width {
            let i = inset as i32;
            let (Some(iw), Some(ih)) = (w.checked_sub(2 * inset), h.checked_sub(2 * inset)) else {
                break;
            };
            if iw == 0 || ih == 0 {
                break;
            }
            let rect = Rect::at(x + i, y + i).of_size(iw, ih);
            draw_hollow_rect_mut(&mut self.image, rect, Rgba(style.color));
        }
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, style: &TextStyle) {
        draw_label(&mut self.image, self.font.as_ref(), text, x, y, style);
    }
}

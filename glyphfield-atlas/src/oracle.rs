//! SDF oracle — the glyph generator the cache drives.
//!
//! The oracle is a client-supplied collaborator (typically a WASM
//! build of an MSDF generator). It owns font parsing and distance
//! field math; the cache only schedules calls into it and stores the
//! pixels it returns. `None` from a generate call means the glyph is
//! present in the font but has no visible pixels (a space), which the
//! cache records as an empty glyph rather than an error.

/// Glyph-local plane bounds, in glyph units relative to the baseline.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlaneBounds {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

/// Metrics for one glyph at a given generation size.
///
/// `width`, `height`, and `advance` are pixel values at the generation
/// size. The all-zero default is the placeholder stored for glyphs
/// that are reserved but not yet filled.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GlyphMetrics {
    pub width: u32,
    pub height: u32,
    /// Horizontal advance in pixels.
    pub advance: i32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub plane: PlaneBounds,
}

/// A single variation axis setting, e.g. `wght` = 700.
#[derive(Clone, Debug, PartialEq)]
pub struct VariationAxis {
    /// Four-character OpenType axis tag.
    pub tag: String,
    pub value: f32,
}

/// Raw oracle output: float pixels in `[0, 1]`, row 0 at the top.
///
/// `pixels.len() == metrics.width * metrics.height * channels`, with
/// `channels` 3 for MSDF and 4 for MTSDF.
#[derive(Clone, Debug)]
pub struct SdfBitmap {
    pub metrics: GlyphMetrics,
    pub channels: usize,
    pub pixels: Vec<f32>,
}

/// Client-supplied SDF glyph generator.
///
/// Calls are deterministic given the loaded font and arguments, so the
/// cache never retries. `load_font` must be idempotent for the same
/// bytes; the deferred drain calls it once per queued glyph.
pub trait SdfOracle {
    /// Load (or re-select) the font the following calls operate on.
    fn load_font(&mut self, font: &[u8]);

    /// Whether the loaded font maps this code point to a glyph.
    fn has_glyph(&self, code_point: u32) -> bool;

    /// Generate a 3-channel MSDF bitmap, or `None` for an invisible glyph.
    fn generate_msdf(&mut self, code_point: u32, font_size: u32, pixel_range: f32)
        -> Option<SdfBitmap>;

    /// Generate a 4-channel MTSDF bitmap, or `None` for an invisible glyph.
    fn generate_mtsdf(&mut self, code_point: u32, font_size: u32, pixel_range: f32)
        -> Option<SdfBitmap>;

    /// Like [`generate_mtsdf`](Self::generate_mtsdf), honoring the axes
    /// installed by the latest `set_variation_axes` call.
    fn generate_mtsdf_var(&mut self, code_point: u32, font_size: u32, pixel_range: f32)
        -> Option<SdfBitmap>;

    /// Install variation axis settings for subsequent `_var` calls.
    fn set_variation_axes(&mut self, axes: &[VariationAxis]);

    /// Reset to the font's default axis values.
    fn clear_variation_axes(&mut self);
}

/// Quantize oracle floats to RGBA bytes.
///
/// Each channel maps through `round(clamp(v, 0, 1) * 255)`. Three
/// channel input is promoted to RGBA with alpha 255.
pub fn quantize_to_rgba(bitmap: &SdfBitmap) -> Vec<u8> {
    let pixel_count = (bitmap.metrics.width * bitmap.metrics.height) as usize;
    let mut out = Vec::with_capacity(pixel_count * 4);
    match bitmap.channels {
        4 => {
            for &v in &bitmap.pixels {
                out.push(quantize_channel(v));
            }
        }
        _ => {
            for chunk in bitmap.pixels.chunks_exact(3) {
                out.push(quantize_channel(chunk[0]));
                out.push(quantize_channel(chunk[1]));
                out.push(quantize_channel(chunk[2]));
                out.push(255);
            }
        }
    }
    out
}

#[inline]
fn quantize_channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

// ===================================================================
// Tests
// ===================================================================

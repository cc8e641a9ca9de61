//! Font atlas — multi-variant cache facade with deferred batched
//! generation.
//!
//! ```text
//! get_glyph(request)
//!     │  hit: GlyphInfo { cached: true }
//!     ▼
//! VariantAtlas (variant_id + "_" + gen_size)
//!     │  miss: reserve slot, enqueue, GlyphInfo { cached: false }
//!     ▼
//! pending FIFO ──► tick() drains ──► SdfOracle ──► fill / mark_empty
//!                                        │
//!                                        ▼
//!                              flush dirty pages ──► on_glyphs_ready
//! ```
//!
//! The scheduler is single-threaded cooperative: enqueue, reserve,
//! fill, flush, and the ready callback all run on the caller's thread.
//! Misses arm a one-shot drain; the host loop calls [`FontAtlas::tick`]
//! once per turn, so any number of misses within one turn coalesce into
//! a single drain and a single callback.

use std::collections::VecDeque;
use std::sync::Arc;

use lru::LruCache;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::oracle::{quantize_to_rgba, GlyphMetrics, SdfOracle, VariationAxis};
use crate::texture::{TextureBackend, TextureId};
use crate::variant::{latin_code_points, GlyphLocation, GlyphState, VariantAtlas};

#[derive(Debug, Error)]
pub enum AtlasError {
    /// The 62-glyph Latin set must fit its dedicated page at any
    /// supported generation size; overflow means the page size and
    /// generation sizes were configured inconsistently.
    #[error("latin page overflow: U+{code_point:04X} does not fit at generation size {gen_size}")]
    LatinPageOverflow { code_point: u32, gen_size: u32 },

    /// A single glyph is larger than an empty page. Raise `page_size`
    /// or lower the generation size.
    #[error("glyph U+{code_point:04X} ({width}x{height}) cannot fit an empty {page_size}x{page_size} page")]
    GlyphTooLarge {
        code_point: u32,
        width: u32,
        height: u32,
        page_size: u32,
    },

    #[error("invalid atlas configuration: {0}")]
    Config(String),
}

/// Font atlas configuration.
#[derive(Debug, Clone)]
pub struct AtlasConfig {
    /// Generation sizes, ascending. Every render request is served at
    /// one of these MIP-like sizes.
    pub gen_sizes: Vec<u32>,
    /// Render-size thresholds selecting between generation sizes; one
    /// fewer entry than `gen_sizes`.
    pub size_thresholds: Vec<u32>,
    /// Side of a square page in pixels.
    pub page_size: u32,
    /// Mixed-page cap per variant. Exceeding it warns and continues.
    pub max_mixed_pages: usize,
    /// Distance-field pixel range handed to the oracle.
    pub pixel_range: f32,
    /// Optional cap on live variant atlases; the least recently used
    /// are evicted after each drain. `None` disables eviction.
    pub max_variants: Option<usize>,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            gen_sizes: vec![32, 64, 128],
            size_thresholds: vec![40, 80],
            page_size: 1024,
            max_mixed_pages: 8,
            pixel_range: 4.0,
            max_variants: None,
        }
    }
}

impl AtlasConfig {
    fn validate(&self) -> Result<(), AtlasError> {
        if self.gen_sizes.is_empty() {
            return Err(AtlasError::Config("gen_sizes must not be empty".into()));
        }
        if self.gen_sizes.contains(&0) {
            return Err(AtlasError::Config("gen_sizes must be positive".into()));
        }
        if !self.gen_sizes.windows(2).all(|w| w[0] < w[1]) {
            return Err(AtlasError::Config(
                "gen_sizes must be strictly ascending".into(),
            ));
        }
        if self.size_thresholds.len() + 1 != self.gen_sizes.len() {
            return Err(AtlasError::Config(format!(
                "expected {} size_thresholds for {} gen_sizes, got {}",
                self.gen_sizes.len() - 1,
                self.gen_sizes.len(),
                self.size_thresholds.len()
            )));
        }
        if self.page_size == 0 {
            return Err(AtlasError::Config("page_size must be positive".into()));
        }
        if self.max_mixed_pages == 0 {
            return Err(AtlasError::Config("max_mixed_pages must be positive".into()));
        }
        if !(self.pixel_range > 0.0) {
            return Err(AtlasError::Config("pixel_range must be positive".into()));
        }
        Ok(())
    }
}

/// One glyph request from a text-rendering client.
#[derive(Clone, Debug)]
pub struct GlyphRequest {
    pub code_point: u32,
    /// Opaque style identifier ("Regular", "Bold 700", ...).
    pub variant_id: String,
    /// Requested render size in pixels; mapped onto a generation size.
    pub render_size: u32,
    /// Font file bytes. The Arc keeps them alive until the drain that
    /// consumes this request has run.
    pub font: Arc<Vec<u8>>,
    /// Variation axis settings; empty for static fonts.
    pub axes: Vec<VariationAxis>,
}

/// Client-facing view of a cached or reserved glyph.
///
/// This is a copy; the texture handle is stable from reservation
/// onward, but UVs and metrics of a `cached: false` info are
/// placeholders. Re-query after the ready callback.
#[derive(Clone, Debug)]
pub struct GlyphInfo {
    pub texture: TextureId,
    pub page_width: u32,
    pub page_height: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
    pub metrics: GlyphMetrics,
    /// Generation size the pixels were (or will be) produced at.
    pub gen_size: u32,
    /// Pixels are present; UVs and metrics are final.
    pub cached: bool,
    pub empty: bool,
    pub missing: bool,
}

/// Aggregate observability snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct AtlasStatus {
    /// Live variant atlases.
    pub atlas_count: usize,
    /// Pages across all variants.
    pub page_count: usize,
    /// Cached glyph locations across all variants.
    pub glyph_count: usize,
    /// CPU-side page memory: `page_count * page_size^2 * 4`.
    pub memory_bytes: usize,
}

struct PendingGlyph {
    code_point: u32,
    gen_size: u32,
    variant_key: String,
    font: Arc<Vec<u8>>,
    axes: Vec<VariationAxis>,
}

type ReadyCallback = Box<dyn FnMut()>;

/// The public facade: maps (variant, render size) onto variant atlases
/// and drives the SDF oracle through the deferred batch scheduler.
pub struct FontAtlas {
    config: AtlasConfig,
    backend: Box<dyn TextureBackend>,
    oracle: Box<dyn SdfOracle>,
    variants: FxHashMap<String, VariantAtlas>,
    /// Recency order over variant keys, for whole-variant eviction.
    recency: LruCache<String, ()>,
    queue: VecDeque<PendingGlyph>,
    drain_scheduled: bool,
    on_glyphs_ready: Option<ReadyCallback>,
}

impl FontAtlas {
    pub fn new(
        config: AtlasConfig,
        backend: Box<dyn TextureBackend>,
        oracle: Box<dyn SdfOracle>,
    ) -> Result<Self, AtlasError> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            oracle,
            variants: FxHashMap::default(),
            recency: LruCache::unbounded(),
            queue: VecDeque::new(),
            drain_scheduled: false,
            on_glyphs_ready: None,
        })
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    /// Install the callback fired after each non-empty drain has
    /// flushed its pages.
    pub fn set_on_glyphs_ready(&mut self, callback: impl FnMut() + 'static) {
        self.on_glyphs_ready = Some(Box::new(callback));
    }

    pub fn clear_on_glyphs_ready(&mut self) {
        self.on_glyphs_ready = None;
    }

    /// Look up a glyph. On a miss the slot is reserved, generation is
    /// queued for the next [`tick`](Self::tick), and the returned info
    /// has `cached: false` with the final texture handle already set.
    /// Re-requesting a pending code point is idempotent.
    pub fn get_glyph(&mut self, request: &GlyphRequest) -> GlyphInfo {
        let gen_size = self.select_gen_size(request.render_size);
        let key = variant_key(&request.variant_id, gen_size);
        let page_size = self.config.page_size;
        let max_mixed_pages = self.config.max_mixed_pages;
        let variant = self.variants.entry(key.clone()).or_insert_with(|| {
            log::debug!("creating variant atlas '{key}'");
            VariantAtlas::new(request.variant_id.clone(), gen_size, page_size, max_mixed_pages)
        });
        self.recency.put(key.clone(), ());

        match variant.lookup(request.code_point) {
            GlyphState::Ready(loc) => glyph_info(loc, gen_size, page_size, true),
            GlyphState::Pending(loc) => glyph_info(loc, gen_size, page_size, false),
            GlyphState::Absent => {
                let loc = variant.reserve(request.code_point, self.backend.as_mut());
                let info = glyph_info(loc, gen_size, page_size, false);
                self.queue.push_back(PendingGlyph {
                    code_point: request.code_point,
                    gen_size,
                    variant_key: key,
                    font: Arc::clone(&request.font),
                    axes: request.axes.clone(),
                });
                self.drain_scheduled = true;
                info
            }
        }
    }

    /// True while generations are queued or a drain is armed.
    pub fn has_pending_work(&self) -> bool {
        !self.queue.is_empty() || self.drain_scheduled
    }

    /// Run the armed drain, if any. Call once per host-loop turn.
    ///
    /// Processes the queue snapshot in enqueue order, flushes every
    /// dirty page, applies the variant cap, then fires the ready
    /// callback when the snapshot was non-empty. Requests enqueued
    /// during the drain wait for the next tick. Returns whether a
    /// drain ran.
    pub fn tick(&mut self) -> Result<bool, AtlasError> {
        if !self.drain_scheduled {
            return Ok(false);
        }
        let snapshot: Vec<PendingGlyph> = self.queue.drain(..).collect();
        self.drain_scheduled = false;

        for entry in &snapshot {
            self.generate_into_variant(entry)?;
        }

        for variant in self.variants.values_mut() {
            variant.flush(self.backend.as_mut());
        }

        if let Some(cap) = self.config.max_variants {
            self.evict_idle(cap);
        }

        if !snapshot.is_empty() {
            if let Some(callback) = self.on_glyphs_ready.as_mut() {
                callback();
            }
        }
        Ok(true)
    }

    /// Synchronously warm the Latin set for a variant.
    ///
    /// Generates and uploads every Latin glyph not already cached, so
    /// the first frame of Latin text renders without waiting for a
    /// drain. Does not enqueue, does not arm a drain, and does not fire
    /// the ready callback. Afterwards every Latin code point reports
    /// `cached: true` (possibly `empty` or `missing`).
    pub fn prefab_latin(
        &mut self,
        variant_id: &str,
        font_size: u32,
        font: &[u8],
        axes: &[VariationAxis],
    ) -> Result<(), AtlasError> {
        let gen_size = self.select_gen_size(font_size);
        let key = variant_key(variant_id, gen_size);
        let page_size = self.config.page_size;
        let max_mixed_pages = self.config.max_mixed_pages;
        let pixel_range = self.config.pixel_range;
        let variant = self.variants.entry(key.clone()).or_insert_with(|| {
            log::debug!("creating variant atlas '{key}'");
            VariantAtlas::new(variant_id.to_string(), gen_size, page_size, max_mixed_pages)
        });
        self.recency.put(key, ());

        self.oracle.load_font(font);
        if !axes.is_empty() {
            self.oracle.set_variation_axes(axes);
        }
        for cp in latin_code_points() {
            if matches!(variant.lookup(cp), GlyphState::Ready(_)) {
                continue;
            }
            if !self.oracle.has_glyph(cp) {
                variant.reserve(cp, self.backend.as_mut());
                variant.mark_empty(cp, true);
                continue;
            }
            let bitmap = if axes.is_empty() {
                self.oracle.generate_mtsdf(cp, gen_size, pixel_range)
            } else {
                self.oracle.generate_mtsdf_var(cp, gen_size, pixel_range)
            };
            match bitmap {
                Some(bitmap) => {
                    let rgba = quantize_to_rgba(&bitmap);
                    variant.add(cp, &rgba, bitmap.metrics, self.backend.as_mut())?;
                }
                None => {
                    variant.reserve(cp, self.backend.as_mut());
                    variant.mark_empty(cp, false);
                }
            }
        }
        if !axes.is_empty() {
            self.oracle.clear_variation_axes();
        }
        variant.flush(self.backend.as_mut());
        Ok(())
    }

    /// Evict least-recently-used variant atlases down to `max_variants`,
    /// destroying their textures. Whole variants only; glyph-level
    /// eviction would invalidate texture handles clients still hold.
    /// Returns the number of variants evicted.
    pub fn evict_idle(&mut self, max_variants: usize) -> usize {
        let mut evicted = 0;
        while self.variants.len() > max_variants {
            let Some((key, ())) = self.recency.pop_lru() else {
                break;
            };
            if let Some(mut variant) = self.variants.remove(&key) {
                log::info!(
                    "evicting variant atlas '{key}' ({} glyphs, {} pages)",
                    variant.glyph_count(),
                    variant.page_count()
                );
                variant.destroy(self.backend.as_mut());
                evicted += 1;
            }
        }
        evicted
    }

    /// Aggregate counts across all variants.
    pub fn status(&self) -> AtlasStatus {
        let mut status = AtlasStatus {
            atlas_count: self.variants.len(),
            ..Default::default()
        };
        for variant in self.variants.values() {
            status.page_count += variant.page_count();
            status.glyph_count += variant.glyph_count();
        }
        let page_size = self.config.page_size as usize;
        status.memory_bytes = status.page_count * page_size * page_size * 4;
        status
    }

    /// Direct access to one variant atlas, keyed like the cache itself.
    pub fn variant(&self, variant_id: &str, render_size: u32) -> Option<&VariantAtlas> {
        let gen_size = self.select_gen_size(render_size);
        self.variants.get(&variant_key(variant_id, gen_size))
    }

    /// Map a render size onto the nearest cached generation size: the
    /// first threshold at or above the render size picks its entry,
    /// anything larger falls to the last.
    fn select_gen_size(&self, render_size: u32) -> u32 {
        for (i, &threshold) in self.config.size_thresholds.iter().enumerate() {
            if render_size <= threshold {
                return self.config.gen_sizes[i];
            }
        }
        self.config.gen_sizes[self.config.gen_sizes.len() - 1]
    }

    fn generate_into_variant(&mut self, entry: &PendingGlyph) -> Result<(), AtlasError> {
        let Some(variant) = self.variants.get_mut(&entry.variant_key) else {
            // Variant evicted between enqueue and drain; nothing to fill.
            return Ok(());
        };
        if !variant.is_pending(entry.code_point) {
            // Already satisfied, e.g. by a prefab that ran in between.
            return Ok(());
        }
        self.oracle.load_font(&entry.font);
        if !self.oracle.has_glyph(entry.code_point) {
            variant.mark_empty(entry.code_point, true);
            return Ok(());
        }
        let bitmap = if entry.axes.is_empty() {
            self.oracle
                .generate_mtsdf(entry.code_point, entry.gen_size, self.config.pixel_range)
        } else {
            self.oracle.set_variation_axes(&entry.axes);
            let bitmap = self.oracle.generate_mtsdf_var(
                entry.code_point,
                entry.gen_size,
                self.config.pixel_range,
            );
            self.oracle.clear_variation_axes();
            bitmap
        };
        match bitmap {
            Some(bitmap) => {
                let rgba = quantize_to_rgba(&bitmap);
                variant.fill(entry.code_point, &rgba, bitmap.metrics, self.backend.as_mut())?;
            }
            None => variant.mark_empty(entry.code_point, false),
        }
        Ok(())
    }
}

impl Drop for FontAtlas {
    fn drop(&mut self) {
        for (_, mut variant) in self.variants.drain() {
            variant.destroy(self.backend.as_mut());
        }
    }
}

fn variant_key(variant_id: &str, gen_size: u32) -> String {
    format!("{variant_id}_{gen_size}")
}

fn glyph_info(loc: &GlyphLocation, gen_size: u32, page_size: u32, cached: bool) -> GlyphInfo {
    let side = page_size as f32;
    GlyphInfo {
        texture: loc.texture,
        page_width: page_size,
        page_height: page_size,
        x: loc.x,
        y: loc.y,
        width: loc.width,
        height: loc.height,
        u0: loc.x as f32 / side,
        v0: loc.y as f32 / side,
        u1: (loc.x + loc.width) as f32 / side,
        v1: (loc.y + loc.height) as f32 / side,
        metrics: loc.metrics,
        gen_size,
        cached,
        empty: loc.empty,
        missing: loc.missing,
    }
}

// ===================================================================
// Tests
// ===================================================================

//! Variant atlas — per-(variant, generation-size) glyph cache.
//!
//! Pages are partitioned into a single dedicated Latin page and a list
//! of mixed pages. The Latin set (0-9, A-Z, a-z) is stable and uniform
//! in height, so giving it its own page keeps it from sharing a shelf
//! with a tall CJK outlier that would waste vertical space. The Latin
//! page is created lazily on the first Latin reservation.
//!
//! A glyph's [`GlyphLocation`] is inserted at reservation time with a
//! zero rectangle and placeholder metrics, and mutated in place when
//! the pixels arrive. The texture handle handed out at reservation is
//! therefore already the page the glyph will land on, and stays valid
//! across the fill.

use std::collections::HashSet;
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::atlas::AtlasError;
use crate::oracle::GlyphMetrics;
use crate::page::Page;
use crate::texture::{TextureBackend, TextureId};

/// Whether a code point belongs to the Latin set granted a dedicated
/// page: exactly the 62 code points 0-9, A-Z, a-z.
pub fn is_latin(code_point: u32) -> bool {
    matches!(code_point, 0x30..=0x39 | 0x41..=0x5A | 0x61..=0x7A)
}

/// The Latin set in ascending code-point order.
pub fn latin_code_points() -> impl Iterator<Item = u32> {
    (0x30..=0x39).chain(0x41..=0x5A).chain(0x61..=0x7A)
}

/// Which page class a glyph was assigned to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PageSlot {
    Latin,
    Mixed(usize),
}

/// A glyph's placement within a variant atlas.
#[derive(Clone, Debug)]
pub struct GlyphLocation {
    slot: PageSlot,
    /// Texture of the page holding (or about to hold) the glyph.
    pub texture: TextureId,
    /// Top-left pixel position within the page.
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub metrics: GlyphMetrics,
    /// The glyph has no visible pixels (e.g. space). Implies a zero rect.
    pub empty: bool,
    /// The font does not contain this code point.
    pub missing: bool,
}

/// Cache-lookup outcome for a single code point.
#[derive(Debug)]
pub enum GlyphState<'a> {
    /// Filled, empty, or missing. Safe to render with.
    Ready(&'a GlyphLocation),
    /// Reserved; pixels arrive at the next drain.
    Pending(&'a GlyphLocation),
    /// Never requested.
    Absent,
}

/// Glyph cache for one variant at one generation size.
pub struct VariantAtlas {
    variant_id: String,
    gen_size: u32,
    page_size: u32,
    max_mixed_pages: usize,
    latin_page: Option<Page>,
    mixed_pages: Vec<Page>,
    locations: FxHashMap<u32, GlyphLocation>,
    /// Reserved but unfilled code points. Always a subset of `locations`.
    pending: HashSet<u32>,
    last_accessed: Instant,
}

impl VariantAtlas {
    pub fn new(
        variant_id: impl Into<String>,
        gen_size: u32,
        page_size: u32,
        max_mixed_pages: usize,
    ) -> Self {
        Self {
            variant_id: variant_id.into(),
            gen_size,
            page_size,
            max_mixed_pages,
            latin_page: None,
            mixed_pages: Vec::new(),
            locations: FxHashMap::default(),
            pending: HashSet::new(),
            last_accessed: Instant::now(),
        }
    }

    pub fn variant_id(&self) -> &str {
        &self.variant_id
    }

    pub fn gen_size(&self) -> u32 {
        self.gen_size
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    pub fn page_count(&self) -> usize {
        usize::from(self.latin_page.is_some()) + self.mixed_pages.len()
    }

    pub fn glyph_count(&self) -> usize {
        self.locations.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, code_point: u32) -> bool {
        self.pending.contains(&code_point)
    }

    /// Direct access to a location, regardless of pending state.
    pub fn location(&self, code_point: u32) -> Option<&GlyphLocation> {
        self.locations.get(&code_point)
    }

    /// Look up a code point and bump the last-accessed stamp.
    pub fn lookup(&mut self, code_point: u32) -> GlyphState<'_> {
        self.last_accessed = Instant::now();
        match self.locations.get(&code_point) {
            Some(loc) if self.pending.contains(&code_point) => GlyphState::Pending(loc),
            Some(loc) => GlyphState::Ready(loc),
            None => GlyphState::Absent,
        }
    }

    /// Reserve a slot for a code point: mark it pending and insert a
    /// placeholder location whose texture already references the page
    /// the glyph will be written to.
    pub fn reserve(&mut self, code_point: u32, backend: &mut dyn TextureBackend) -> &GlyphLocation {
        let slot = if is_latin(code_point) {
            self.ensure_latin_page(backend);
            PageSlot::Latin
        } else {
            PageSlot::Mixed(self.select_mixed_page(backend))
        };
        let texture = self.page_texture(slot);
        self.pending.insert(code_point);
        self.locations
            .entry(code_point)
            .or_insert_with(|| GlyphLocation {
                slot,
                texture,
                x: 0,
                y: 0,
                width: 0,
                height: 0,
                metrics: GlyphMetrics::default(),
                empty: false,
                missing: false,
            });
        &self.locations[&code_point]
    }

    /// Write pixels for a previously reserved code point, mutating its
    /// location in place and clearing the pending mark.
    pub fn fill(
        &mut self,
        code_point: u32,
        rgba: &[u8],
        metrics: GlyphMetrics,
        backend: &mut dyn TextureBackend,
    ) -> Result<(), AtlasError> {
        self.place_and_record(code_point, rgba, metrics, backend)
    }

    /// Synchronous insert with no prior reservation (prefab path). Also
    /// satisfies an outstanding reservation if one exists.
    pub fn add(
        &mut self,
        code_point: u32,
        rgba: &[u8],
        metrics: GlyphMetrics,
        backend: &mut dyn TextureBackend,
    ) -> Result<(), AtlasError> {
        self.place_and_record(code_point, rgba, metrics, backend)
    }

    /// Flag a reserved code point as empty (and optionally missing from
    /// the font), zeroing its rectangle and clearing the pending mark.
    pub fn mark_empty(&mut self, code_point: u32, missing: bool) {
        if let Some(loc) = self.locations.get_mut(&code_point) {
            loc.x = 0;
            loc.y = 0;
            loc.width = 0;
            loc.height = 0;
            loc.empty = true;
            loc.missing = missing;
        }
        self.pending.remove(&code_point);
    }

    /// Upload every dirty page.
    pub fn flush(&mut self, backend: &mut dyn TextureBackend) {
        if let Some(page) = self.latin_page.as_mut() {
            page.flush(backend);
        }
        for page in &mut self.mixed_pages {
            page.flush(backend);
        }
    }

    pub fn has_dirty_pages(&self) -> bool {
        self.latin_page.as_ref().is_some_and(Page::is_dirty)
            || self.mixed_pages.iter().any(Page::is_dirty)
    }

    /// Release every page texture and clear the index. The atlas is
    /// unusable afterwards.
    pub fn destroy(&mut self, backend: &mut dyn TextureBackend) {
        if let Some(page) = self.latin_page.take() {
            page.destroy(backend);
        }
        for page in self.mixed_pages.drain(..) {
            page.destroy(backend);
        }
        self.locations.clear();
        self.pending.clear();
    }

    // ---------------------------------------------------------------
    // Internal helpers
    // ---------------------------------------------------------------

    fn place_and_record(
        &mut self,
        code_point: u32,
        rgba: &[u8],
        metrics: GlyphMetrics,
        backend: &mut dyn TextureBackend,
    ) -> Result<(), AtlasError> {
        if metrics.width == 0 || metrics.height == 0 {
            // No visible pixels: record as empty rather than packing a
            // zero rect.
            if !self.locations.contains_key(&code_point) {
                self.reserve(code_point, backend);
            }
            self.mark_empty(code_point, false);
            return Ok(());
        }

        let (slot, x, y) = if is_latin(code_point) {
            self.ensure_latin_page(backend);
            let placed = self
                .latin_page
                .as_mut()
                .and_then(|page| page.try_add(rgba, metrics.width, metrics.height));
            match placed {
                Some((x, y)) => (PageSlot::Latin, x, y),
                // The 62-glyph Latin set must fit one page at any
                // supported generation size.
                None => {
                    return Err(AtlasError::LatinPageOverflow {
                        code_point,
                        gen_size: self.gen_size,
                    })
                }
            }
        } else {
            let idx = self.select_mixed_page(backend);
            match self.mixed_pages[idx].try_add(rgba, metrics.width, metrics.height) {
                Some((x, y)) => (PageSlot::Mixed(idx), x, y),
                None => {
                    let idx = self.alloc_mixed_page(backend);
                    match self.mixed_pages[idx].try_add(rgba, metrics.width, metrics.height) {
                        Some((x, y)) => (PageSlot::Mixed(idx), x, y),
                        None => {
                            return Err(AtlasError::GlyphTooLarge {
                                code_point,
                                width: metrics.width,
                                height: metrics.height,
                                page_size: self.page_size,
                            })
                        }
                    }
                }
            }
        };

        let texture = self.page_texture(slot);
        let loc = self
            .locations
            .entry(code_point)
            .or_insert_with(|| GlyphLocation {
                slot,
                texture,
                x: 0,
                y: 0,
                width: 0,
                height: 0,
                metrics: GlyphMetrics::default(),
                empty: false,
                missing: false,
            });
        loc.slot = slot;
        loc.texture = texture;
        loc.x = x;
        loc.y = y;
        loc.width = metrics.width;
        loc.height = metrics.height;
        loc.metrics = metrics;
        loc.empty = false;
        loc.missing = false;
        self.pending.remove(&code_point);
        Ok(())
    }

    fn ensure_latin_page(&mut self, backend: &mut dyn TextureBackend) {
        if self.latin_page.is_none() {
            self.latin_page = Some(Page::new(self.page_size, self.page_size, backend));
        }
    }

    /// First mixed page with vertical headroom for a glyph around the
    /// generation size, else a fresh one.
    fn select_mixed_page(&mut self, backend: &mut dyn TextureBackend) -> usize {
        let estimated = self.gen_size;
        match self
            .mixed_pages
            .iter()
            .position(|page| page.fits_height(estimated))
        {
            Some(idx) => idx,
            None => self.alloc_mixed_page(backend),
        }
    }

    fn alloc_mixed_page(&mut self, backend: &mut dyn TextureBackend) -> usize {
        if self.mixed_pages.len() >= self.max_mixed_pages {
            log::warn!(
                "variant '{}' at {}px exceeds the {}-page mixed cap; allocating anyway",
                self.variant_id,
                self.gen_size,
                self.max_mixed_pages
            );
        }
        self.mixed_pages
            .push(Page::new(self.page_size, self.page_size, backend));
        self.mixed_pages.len() - 1
    }

    fn page_texture(&self, slot: PageSlot) -> TextureId {
        match slot {
            PageSlot::Latin => self
                .latin_page
                .as_ref()
                .map(Page::texture)
                .unwrap_or(TextureId(0)),
            PageSlot::Mixed(idx) => self.mixed_pages[idx].texture(),
        }
    }
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockBackend;

    fn metrics(width: u32, height: u32) -> GlyphMetrics {
        GlyphMetrics {
            width,
            height,
            advance: width as i32 + 2,
            ..Default::default()
        }
    }

    fn rgba(width: u32, height: u32) -> Vec<u8> {
        vec![200u8; width as usize * height as usize * 4]
    }

    #[test]
    fn test_latin_set_has_62_code_points() {
        assert_eq!(latin_code_points().count(), 62);
        assert!(latin_code_points().all(is_latin));
        assert!(is_latin('0' as u32));
        assert!(is_latin('Z' as u32));
        assert!(is_latin('a' as u32));
        assert!(!is_latin(' ' as u32));
        assert!(!is_latin(0x4E00));
    }

    #[test]
    fn test_reserve_marks_pending_with_placeholder() {
        let mut backend = MockBackend::new();
        let mut atlas = VariantAtlas::new("v", 32, 256, 8);
        let loc = atlas.reserve('A' as u32, &mut backend);
        assert_eq!(loc.width, 0);
        assert_eq!(loc.height, 0);
        assert!(!loc.empty);
        assert!(!loc.missing);
        assert!(atlas.is_pending('A' as u32));
        assert!(matches!(
            atlas.lookup('A' as u32),
            GlyphState::Pending(_)
        ));
    }

    #[test]
    fn test_latin_page_created_lazily() {
        let mut backend = MockBackend::new();
        let mut atlas = VariantAtlas::new("v", 32, 256, 8);
        assert_eq!(atlas.page_count(), 0);
        atlas.reserve('A' as u32, &mut backend);
        assert_eq!(atlas.page_count(), 1, "first Latin reservation creates the Latin page");
        atlas.reserve('B' as u32, &mut backend);
        assert_eq!(atlas.page_count(), 1);
    }

    #[test]
    fn test_fill_transitions_out_of_pending() {
        let mut backend = MockBackend::new();
        let mut atlas = VariantAtlas::new("v", 32, 256, 8);
        let reserved_texture = atlas.reserve('A' as u32, &mut backend).texture;

        let m = metrics(12, 14);
        atlas
            .fill('A' as u32, &rgba(12, 14), m, &mut backend)
            .expect("fill should succeed");
        assert!(!atlas.is_pending('A' as u32));

        match atlas.lookup('A' as u32) {
            GlyphState::Ready(loc) => {
                assert_eq!(loc.width, 12);
                assert_eq!(loc.height, 14);
                assert_eq!(loc.metrics, m);
                assert_eq!(loc.texture, reserved_texture, "fill lands on the reserved page");
                assert!(!loc.empty);
                assert!(!loc.missing);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn test_mark_empty_missing() {
        let mut backend = MockBackend::new();
        let mut atlas = VariantAtlas::new("v", 32, 256, 8);
        atlas.reserve(0x1F600, &mut backend);
        atlas.mark_empty(0x1F600, true);
        assert!(!atlas.is_pending(0x1F600));
        match atlas.lookup(0x1F600) {
            GlyphState::Ready(loc) => {
                assert!(loc.empty);
                assert!(loc.missing);
                assert_eq!(loc.width, 0);
                assert_eq!(loc.metrics, GlyphMetrics::default());
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_size_fill_records_empty_glyph() {
        let mut backend = MockBackend::new();
        let mut atlas = VariantAtlas::new("v", 32, 256, 8);
        atlas.reserve(' ' as u32, &mut backend);
        atlas
            .fill(' ' as u32, &[], metrics(0, 0), &mut backend)
            .expect("zero-size fill is not an error");
        match atlas.lookup(' ' as u32) {
            GlyphState::Ready(loc) => {
                assert!(loc.empty);
                assert!(!loc.missing);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn test_add_without_reservation() {
        let mut backend = MockBackend::new();
        let mut atlas = VariantAtlas::new("v", 32, 256, 8);
        atlas
            .add('Q' as u32, &rgba(10, 10), metrics(10, 10), &mut backend)
            .expect("add should succeed");
        assert!(matches!(atlas.lookup('Q' as u32), GlyphState::Ready(_)));
        assert_eq!(atlas.glyph_count(), 1);
        assert_eq!(atlas.pending_count(), 0);
    }

    #[test]
    fn test_mixed_overflow_allocates_new_page() {
        let mut backend = MockBackend::new();
        // 64px page, 30x30 glyphs: 4 per page (2 per shelf, 2 shelves).
        let mut atlas = VariantAtlas::new("v", 24, 64, 8);
        for i in 0..5u32 {
            let cp = 0x4E00 + i;
            atlas
                .add(cp, &rgba(30, 30), metrics(30, 30), &mut backend)
                .expect("mixed glyphs spill onto a fresh page");
        }
        assert!(atlas.page_count() >= 2, "expected overflow into a second mixed page");
        assert_eq!(atlas.glyph_count(), 5);
    }

    #[test]
    fn test_latin_overflow_is_fatal() {
        let mut backend = MockBackend::new();
        let mut atlas = VariantAtlas::new("v", 32, 16, 8);
        let err = atlas
            .add('A' as u32, &rgba(20, 20), metrics(20, 20), &mut backend)
            .expect_err("a glyph larger than the Latin page must fail");
        assert!(matches!(err, AtlasError::LatinPageOverflow { .. }));
    }

    #[test]
    fn test_glyph_larger_than_fresh_page_is_fatal() {
        let mut backend = MockBackend::new();
        let mut atlas = VariantAtlas::new("v", 32, 16, 8);
        let err = atlas
            .add(0x4E00, &rgba(20, 20), metrics(20, 20), &mut backend)
            .expect_err("a glyph larger than a fresh mixed page must fail");
        assert!(matches!(err, AtlasError::GlyphTooLarge { .. }));
    }

    #[test]
    fn test_destroy_releases_all_textures() {
        let mut backend = MockBackend::new();
        let mut atlas = VariantAtlas::new("v", 24, 64, 8);
        atlas.reserve('A' as u32, &mut backend);
        for i in 0..5u32 {
            atlas
                .add(0x4E00 + i, &rgba(30, 30), metrics(30, 30), &mut backend)
                .unwrap();
        }
        let pages = atlas.page_count();
        assert!(pages >= 3, "latin page plus two mixed pages");
        atlas.destroy(&mut backend);
        assert_eq!(backend.destroyed.len(), pages);
        assert_eq!(atlas.glyph_count(), 0);
        assert_eq!(atlas.page_count(), 0);
    }

    #[test]
    fn test_rects_stay_within_pages() {
        let mut backend = MockBackend::new();
        let mut atlas = VariantAtlas::new("v", 24, 64, 8);
        let mut cps = vec!['A' as u32, 'z' as u32];
        cps.extend((0..6u32).map(|i| 0x3042 + i));
        for &cp in &cps {
            atlas
                .add(cp, &rgba(20, 20), metrics(20, 20), &mut backend)
                .unwrap();
        }
        for &cp in &cps {
            let loc = atlas.location(cp).expect("glyph cached");
            assert!(loc.x + loc.width <= 64, "U+{cp:04X} x overflow");
            assert!(loc.y + loc.height <= 64, "U+{cp:04X} y overflow");
        }
    }
}

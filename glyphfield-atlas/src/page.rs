//! Atlas page — one fixed-size RGBA texture plus its CPU-side buffer.
//!
//! Row-shelf packing: glyphs are placed left-to-right along the current
//! shelf row; when a glyph does not fit horizontally, a new shelf is
//! started below the tallest glyph of the current row. Sub-optimal but
//! O(1) per insert, and glyphs at a single generation size cluster in
//! height, so rows stay dense.
//!
//! Every glyph carries a 1-pixel gutter on its right and bottom edge so
//! bilinear sampling cannot bleed into a neighbour. Bitmaps are blitted
//! with a vertical flip (source row 0 lands at the bottom of the tile);
//! the flip lives here, not in the oracle wrapper, because only the page
//! knows the destination stride.

use std::time::Instant;

use crate::texture::{TextureBackend, TextureId};

/// One fixed-size RGBA atlas texture and its packing state.
pub struct Page {
    width: u32,
    height: u32,
    buffer: Vec<u8>,
    texture: TextureId,
    cursor_x: u32,
    cursor_y: u32,
    row_height: u32,
    dirty: bool,
    last_accessed: Instant,
}

impl Page {
    /// Allocate a zeroed page and create its backend texture.
    pub fn new(width: u32, height: u32, backend: &mut dyn TextureBackend) -> Self {
        let buffer = vec![0u8; width as usize * height as usize * 4];
        let texture = backend.create(width, height, &buffer);
        log::debug!("allocated {width}x{height} atlas page ({texture:?})");
        Self {
            width,
            height,
            buffer,
            texture,
            cursor_x: 0,
            cursor_y: 0,
            row_height: 0,
            dirty: false,
            last_accessed: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    /// Raw RGBA buffer, `width * height * 4` bytes.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Whether a glyph of the given height could still start at the
    /// current shelf. Used to pick a mixed page before pixels exist.
    pub fn fits_height(&self, height: u32) -> bool {
        self.cursor_y + height + 1 <= self.height
    }

    /// Place a glyph bitmap, returning its top-left position within the
    /// page, or `None` when the page is full.
    ///
    /// `pixels` is tightly packed RGBA, `width * height * 4` bytes,
    /// row 0 at the top.
    pub fn try_add(&mut self, pixels: &[u8], width: u32, height: u32) -> Option<(u32, u32)> {
        let padded_w = width + 1;
        let padded_h = height + 1;

        if padded_w > self.width {
            return None;
        }
        if self.cursor_x + padded_w > self.width {
            // Start a new shelf below the tallest glyph of this row.
            self.cursor_y += self.row_height + 1;
            self.cursor_x = 0;
            self.row_height = 0;
        }
        if self.cursor_y + padded_h > self.height {
            return None;
        }

        let x = self.cursor_x;
        let y = self.cursor_y;
        self.blit_flipped(x, y, pixels, width, height);

        self.cursor_x += padded_w;
        self.row_height = self.row_height.max(padded_h);
        self.dirty = true;
        self.last_accessed = Instant::now();
        Some((x, y))
    }

    /// Upload the buffer if anything changed since the last flush.
    pub fn flush(&mut self, backend: &mut dyn TextureBackend) {
        if self.dirty {
            backend.update(self.texture, &self.buffer);
            self.dirty = false;
        }
    }

    /// Release the backend texture. The page must not be used afterwards.
    pub fn destroy(self, backend: &mut dyn TextureBackend) {
        backend.destroy(self.texture);
    }

    /// Copy `pixels` into the buffer at `(x, y)`, flipping vertically:
    /// source row `r` lands on destination row `height - 1 - r`.
    fn blit_flipped(&mut self, x: u32, y: u32, pixels: &[u8], width: u32, height: u32) {
        let stride = self.width as usize * 4;
        let row_bytes = width as usize * 4;
        for row in 0..height as usize {
            let src = row * row_bytes;
            let dst_row = y as usize + (height as usize - 1 - row);
            let dst = dst_row * stride + x as usize * 4;
            self.buffer[dst..dst + row_bytes].copy_from_slice(&pixels[src..src + row_bytes]);
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

    fn rgba(width: u32, height: u32, value: u8) -> Vec<u8> {
        vec![value; width as usize * height as usize * 4]
    }

    #[test]
    fn test_page_creation() {
        let mut backend = MockBackend::new();
        let page = Page::new(64, 64, &mut backend);
        assert_eq!(page.width(), 64);
        assert_eq!(page.height(), 64);
        assert_eq!(page.buffer().len(), 64 * 64 * 4);
        assert!(!page.is_dirty());
        assert_eq!(backend.created.len(), 1);
    }

    #[test]
    fn test_try_add_packs_left_to_right() {
        let mut backend = MockBackend::new();
        let mut page = Page::new(64, 64, &mut backend);
        let bitmap = rgba(10, 10, 255);
        assert_eq!(page.try_add(&bitmap, 10, 10), Some((0, 0)));
        // 1px gutter: next glyph starts at x = 11.
        assert_eq!(page.try_add(&bitmap, 10, 10), Some((11, 0)));
        assert!(page.is_dirty());
    }

    #[test]
    fn test_try_add_starts_new_shelf() {
        let mut backend = MockBackend::new();
        let mut page = Page::new(32, 64, &mut backend);
        let bitmap = rgba(10, 10, 255);
        assert_eq!(page.try_add(&bitmap, 10, 10), Some((0, 0)));
        assert_eq!(page.try_add(&bitmap, 10, 10), Some((11, 0)));
        // Third does not fit at x = 22 (22 + 11 > 32): shelf advances by
        // row_height (11) + 1.
        assert_eq!(page.try_add(&bitmap, 10, 10), Some((0, 12)));
    }

    #[test]
    fn test_try_add_rejects_when_full() {
        let mut backend = MockBackend::new();
        let mut page = Page::new(16, 16, &mut backend);
        let big = rgba(20, 20, 255);
        assert_eq!(page.try_add(&big, 20, 20), None, "glyph wider than page");

        let mut page = Page::new(16, 16, &mut backend);
        let tile = rgba(10, 10, 255);
        assert!(page.try_add(&tile, 10, 10).is_some());
        // Second tile forces a new shelf at y = 12; 12 + 11 > 16.
        assert_eq!(page.try_add(&tile, 10, 10), None);
    }

    #[test]
    fn test_blit_is_vertically_flipped() {
        let mut backend = MockBackend::new();
        let mut page = Page::new(8, 8, &mut backend);
        // 1x2 glyph: top pixel A = 10, bottom pixel B = 20.
        let pixels = vec![10, 10, 10, 10, 20, 20, 20, 20];
        assert_eq!(page.try_add(&pixels, 1, 2), Some((0, 0)));
        let stride = 8 * 4;
        // Source row 0 (A) lands on destination row 1; row 1 (B) on row 0.
        assert_eq!(page.buffer()[0], 20, "bottom source row stored first");
        assert_eq!(page.buffer()[stride], 10, "top source row stored below it");
    }

    #[test]
    fn test_flush_uploads_once_and_clears_dirty() {
        let mut backend = MockBackend::new();
        let mut page = Page::new(32, 32, &mut backend);
        page.try_add(&rgba(4, 4, 128), 4, 4);
        assert!(page.is_dirty());

        page.flush(&mut backend);
        assert!(!page.is_dirty());
        assert_eq!(backend.updated.len(), 1);

        // Clean flush is a no-op.
        page.flush(&mut backend);
        assert_eq!(backend.updated.len(), 1);
    }

    #[test]
    fn test_fits_height_tracks_shelf_cursor() {
        let mut backend = MockBackend::new();
        let mut page = Page::new(32, 32, &mut backend);
        assert!(page.fits_height(30));
        let bitmap = rgba(10, 20, 255);
        page.try_add(&bitmap, 10, 20);
        assert!(page.fits_height(20), "same shelf still has headroom");
        // Force a shelf advance; cursor_y becomes 22.
        page.try_add(&rgba(30, 5, 255), 30, 5);
        assert!(!page.fits_height(20));
        assert!(page.fits_height(5));
    }

    #[test]
    fn test_destroy_releases_texture() {
        let mut backend = MockBackend::new();
        let page = Page::new(16, 16, &mut backend);
        let id = page.texture();
        page.destroy(&mut backend);
        assert_eq!(backend.destroyed, vec![id]);
    }
}

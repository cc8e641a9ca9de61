use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glyphfield_atlas::{
    AtlasConfig, FontAtlas, GlyphMetrics, GlyphRequest, Page, SdfBitmap, SdfOracle,
    TextureBackend, TextureId, VariationAxis,
};

/// Backend that mints ids and discards uploads.
struct NullBackend {
    next_id: u64,
}

impl TextureBackend for NullBackend {
    fn create(&mut self, _width: u32, _height: u32, _pixels: &[u8]) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        id
    }

    fn update(&mut self, _texture: TextureId, _pixels: &[u8]) {}

    fn destroy(&mut self, _texture: TextureId) {}
}

/// Constant-cost oracle so the benchmarks measure cache overhead.
struct FlatOracle;

impl SdfOracle for FlatOracle {
    fn load_font(&mut self, _font: &[u8]) {}

    fn has_glyph(&self, _code_point: u32) -> bool {
        true
    }

    fn generate_msdf(&mut self, cp: u32, size: u32, _range: f32) -> Option<SdfBitmap> {
        self.generate_mtsdf(cp, size, _range)
    }

    fn generate_mtsdf(&mut self, code_point: u32, font_size: u32, _range: f32) -> Option<SdfBitmap> {
        let width = font_size / 2 + code_point % 5;
        let height = font_size / 2 + code_point % 7;
        Some(SdfBitmap {
            metrics: GlyphMetrics {
                width,
                height,
                advance: (font_size / 2) as i32,
                ..Default::default()
            },
            channels: 4,
            pixels: vec![0.5; width as usize * height as usize * 4],
        })
    }

    fn generate_mtsdf_var(&mut self, cp: u32, size: u32, range: f32) -> Option<SdfBitmap> {
        self.generate_mtsdf(cp, size, range)
    }

    fn set_variation_axes(&mut self, _axes: &[VariationAxis]) {}

    fn clear_variation_axes(&mut self) {}
}

fn bench_page_try_add(c: &mut Criterion) {
    let bitmap = vec![128u8; 16 * 16 * 4];

    c.bench_function("page_try_add_16x16", |b| {
        let mut backend = NullBackend { next_id: 1 };
        let mut page = Page::new(1024, 1024, &mut backend);
        b.iter(|| {
            if page.try_add(black_box(&bitmap), 16, 16).is_none() {
                page = Page::new(1024, 1024, &mut backend);
            }
        });
    });
}

fn bench_cached_get_glyph(c: &mut Criterion) {
    let mut atlas = FontAtlas::new(
        AtlasConfig::default(),
        Box::new(NullBackend { next_id: 1 }),
        Box::new(FlatOracle),
    )
    .expect("valid config");

    let request = GlyphRequest {
        code_point: 'A' as u32,
        variant_id: "bench".to_string(),
        render_size: 32,
        font: Arc::new(vec![0u8; 4]),
        axes: Vec::new(),
    };
    atlas.get_glyph(&request);
    atlas.tick().expect("drain");

    c.bench_function("get_glyph_cached_hit", |b| {
        b.iter(|| atlas.get_glyph(black_box(&request)));
    });
}

fn bench_prefab_latin(c: &mut Criterion) {
    let font = vec![0u8; 4];

    c.bench_function("prefab_latin_62_glyphs", |b| {
        let mut variant = 0u32;
        b.iter(|| {
            let mut atlas = FontAtlas::new(
                AtlasConfig::default(),
                Box::new(NullBackend { next_id: 1 }),
                Box::new(FlatOracle),
            )
            .expect("valid config");
            variant = variant.wrapping_add(1);
            atlas
                .prefab_latin(&format!("v{variant}"), 32, black_box(&font), &[])
                .expect("prefab");
        });
    });
}

criterion_group!(
    benches,
    bench_page_try_add,
    bench_cached_get_glyph,
    bench_prefab_latin
);
criterion_main!(benches);

//! # glyphfield-atlas
//!
//! Runtime-adaptive SDF font-atlas cache. Maps Unicode code points to
//! rectangles of signed-distance-field pixel data packed into shared
//! GPU-style texture pages, with deferred batched generation and a
//! synchronous prefab fast path.
//!
//! ## Architecture
//!
//! ```text
//! FontAtlas (facade + deferred batch scheduler)
//!     │
//!     ▼
//! VariantAtlas (one per variant-id + generation-size)
//!     │  Latin page ─┐
//!     ▼              ├── Page (RGBA buffer + texture, shelf packer)
//!     mixed pages ───┘
//!
//! SdfOracle  ──► glyph pixels + metrics     (client-supplied)
//! TextureBackend ──► opaque texture handles (client-supplied)
//! ```
//!
//! - **`atlas`** — the facade: variant map, size selection, scheduler.
//! - **`variant`** — per-variant cache with the Latin/mixed partition.
//! - **`page`** — row-shelf packing into a fixed RGBA page.
//! - **`oracle`** — the SDF generator seam and pixel quantization.
//! - **`texture`** — the texture backend seam.

pub mod atlas;
pub mod oracle;
pub mod page;
pub mod texture;
pub mod variant;

// Re-exports for ergonomic use.
pub use atlas::{AtlasConfig, AtlasError, AtlasStatus, FontAtlas, GlyphInfo, GlyphRequest};
pub use oracle::{GlyphMetrics, PlaneBounds, SdfBitmap, SdfOracle, VariationAxis};
pub use page::Page;
pub use texture::{TextureBackend, TextureId};
pub use variant::{is_latin, latin_code_points, GlyphLocation, GlyphState, VariantAtlas};

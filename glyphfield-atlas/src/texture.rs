//! Texture backend — opaque GPU texture handles for atlas pages.
//!
//! The cache core never talks to a graphics API directly. Page pixel
//! buffers live on the CPU; a client-supplied [`TextureBackend`] turns
//! them into opaque handles at page creation and receives re-uploads
//! when dirty pages are flushed. Handles are plain integers so clients
//! can hold them across the reserve/fill boundary without aliasing the
//! page buffer itself.

/// Opaque handle to one backend texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Client-supplied texture factory and uploader.
///
/// Buffers passed to `create` and `update` may be read synchronously
/// during the call; the atlas retains ownership and may mutate them
/// again afterwards, so backends that upload asynchronously must copy.
pub trait TextureBackend {
    /// Create a texture from an RGBA byte buffer of `width * height * 4` bytes.
    fn create(&mut self, width: u32, height: u32, pixels: &[u8]) -> TextureId;

    /// Re-upload the full buffer to an existing texture.
    fn update(&mut self, texture: TextureId, pixels: &[u8]);

    /// Destroy a texture. The handle must not be used afterwards.
    fn destroy(&mut self, texture: TextureId);
}

use std::collections::HashMap;
use std::sync::Arc;

/// Decoded image pixels for an image layer.
#[derive(Clone, Debug)]
pub struct ImagePixels {
    pub width: u32,
    pub height: u32,
    /// Premultiplied RGBA8, row-major, tightly packed.
    pub rgba8_premul: Arc<Vec<u8>>,
}

/// Raw font bytes for a font table entry.
#[derive(Clone, Debug)]
pub struct Typeface {
    pub bytes: Arc<Vec<u8>>,
}

/// Where layers look up their external assets at draw time. Returning
/// `None` skips the draw; missing assets are never an error.
pub trait AssetSource {
    fn image(&self, ref_id: &str) -> Option<ImagePixels>;
    fn typeface(&self, family: &str, style: &str) -> Option<Typeface>;
}

/// Asset source with nothing in it.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAssets;

impl AssetSource for NoAssets {
    fn image(&self, _ref_id: &str) -> Option<ImagePixels> {
        None
    }

    fn typeface(&self, _family: &str, _style: &str) -> Option<Typeface> {
        None
    }
}

/// In-memory asset source, filled by the embedder up front.
#[derive(Clone, Debug, Default)]
pub struct MemoryAssets {
    images: HashMap<String, ImagePixels>,
    typefaces: HashMap<(String, String), Typeface>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_image(&mut self, ref_id: impl Into<String>, image: ImagePixels) {
        self.images.insert(ref_id.into(), image);
    }

    pub fn insert_typeface(
        &mut self,
        family: impl Into<String>,
        style: impl Into<String>,
        bytes: Vec<u8>,
    ) {
        self.typefaces.insert(
            (family.into(), style.into()),
            Typeface {
                bytes: Arc::new(bytes),
            },
        );
    }
}

impl AssetSource for MemoryAssets {
    fn image(&self, ref_id: &str) -> Option<ImagePixels> {
        self.images.get(ref_id).cloned()
    }

    fn typeface(&self, family: &str, style: &str) -> Option<Typeface> {
        self.typefaces
            .get(&(family.to_owned(), style.to_owned()))
            .cloned()
    }
}

//! Scrim is a layer compositing and mask/matte rendering engine for
//! vector animation documents (CPU, premultiplied RGBA8).
//!
//! The pipeline is document-oriented:
//!
//! - Build a [`LayerTree`] from a validated [`Document`]
//! - Sample every animated track with [`LayerTree::set_progress`]
//! - Rasterize a frame with [`LayerTree::render`], or draw onto an
//!   existing [`Canvas`] with [`LayerTree::draw`]
//!
//! Layers composite bottom to top through a draw state machine that
//! handles masks (Add/Subtract/Intersect, each optionally inverted),
//! track mattes, parent transform chains, precomp time remapping, and
//! text rendered either from shaped font glyphs or from the document's
//! embedded character paths. [`KeyPath`] patterns address individual
//! layers for per-property overrides.
#![forbid(unsafe_code)]

pub mod assets;
pub mod comp;
pub mod composite;
pub mod error;
pub mod keypath;
pub mod layer;
pub mod mask;
pub mod model;
pub mod raster;
pub mod text;
pub mod transform;
pub mod value;

pub use assets::{AssetSource, ImagePixels, MemoryAssets, NoAssets, Typeface};
pub use comp::LayerTree;
pub use composite::BlendMode;
pub use error::{ScrimError, ScrimResult};
pub use keypath::KeyPath;
pub use layer::{Layer, RenderCtx, RenderOptions};
pub use model::{Document, LayerId, MaskMode, MatteType, Rgba};
pub use raster::{Canvas, Paint, PaintStyle, Surface};
pub use text::TextShaper;
pub use transform::LayerTransform;
pub use value::{Animated, Keyframe, OverrideFn, Value};

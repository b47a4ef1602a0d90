use std::cell::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

use kurbo::{Affine, Rect};

use crate::{
    assets::AssetSource,
    composite::BlendMode,
    error::ScrimResult,
    keypath::KeyPath,
    layer::{Layer, LayerContent, RenderCtx, RenderOptions},
    model::{Document, LayerId, LayerKindModel, LayerModel, MatteType, TransformModel},
    raster::{Canvas, Surface, is_empty_rect},
    text::TextShaper,
    value::{Animated, Value},
};

/// Built contents of a precomposition: child layers in document order
/// plus the optional time remap track.
pub(crate) struct PreCompContent {
    pub(crate) layers: Vec<Layer>,
    pub(crate) width: f64,
    pub(crate) height: f64,
    pub(crate) time_remap: Option<Animated<f32>>,
    has_masks: OnceCell<bool>,
    has_matte: OnceCell<bool>,
}

impl PreCompContent {
    /// Build child layers from their models. A layer flagged as matted
    /// absorbs the layer above it as its matte; absorbed layers are not
    /// siblings and cannot be parents.
    pub(crate) fn build(
        models: &[Arc<LayerModel>],
        doc: &Arc<Document>,
        width: f64,
        height: f64,
        time_remap: Option<&Value<f32>>,
    ) -> Self {
        let mut layers: Vec<Layer> = Vec::new();
        let mut pending_matte = false;
        for model in models.iter().rev() {
            let Some(layer) = Layer::from_model(model.clone(), doc.clone()) else {
                continue;
            };
            if pending_matte {
                pending_matte = false;
                if let Some(owner) = layers.last_mut() {
                    owner.matte = Some(Box::new(layer));
                }
            } else {
                let matted = model.matte_type.is_matted();
                layers.push(layer);
                pending_matte = matted;
            }
        }
        layers.reverse();

        let index: HashMap<LayerId, usize> = layers
            .iter()
            .enumerate()
            .map(|(i, l)| (l.model.id, i))
            .collect();
        for i in 0..layers.len() {
            if let Some(pid) = layers[i].model.parent_id {
                let parent = index.get(&pid).copied();
                if parent.is_none() {
                    tracing::warn!(
                        layer = %layers[i].name(),
                        parent = pid.0,
                        "parent layer not found; ignoring parent link"
                    );
                }
                layers[i].parent = parent;
            }
            if let Some(matte) = &mut layers[i].matte {
                if let Some(pid) = matte.model.parent_id {
                    matte.parent = index.get(&pid).copied();
                }
            }
        }

        Self {
            layers,
            width,
            height,
            time_remap: time_remap.map(Value::to_animated),
            has_masks: OnceCell::new(),
            has_matte: OnceCell::new(),
        }
    }

    /// True when any descendant layer carries masks.
    pub(crate) fn has_masks(&self) -> bool {
        *self.has_masks.get_or_init(|| {
            self.layers.iter().any(|l| match &l.content {
                LayerContent::PreComp(pc) => pc.has_masks(),
                _ => l.has_masks(),
            })
        })
    }

    /// True when any direct child consumes a matte.
    pub(crate) fn has_matte(&self) -> bool {
        *self
            .has_matte
            .get_or_init(|| self.layers.iter().any(|l| l.matte.is_some()))
    }
}

/// Draw a precomp's children bottom to top, clipped to the composition
/// rectangle. With `apply_opacity_to_layers` set and more than one child,
/// translucent group opacity is applied once to the flattened group.
pub(crate) fn draw_precomp(
    pc: &PreCompContent,
    canvas: &mut Canvas,
    ctx: &mut RenderCtx<'_>,
    parent_matrix: Affine,
    parent_alpha: u8,
) -> ScrimResult<()> {
    let clip = parent_matrix.transform_rect_bbox(Rect::new(0.0, 0.0, pc.width, pc.height));
    let offscreen = ctx.opts.apply_opacity_to_layers && pc.layers.len() > 1 && parent_alpha < 255;
    let child_alpha = if offscreen { 255 } else { parent_alpha };

    if offscreen {
        let opacity = f32::from(parent_alpha) / 255.0;
        canvas.with_layer(clip, BlendMode::SrcOver, opacity, |c| {
            draw_children(pc, c, ctx, parent_matrix, child_alpha, clip)
        })
    } else {
        draw_children(pc, canvas, ctx, parent_matrix, child_alpha, clip)
    }
}

fn draw_children(
    pc: &PreCompContent,
    canvas: &mut Canvas,
    ctx: &mut RenderCtx<'_>,
    parent_matrix: Affine,
    alpha: u8,
    clip: Rect,
) -> ScrimResult<()> {
    canvas.save();
    let visible = if is_empty_rect(clip) {
        true
    } else {
        canvas.clip_rect(clip)
    };
    let mut result = Ok(());
    if visible {
        for layer in pc.layers.iter().rev() {
            result = layer.draw(&pc.layers, canvas, ctx, parent_matrix, alpha);
            if result.is_err() {
                break;
            }
        }
    }
    canvas.restore()?;
    result
}

/// A built document, ready to sample and draw. The document's top-level
/// layers hang off a synthetic root precomp.
pub struct LayerTree {
    doc: Arc<Document>,
    root: Layer,
}

impl LayerTree {
    pub fn new(doc: Document) -> ScrimResult<Self> {
        doc.validate()?;
        let doc = Arc::new(doc);
        let content = LayerContent::PreComp(PreCompContent::build(
            &doc.layers,
            &doc,
            doc.width,
            doc.height,
            None,
        ));
        let container = Arc::new(LayerModel {
            id: LayerId(u64::MAX),
            name: "__container".into(),
            parent_id: None,
            kind: LayerKindModel::Null,
            matte_type: MatteType::None,
            masks: Vec::new(),
            transform: TransformModel::default(),
            in_out: Vec::new(),
            time_stretch: 1.0,
            start_frame: 0.0,
            hidden: false,
        });
        let root = Layer::with_content(container, doc.clone(), content);
        Ok(Self { doc, root })
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Sample every animated track at `progress` in `[0, 1]`.
    pub fn set_progress(&mut self, progress: f32) {
        self.root.set_progress(progress.clamp(0.0, 1.0));
    }

    /// Draw the current frame onto `canvas`.
    pub fn draw(
        &self,
        canvas: &mut Canvas,
        ctx: &mut RenderCtx<'_>,
        matrix: Affine,
        alpha: u8,
    ) -> ScrimResult<()> {
        self.root.draw(&[], canvas, ctx, matrix, alpha)
    }

    /// Rasterize the current frame into a fresh premultiplied surface.
    pub fn render(
        &self,
        width: u32,
        height: u32,
        assets: &dyn AssetSource,
        opts: RenderOptions,
    ) -> ScrimResult<Surface> {
        let mut canvas = Canvas::new(width, height)?;
        let mut shaper = TextShaper::new();
        let mut ctx = RenderCtx {
            assets,
            shaper: &mut shaper,
            opts,
        };
        self.root.draw(&[], &mut canvas, &mut ctx, Affine::IDENTITY, 255)?;
        canvas.into_surface()
    }

    /// True when any layer in the tree carries masks, nested precomps
    /// included. Memoized on first call.
    pub fn has_masks(&self) -> bool {
        match &self.root.content {
            LayerContent::PreComp(pc) => pc.has_masks(),
            _ => false,
        }
    }

    /// True when any top-level layer consumes a matte. Memoized on
    /// first call.
    pub fn has_matte(&self) -> bool {
        self.root.has_matte()
    }

    /// Device-space bounds of the whole tree at the current progress.
    pub fn bounds(&self) -> Rect {
        self.root.bounds(&[], Affine::IDENTITY, true)
    }

    /// Resolve a key path pattern against the tree. Returns one fully
    /// resolved path per matching layer.
    pub fn resolve_key_path(&self, key_path: &KeyPath) -> Vec<KeyPath> {
        let mut found = Vec::new();
        self.root
            .resolve_key_path(key_path, 0, &mut found, &KeyPath::new(Vec::<String>::new()));
        found
    }

    /// Look up a mutable layer by id, searching absorbed mattes too.
    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        fn search(layer: &mut Layer, id: LayerId) -> Option<&mut Layer> {
            if layer.id() == id {
                return Some(layer);
            }
            if let Some(matte) = &mut layer.matte {
                if let Some(hit) = search(matte, id) {
                    return Some(hit);
                }
            }
            if let LayerContent::PreComp(pc) = &mut layer.content {
                for child in &mut pc.layers {
                    if let Some(hit) = search(child, id) {
                        return Some(hit);
                    }
                }
            }
            None
        }
        search(&mut self.root, id)
    }
}

use std::cell::OnceCell;
use std::sync::Arc;

use kurbo::{Affine, BezPath, Point, Rect, Shape, Vec2};

use crate::{
    assets::AssetSource,
    comp::{self, PreCompContent},
    composite::BlendMode,
    error::ScrimResult,
    keypath::KeyPath,
    mask::MaskStack,
    model::{Document, LayerId, LayerKindModel, LayerModel, MatteType, Rgba, ShapeItemModel},
    raster::{Canvas, Paint, PaintStyle, intersect_or_empty},
    text::{self, TextContent, TextShaper},
    transform::LayerTransform,
    value::{Animated, OverrideFn},
};

/// Frame-independent rendering switches.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderOptions {
    /// Draw text from the document's character table as vector paths
    /// instead of shaping with system font files.
    pub use_glyph_paths: bool,
    /// Apply group opacity to a precomp's children as a whole (one
    /// offscreen blend) rather than to each child independently.
    pub apply_opacity_to_layers: bool,
}

/// Everything a draw pass needs besides the canvas.
pub struct RenderCtx<'a> {
    pub assets: &'a dyn AssetSource,
    pub shaper: &'a mut TextShaper,
    pub opts: RenderOptions,
}

/// Sampled state of one shape item.
pub(crate) struct ShapeItem {
    path: Animated<BezPath>,
    fill: Option<ShapeFill>,
    stroke: Option<ShapeStroke>,
}

struct ShapeFill {
    color: Animated<Rgba>,
    opacity: Animated<f32>,
}

struct ShapeStroke {
    color: Animated<Rgba>,
    opacity: Animated<f32>,
    width: Animated<f32>,
}

impl ShapeItem {
    fn from_model(model: &ShapeItemModel) -> Self {
        Self {
            path: model.path.to_animated(),
            fill: model.fill.as_ref().map(|f| ShapeFill {
                color: f.color.to_animated(),
                opacity: f.opacity.to_animated(),
            }),
            stroke: model.stroke.as_ref().map(|s| ShapeStroke {
                color: s.color.to_animated(),
                opacity: s.opacity.to_animated(),
                width: s.width.to_animated(),
            }),
        }
    }

    fn set_progress(&mut self, progress: f32) {
        self.path.set_progress(progress);
        if let Some(fill) = &mut self.fill {
            fill.color.set_progress(progress);
            fill.opacity.set_progress(progress);
        }
        if let Some(stroke) = &mut self.stroke {
            stroke.color.set_progress(progress);
            stroke.opacity.set_progress(progress);
            stroke.width.set_progress(progress);
        }
    }
}

pub(crate) enum LayerContent {
    PreComp(PreCompContent),
    Solid { color: Rgba, width: f64, height: f64 },
    Image { ref_id: String },
    Null,
    Shape { items: Vec<ShapeItem> },
    Text(TextContent),
}

/// One built layer: sampled transform, optional mask stack, optional
/// owned matte, and kind-specific content. Matte layers live inside
/// their consumer and never appear as siblings.
pub struct Layer {
    pub(crate) model: Arc<LayerModel>,
    pub(crate) doc: Arc<Document>,
    pub(crate) transform: LayerTransform,
    pub(crate) mask: Option<MaskStack>,
    pub(crate) matte: Option<Box<Layer>>,
    pub(crate) parent: Option<usize>,
    parents: OnceCell<Vec<usize>>,
    in_out: Option<Animated<f32>>,
    pub(crate) visible: bool,
    pub(crate) content: LayerContent,
}

impl Layer {
    /// Build a layer from its model. Returns `None` for unsupported kinds
    /// so a document with exotic layers still renders the rest.
    pub(crate) fn from_model(model: Arc<LayerModel>, doc: Arc<Document>) -> Option<Self> {
        let content = match &model.kind {
            LayerKindModel::Unknown => {
                tracing::warn!(layer = %model.name, "unknown layer kind; dropping layer");
                return None;
            }
            LayerKindModel::PreComp {
                ref_id,
                width,
                height,
                time_remap,
            } => {
                let children = doc.precomps.get(ref_id).cloned().unwrap_or_default();
                LayerContent::PreComp(PreCompContent::build(
                    &children,
                    &doc,
                    *width,
                    *height,
                    time_remap.as_ref(),
                ))
            }
            LayerKindModel::Solid {
                color,
                width,
                height,
            } => LayerContent::Solid {
                color: *color,
                width: *width,
                height: *height,
            },
            LayerKindModel::Image { ref_id } => LayerContent::Image {
                ref_id: ref_id.clone(),
            },
            LayerKindModel::Null => LayerContent::Null,
            LayerKindModel::Shape { items } => LayerContent::Shape {
                items: items.iter().map(ShapeItem::from_model).collect(),
            },
            LayerKindModel::Text { text } => LayerContent::Text(TextContent::from_model(text)),
        };
        Some(Self::with_content(model, doc, content))
    }

    pub(crate) fn with_content(
        model: Arc<LayerModel>,
        doc: Arc<Document>,
        content: LayerContent,
    ) -> Self {
        let in_out = (!model.in_out.is_empty())
            .then(|| Animated::from_keyframes(model.in_out.clone()).with_hold());
        let visible = in_out.as_ref().is_none_or(|io| *io.value() == 1.0);
        Self {
            transform: LayerTransform::from_model(&model.transform),
            mask: (!model.masks.is_empty()).then(|| MaskStack::from_models(&model.masks)),
            matte: None,
            parent: None,
            parents: OnceCell::new(),
            in_out,
            visible,
            content,
            model,
            doc,
        }
    }

    pub fn id(&self) -> LayerId {
        self.model.id
    }

    pub fn name(&self) -> &str {
        &self.model.name
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn has_masks(&self) -> bool {
        self.mask.as_ref().is_some_and(|m| !m.is_empty())
    }

    pub fn has_matte(&self) -> bool {
        if self.matte.is_some() {
            return true;
        }
        match &self.content {
            LayerContent::PreComp(pc) => pc.has_matte(),
            _ => false,
        }
    }

    pub fn transform_mut(&mut self) -> &mut LayerTransform {
        &mut self.transform
    }

    /// Ancestor chain as sibling indices, direct parent first. Built once
    /// on first use.
    fn parents<'a>(&'a self, siblings: &[Layer]) -> &'a [usize] {
        self.parents.get_or_init(|| {
            let mut out = Vec::new();
            let mut cur = self.parent;
            while let Some(i) = cur {
                out.push(i);
                if out.len() > siblings.len() {
                    tracing::warn!(layer = %self.model.name, "parent cycle detected");
                    out.clear();
                    break;
                }
                cur = siblings[i].parent;
            }
            out
        })
    }

    /// Advance the layer to `progress`, cascading through time stretch,
    /// the visibility track, the matte, and kind-specific content.
    pub fn set_progress(&mut self, progress: f32) {
        self.transform.set_progress(progress);
        if let Some(mask) = &mut self.mask {
            mask.set_progress(progress);
        }

        let stretch = self.model.time_stretch;
        let mut p = progress;
        if stretch != 0.0 {
            p /= stretch;
        }
        if let Some(io) = &mut self.in_out {
            // The visibility track is stretched twice over; progress
            // clamping absorbs the division when the stretch is zero.
            io.set_progress(p / stretch);
            self.visible = *io.value() == 1.0;
        }
        if let Some(matte) = &mut self.matte {
            let matte_stretch = matte.model.time_stretch;
            matte.set_progress(p * matte_stretch);
        }

        match &mut self.content {
            LayerContent::Shape { items } => {
                for item in items {
                    item.set_progress(p);
                }
            }
            LayerContent::Text(text) => text.set_progress(p),
            LayerContent::PreComp(pc) => {
                if let Some(remap) = &mut pc.time_remap {
                    remap.set_progress(p);
                }
                let mut child = match &pc.time_remap {
                    Some(remap) => {
                        let remapped_frame =
                            *remap.value() * self.doc.frame_rate - self.doc.start_frame;
                        remapped_frame / (self.doc.duration_frames() + 0.01)
                    }
                    None => progress - self.model.start_progress(&self.doc),
                };
                if stretch != 0.0 {
                    child /= stretch;
                }
                for layer in &mut pc.layers {
                    layer.set_progress(child);
                }
            }
            LayerContent::Solid { .. } | LayerContent::Image { .. } | LayerContent::Null => {}
        }
    }

    /// Draw under `parent_matrix` at `parent_alpha`. Layers without masks
    /// or a matte go straight to the canvas; the rest composite through a
    /// bounded offscreen buffer.
    pub(crate) fn draw(
        &self,
        siblings: &[Layer],
        canvas: &mut Canvas,
        ctx: &mut RenderCtx<'_>,
        parent_matrix: Affine,
        parent_alpha: u8,
    ) -> ScrimResult<()> {
        if !self.visible || self.model.hidden {
            return Ok(());
        }

        let mut matrix = parent_matrix;
        for &pi in self.parents(siblings).iter().rev() {
            matrix *= siblings[pi].transform.matrix();
        }

        let opacity = self.transform.opacity().map_or(100.0, |o| *o.value());
        let alpha = ((f32::from(parent_alpha) / 255.0) * (opacity / 100.0) * 255.0)
            .round()
            .clamp(0.0, 255.0) as u8;

        if self.matte.is_none() && !self.has_masks() {
            let matrix = matrix * self.transform.matrix();
            return self.draw_content(siblings, canvas, ctx, matrix, alpha);
        }

        let mut rect = self.content_bounds(siblings, matrix);
        self.intersect_bounds_with_matte(&mut rect, siblings, parent_matrix);
        let matrix = matrix * self.transform.matrix();
        if let Some(mask) = &self.mask {
            mask.tighten_bounds(&mut rect, matrix);
        }
        let canvas_rect = Rect::new(
            0.0,
            0.0,
            f64::from(canvas.width()),
            f64::from(canvas.height()),
        );
        rect = intersect_or_empty(rect, canvas_rect);
        if rect.width() < 1.0 || rect.height() < 1.0 {
            return Ok(());
        }

        canvas.with_layer(rect, BlendMode::SrcOver, 1.0, |c| {
            self.draw_content(siblings, c, ctx, matrix, alpha)?;
            if let Some(mask) = &self.mask {
                mask.apply(c, matrix, rect)?;
            }
            if let Some(matte) = &self.matte {
                let blend = if self.model.matte_type == MatteType::Invert {
                    BlendMode::DstOut
                } else {
                    BlendMode::DstIn
                };
                c.with_layer(rect, blend, 1.0, |c2| {
                    matte.draw(siblings, c2, ctx, parent_matrix, alpha)
                })?;
            }
            Ok(())
        })
    }

    fn draw_content(
        &self,
        siblings: &[Layer],
        canvas: &mut Canvas,
        ctx: &mut RenderCtx<'_>,
        matrix: Affine,
        alpha: u8,
    ) -> ScrimResult<()> {
        let _ = siblings;
        match &self.content {
            LayerContent::Null => Ok(()),
            LayerContent::Solid {
                color,
                width,
                height,
            } => {
                let combined = ((f32::from(alpha) / 255.0) * (f32::from(color.a) / 255.0) * 255.0)
                    .round() as u8;
                if combined == 0 {
                    return Ok(());
                }
                let mut path = rect_path(Rect::new(0.0, 0.0, *width, *height));
                path.apply_affine(matrix);
                canvas.draw_path(
                    &path,
                    &Paint::fill(Rgba::new(color.r, color.g, color.b, combined)),
                )
            }
            LayerContent::Image { ref_id } => {
                let Some(image) = ctx.assets.image(ref_id) else {
                    tracing::debug!(ref_id = %ref_id, "no pixels for image layer; skipping");
                    return Ok(());
                };
                canvas.save();
                canvas.concat(matrix);
                let result = canvas.draw_image(&image, alpha);
                canvas.restore()?;
                result
            }
            LayerContent::Shape { items } => {
                for item in items {
                    let mut path = item.path.value().clone();
                    path.apply_affine(matrix);

                    if let Some(fill) = &item.fill {
                        let color = *fill.color.value();
                        if !color.is_zero() {
                            let a = ((f32::from(alpha) / 255.0)
                                * (fill.opacity.value() / 100.0).clamp(0.0, 1.0)
                                * 255.0)
                                .round() as u8;
                            canvas.draw_path(&path, &Paint::fill(color.with_alpha(a)))?;
                        }
                    }
                    if let Some(stroke) = &item.stroke {
                        let color = *stroke.color.value();
                        let width = *stroke.width.value();
                        if !color.is_zero() && width > 0.0 {
                            let a = ((f32::from(alpha) / 255.0)
                                * (stroke.opacity.value() / 100.0).clamp(0.0, 1.0)
                                * 255.0)
                                .round() as u8;
                            canvas.draw_path(
                                &path,
                                &Paint {
                                    color: color.with_alpha(a),
                                    style: PaintStyle::Stroke {
                                        width: f64::from(width),
                                    },
                                    blend: BlendMode::SrcOver,
                                },
                            )?;
                        }
                    }
                }
                Ok(())
            }
            LayerContent::Text(text) => {
                text::draw(text, &self.doc, canvas, ctx, matrix, alpha)
            }
            LayerContent::PreComp(pc) => comp::draw_precomp(pc, canvas, ctx, matrix, alpha),
        }
    }

    /// Bounds of this layer's content under `parent_matrix`; optionally
    /// fold in the ancestor transforms first.
    pub(crate) fn bounds(
        &self,
        siblings: &[Layer],
        parent_matrix: Affine,
        apply_parents: bool,
    ) -> Rect {
        let mut matrix = parent_matrix;
        if apply_parents {
            for &pi in self.parents(siblings).iter().rev() {
                matrix *= siblings[pi].transform.matrix();
            }
        }
        self.content_bounds(siblings, matrix)
    }

    fn content_bounds(&self, siblings: &[Layer], matrix: Affine) -> Rect {
        let _ = siblings;
        let matrix = matrix * self.transform.matrix();
        match &self.content {
            LayerContent::Null => Rect::ZERO,
            LayerContent::Solid { width, height, .. } => {
                matrix.transform_rect_bbox(Rect::new(0.0, 0.0, *width, *height))
            }
            LayerContent::Image { ref_id } => match self.doc.images.get(ref_id) {
                Some(img) => matrix.transform_rect_bbox(Rect::new(
                    0.0,
                    0.0,
                    f64::from(img.width),
                    f64::from(img.height),
                )),
                None => Rect::ZERO,
            },
            LayerContent::Shape { items } => {
                let mut acc = Rect::ZERO;
                let mut has_acc = false;
                for item in items {
                    let mut path = item.path.value().clone();
                    path.apply_affine(matrix);
                    let b = path.bounding_box();
                    if has_acc {
                        acc = acc.union(b);
                    } else {
                        acc = b;
                        has_acc = true;
                    }
                }
                acc
            }
            // Text extents aren't known without a full shaping pass; use
            // the composition bounds.
            LayerContent::Text(_) => Rect::new(0.0, 0.0, self.doc.width, self.doc.height),
            LayerContent::PreComp(pc) => {
                let mut acc = Rect::ZERO;
                let mut has_acc = false;
                for layer in pc.layers.iter().rev() {
                    let b = layer.bounds(&pc.layers, matrix, true);
                    if b == Rect::ZERO {
                        continue;
                    }
                    if has_acc {
                        acc = acc.union(b);
                    } else {
                        acc = b;
                        has_acc = true;
                    }
                }
                acc
            }
        }
    }

    fn intersect_bounds_with_matte(
        &self,
        rect: &mut Rect,
        siblings: &[Layer],
        parent_matrix: Affine,
    ) {
        let Some(matte) = &self.matte else { return };
        // An inverted matte reveals what is outside the matte content, so
        // its bounds say nothing about ours.
        if self.model.matte_type == MatteType::Invert {
            return;
        }
        let matte_bounds = matte.bounds(siblings, parent_matrix, true);
        *rect = intersect_or_empty(*rect, matte_bounds);
    }

    /// Depth-first key path resolution; matches are appended to `found`.
    pub(crate) fn resolve_key_path(
        &self,
        key_path: &KeyPath,
        depth: usize,
        found: &mut Vec<KeyPath>,
        current_partial: &KeyPath,
    ) {
        if !key_path.matches(self.name(), depth) {
            return;
        }

        let mut partial = current_partial.clone();
        if self.name() != "__container" {
            partial = partial.add_key(self.name());
            if key_path.fully_resolves_to(self.name(), depth) {
                found.push(partial.resolve(self.id()));
            }
        }

        if key_path.propagate_to_children(self.name(), depth) {
            let child_depth = depth + key_path.increment_depth_by(self.name(), depth);
            if let LayerContent::PreComp(pc) = &self.content {
                for layer in &pc.layers {
                    layer.resolve_key_path(key_path, child_depth, found, &partial);
                }
            }
        }
    }

    pub fn set_time_remap_override(&mut self, f: Option<OverrideFn<f32>>) -> bool {
        match &mut self.content {
            LayerContent::PreComp(pc) => match (&mut pc.time_remap, f) {
                (Some(remap), f) => {
                    remap.set_override(f);
                    true
                }
                (None, Some(f)) => {
                    let mut anim = Animated::constant(0.0);
                    anim.set_override(Some(f));
                    pc.time_remap = Some(anim);
                    true
                }
                (None, None) => true,
            },
            _ => false,
        }
    }

    pub fn set_text_fill_color_override(&mut self, f: Option<OverrideFn<Rgba>>) -> bool {
        match &mut self.content {
            LayerContent::Text(text) => {
                text.set_fill_color_override(f);
                true
            }
            _ => false,
        }
    }

    pub fn set_text_stroke_color_override(&mut self, f: Option<OverrideFn<Rgba>>) -> bool {
        match &mut self.content {
            LayerContent::Text(text) => {
                text.set_stroke_color_override(f);
                true
            }
            _ => false,
        }
    }

    pub fn set_text_stroke_width_override(&mut self, f: Option<OverrideFn<f32>>) -> bool {
        match &mut self.content {
            LayerContent::Text(text) => {
                text.set_stroke_width_override(f);
                true
            }
            _ => false,
        }
    }

    pub fn set_text_tracking_override(&mut self, f: Option<OverrideFn<f32>>) -> bool {
        match &mut self.content {
            LayerContent::Text(text) => {
                text.set_tracking_override(f);
                true
            }
            _ => false,
        }
    }

    pub fn set_text_size_override(&mut self, f: Option<OverrideFn<f32>>) -> bool {
        match &mut self.content {
            LayerContent::Text(text) => {
                text.set_size_override(f);
                true
            }
            _ => false,
        }
    }

    pub fn set_position_override(&mut self, f: Option<OverrideFn<Point>>) {
        self.transform.set_position_override(f);
    }

    pub fn set_scale_override(&mut self, f: Option<OverrideFn<Vec2>>) {
        self.transform.set_scale_override(f);
    }

    pub fn set_rotation_override(&mut self, f: Option<OverrideFn<f32>>) {
        self.transform.set_rotation_override(f);
    }

    pub fn set_opacity_override(&mut self, f: Option<OverrideFn<f32>>) {
        self.transform.set_opacity_override(f);
    }
}

pub(crate) fn rect_path(r: Rect) -> BezPath {
    let mut p = BezPath::new();
    p.move_to((r.x0, r.y0));
    p.line_to((r.x1, r.y0));
    p.line_to((r.x1, r.y1));
    p.line_to((r.x0, r.y1));
    p.close_path();
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransformModel;
    use crate::value::{Keyframe, Value};
    use std::collections::BTreeMap;

    fn empty_doc() -> Arc<Document> {
        Arc::new(Document {
            width: 64.0,
            height: 64.0,
            frame_rate: 30.0,
            start_frame: 0.0,
            end_frame: 30.0,
            layers: Vec::new(),
            precomps: BTreeMap::new(),
            images: BTreeMap::new(),
            fonts: BTreeMap::new(),
            chars: BTreeMap::new(),
        })
    }

    fn solid_model(id: u64) -> LayerModel {
        LayerModel {
            id: LayerId(id),
            name: format!("solid {id}"),
            parent_id: None,
            kind: LayerKindModel::Solid {
                color: Rgba::new(255, 0, 0, 255),
                width: 64.0,
                height: 64.0,
            },
            matte_type: MatteType::None,
            masks: Vec::new(),
            transform: TransformModel::default(),
            in_out: Vec::new(),
            time_stretch: 1.0,
            start_frame: 0.0,
            hidden: false,
        }
    }

    fn render_one(layer: &Layer, size: u32) -> crate::raster::Surface {
        let mut canvas = Canvas::new(size, size).unwrap();
        let mut shaper = crate::text::TextShaper::new();
        let mut ctx = RenderCtx {
            assets: &crate::assets::NoAssets,
            shaper: &mut shaper,
            opts: RenderOptions::default(),
        };
        layer
            .draw(&[], &mut canvas, &mut ctx, Affine::IDENTITY, 255)
            .unwrap();
        canvas.into_surface().unwrap()
    }

    #[test]
    fn unknown_layer_kind_builds_to_none() {
        let mut model = solid_model(1);
        model.kind = LayerKindModel::Unknown;
        assert!(Layer::from_model(Arc::new(model), empty_doc()).is_none());
    }

    #[test]
    fn solid_draws_with_combined_alpha() {
        let mut model = solid_model(1);
        model.transform.opacity = Some(Value::Static(50.0));
        let mut layer = Layer::from_model(Arc::new(model), empty_doc()).unwrap();
        layer.set_progress(0.0);
        let surface = render_one(&layer, 64);
        let a = surface.pixel(32, 32)[3];
        assert!((125..=131).contains(&a), "alpha was {a}");
    }

    #[test]
    fn hidden_layer_draws_nothing() {
        let mut model = solid_model(1);
        model.hidden = true;
        let mut layer = Layer::from_model(Arc::new(model), empty_doc()).unwrap();
        layer.set_progress(0.0);
        let surface = render_one(&layer, 64);
        assert_eq!(surface.pixel(32, 32)[3], 0);
    }

    #[test]
    fn in_out_track_toggles_visibility() {
        let mut model = solid_model(1);
        model.in_out = vec![
            Keyframe {
                progress: 0.0,
                value: 0.0,
            },
            Keyframe {
                progress: 0.5,
                value: 1.0,
            },
            Keyframe {
                progress: 0.8,
                value: 0.0,
            },
        ];
        let mut layer = Layer::from_model(Arc::new(model), empty_doc()).unwrap();

        layer.set_progress(0.2);
        assert!(!layer.is_visible());
        layer.set_progress(0.6);
        assert!(layer.is_visible());
        layer.set_progress(0.9);
        assert!(!layer.is_visible());
    }

    #[test]
    fn masked_layer_fully_off_canvas_is_skipped() {
        let mut model = solid_model(1);
        model.transform.position = Some(Value::Static(Point::new(-500.0, -500.0)));
        model.masks.push(crate::model::MaskModel {
            mode: crate::model::MaskMode::Add,
            inverted: false,
            path: Value::Static(rect_path(Rect::new(0.0, 0.0, 64.0, 64.0))),
            opacity: Value::Static(100.0),
        });
        let mut layer = Layer::from_model(Arc::new(model), empty_doc()).unwrap();
        layer.set_progress(0.0);
        let surface = render_one(&layer, 64);
        assert!(surface.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn opacity_override_beats_track() {
        let mut model = solid_model(1);
        model.transform.opacity = Some(Value::Static(100.0));
        let mut layer = Layer::from_model(Arc::new(model), empty_doc()).unwrap();
        layer.set_opacity_override(Some(Box::new(|_| 0.0)));
        layer.set_progress(0.0);
        let surface = render_one(&layer, 64);
        assert_eq!(surface.pixel(32, 32)[3], 0);
    }

    #[test]
    fn text_override_rejected_on_non_text_layer() {
        let mut layer = Layer::from_model(Arc::new(solid_model(1)), empty_doc()).unwrap();
        assert!(!layer.set_text_size_override(Some(Box::new(|_| 10.0))));
        assert!(!layer.set_time_remap_override(None));
    }
}

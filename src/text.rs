use std::collections::HashMap;
use std::sync::Arc;

use kurbo::Affine;

use crate::{
    assets::Typeface,
    error::{ScrimError, ScrimResult},
    layer::RenderCtx,
    model::{Document, FontModel, Justification, Rgba, TextDocument, TextModel},
    raster::{Canvas, GlyphPos, Paint, PaintStyle},
    transform::matrix_scale,
    value::{Animated, OverrideFn},
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct TextBrush;

/// A shaped run: positioned glyphs with their baseline at y = 0, plus the
/// advance width in layout units.
#[derive(Clone, Debug, Default)]
pub struct ShapedRun {
    pub glyphs: Vec<GlyphPos>,
    pub width: f32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ShapeKey {
    font: usize,
    size_bits: u32,
    text_key: u64,
}

/// Stateful shaping engine wrapping Parley, with a per-(font, size, text)
/// result cache so repeated frames shape each grapheme once.
pub struct TextShaper {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<TextBrush>,
    shaped: HashMap<ShapeKey, ShapedRun>,
    font_data: HashMap<usize, vello_cpu::peniko::FontData>,
}

impl Default for TextShaper {
    fn default() -> Self {
        Self::new()
    }
}

impl TextShaper {
    pub fn new() -> Self {
        Self {
            font_ctx: parley::FontContext::default(),
            layout_ctx: parley::LayoutContext::new(),
            shaped: HashMap::new(),
            font_data: HashMap::new(),
        }
    }

    /// Renderable font handle for a typeface, cached by font identity.
    pub fn font_data(&mut self, face: &Typeface) -> vello_cpu::peniko::FontData {
        let id = font_id(face);
        self.font_data
            .entry(id)
            .or_insert_with(|| {
                vello_cpu::peniko::FontData::new(
                    vello_cpu::peniko::Blob::from(face.bytes.as_ref().clone()),
                    0,
                )
            })
            .clone()
    }

    /// Shape `text` at `size` in the given typeface.
    pub fn shape(&mut self, face: &Typeface, size: f32, text: &str) -> ScrimResult<ShapedRun> {
        let key = ShapeKey {
            font: font_id(face),
            size_bits: size.to_bits(),
            text_key: text_cache_key(text),
        };
        if let Some(hit) = self.shaped.get(&key) {
            return Ok(hit.clone());
        }

        if !size.is_finite() || size <= 0.0 {
            return Err(ScrimError::validation("text size must be finite and > 0"));
        }

        let families = self
            .font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(face.bytes.as_ref().clone()), None);
        let family_id = families.first().map(|(id, _)| *id).ok_or_else(|| {
            ScrimError::validation("no font families registered from font bytes")
        })?;
        let family_name = self
            .font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| ScrimError::validation("registered font family has no name"))?
            .to_string();

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(family_name)),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size));
        builder.push_default(parley::style::StyleProperty::Brush(TextBrush));

        let mut layout: parley::Layout<TextBrush> = builder.build(text);
        layout.break_all_lines(None);

        let mut glyphs = Vec::new();
        for line in layout.lines() {
            let baseline = line.metrics().baseline;
            for item in line.items() {
                let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                    continue;
                };
                for g in run.glyphs() {
                    glyphs.push(GlyphPos {
                        id: g.id,
                        x: g.x,
                        y: g.y - baseline,
                    });
                }
            }
        }

        let run = ShapedRun {
            glyphs,
            width: layout.full_width(),
        };
        self.shaped.insert(key, run.clone());
        Ok(run)
    }
}

fn font_id(face: &Typeface) -> usize {
    Arc::as_ptr(&face.bytes) as usize
}

/// Rolling multiplier hash over code points, so a grapheme cluster and its
/// base character get distinct cache slots.
fn text_cache_key(text: &str) -> u64 {
    let mut key: u64 = 0;
    for c in text.chars() {
        key = key.wrapping_mul(31).wrapping_add(u64::from(u32::from(c)));
    }
    key
}

/// Sampled state of one text layer. Per-property values resolve in order:
/// externally bound override, authored track, then the document keyframe.
pub(crate) struct TextContent {
    document: Animated<TextDocument>,
    fill_color: Option<Animated<Rgba>>,
    fill_color_cb: Option<Animated<Rgba>>,
    stroke_color: Option<Animated<Rgba>>,
    stroke_color_cb: Option<Animated<Rgba>>,
    stroke_width: Option<Animated<f32>>,
    stroke_width_cb: Option<Animated<f32>>,
    tracking: Option<Animated<f32>>,
    tracking_cb: Option<Animated<f32>>,
    size: Option<Animated<f32>>,
    size_cb: Option<Animated<f32>>,
}

impl TextContent {
    pub fn from_model(model: &TextModel) -> Self {
        Self {
            document: model.document.to_animated(),
            fill_color: model.fill_color.as_ref().map(|v| v.to_animated()),
            fill_color_cb: None,
            stroke_color: model.stroke_color.as_ref().map(|v| v.to_animated()),
            stroke_color_cb: None,
            stroke_width: model.stroke_width.as_ref().map(|v| v.to_animated()),
            stroke_width_cb: None,
            tracking: model.tracking.as_ref().map(|v| v.to_animated()),
            tracking_cb: None,
            size: model.size.as_ref().map(|v| v.to_animated()),
            size_cb: None,
        }
    }

    pub fn set_progress(&mut self, progress: f32) {
        self.document.set_progress(progress);
        for c in [
            &mut self.fill_color,
            &mut self.fill_color_cb,
            &mut self.stroke_color,
            &mut self.stroke_color_cb,
        ]
        .into_iter()
        .flatten()
        {
            c.set_progress(progress);
        }
        for f in [
            &mut self.stroke_width,
            &mut self.stroke_width_cb,
            &mut self.tracking,
            &mut self.tracking_cb,
            &mut self.size,
            &mut self.size_cb,
        ]
        .into_iter()
        .flatten()
        {
            f.set_progress(progress);
        }
    }

    pub fn set_fill_color_override(&mut self, f: Option<OverrideFn<Rgba>>) {
        set_callback(&mut self.fill_color_cb, Rgba::BLACK, f);
    }

    pub fn set_stroke_color_override(&mut self, f: Option<OverrideFn<Rgba>>) {
        set_callback(&mut self.stroke_color_cb, Rgba::BLACK, f);
    }

    pub fn set_stroke_width_override(&mut self, f: Option<OverrideFn<f32>>) {
        set_callback(&mut self.stroke_width_cb, 0.0, f);
    }

    pub fn set_tracking_override(&mut self, f: Option<OverrideFn<f32>>) {
        set_callback(&mut self.tracking_cb, 0.0, f);
    }

    pub fn set_size_override(&mut self, f: Option<OverrideFn<f32>>) {
        set_callback(&mut self.size_cb, 0.0, f);
    }

    fn fill_color(&self, d: &TextDocument) -> Rgba {
        pick(&self.fill_color_cb, &self.fill_color).unwrap_or(d.fill_color)
    }

    fn stroke_color(&self, d: &TextDocument) -> Option<Rgba> {
        pick(&self.stroke_color_cb, &self.stroke_color).or(d.stroke_color)
    }

    fn stroke_width(&self, d: &TextDocument, parent_scale: f64) -> f32 {
        pick(&self.stroke_width_cb, &self.stroke_width)
            .unwrap_or(d.stroke_width * parent_scale as f32)
    }

    fn extra_tracking(&self) -> f32 {
        pick(&self.tracking_cb, &self.tracking).unwrap_or(0.0)
    }

    fn size(&self, d: &TextDocument) -> f32 {
        pick(&self.size_cb, &self.size).unwrap_or(d.size)
    }
}

fn set_callback<T: crate::value::Lerp + Clone>(
    slot: &mut Option<Animated<T>>,
    default: T,
    f: Option<OverrideFn<T>>,
) {
    match f {
        Some(f) => {
            let mut anim = Animated::constant(default);
            anim.set_override(Some(f));
            *slot = Some(anim);
        }
        None => *slot = None,
    }
}

fn pick<T: Copy>(cb: &Option<Animated<T>>, authored: &Option<Animated<T>>) -> Option<T>
where
    T: crate::value::Lerp + Clone,
{
    cb.as_ref()
        .or(authored.as_ref())
        .map(|a| *a.value())
}

pub(crate) fn draw(
    content: &TextContent,
    doc: &Document,
    canvas: &mut Canvas,
    ctx: &mut RenderCtx<'_>,
    parent_matrix: Affine,
    alpha: u8,
) -> ScrimResult<()> {
    canvas.save();
    let result = draw_inner(content, doc, canvas, ctx, parent_matrix, alpha);
    canvas.restore()?;
    result
}

fn draw_inner(
    content: &TextContent,
    doc: &Document,
    canvas: &mut Canvas,
    ctx: &mut RenderCtx<'_>,
    parent_matrix: Affine,
    alpha: u8,
) -> ScrimResult<()> {
    if !ctx.opts.use_glyph_paths {
        canvas.set_transform(parent_matrix);
    }

    let d = content.document.value();
    let Some(font) = doc.fonts.get(&d.font_name) else {
        tracing::debug!(font = %d.font_name, "text layer references unknown font; skipping");
        return Ok(());
    };

    let parent_scale = matrix_scale(parent_matrix);
    let style = TextStyle {
        fill_color: content.fill_color(d),
        stroke_color: content.stroke_color(d),
        stroke_width: content.stroke_width(d, parent_scale),
        stroke_over_fill: d.stroke_over_fill,
        alpha,
    };

    if ctx.opts.use_glyph_paths {
        draw_glyph_paths(content, doc, font, d, &style, canvas, parent_matrix, parent_scale)
    } else {
        draw_with_font(content, font, d, &style, canvas, ctx, parent_scale)
    }
}

struct TextStyle {
    fill_color: Rgba,
    stroke_color: Option<Rgba>,
    stroke_width: f32,
    stroke_over_fill: bool,
    alpha: u8,
}

impl TextStyle {
    /// Fill and stroke passes in paint order, with the unpaintable ones
    /// dropped: a zero color skips the pass, as does a zero-width stroke.
    fn passes(&self) -> Vec<Paint> {
        let fill = (!self.fill_color.is_zero()).then(|| Paint::fill(self.fill_color.with_alpha(self.alpha)));
        let stroke = self.stroke_color.and_then(|color| {
            if color.is_zero() || self.stroke_width == 0.0 {
                return None;
            }
            Some(Paint {
                color: color.with_alpha(self.alpha),
                style: PaintStyle::Stroke {
                    width: f64::from(self.stroke_width),
                },
                blend: crate::composite::BlendMode::SrcOver,
            })
        });

        let (first, second) = if self.stroke_over_fill {
            (fill, stroke)
        } else {
            (stroke, fill)
        };
        first.into_iter().chain(second).collect()
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_glyph_paths(
    content: &TextContent,
    doc: &Document,
    font: &FontModel,
    d: &TextDocument,
    style: &TextStyle,
    canvas: &mut Canvas,
    parent_matrix: Affine,
    parent_scale: f64,
) -> ScrimResult<()> {
    let size = content.size(d);
    let font_scale = f64::from(size) / 100.0;
    let lines = split_lines(&d.text);
    let count = lines.len();

    for (i, line) in lines.iter().enumerate() {
        canvas.save();

        let line_width: f64 = line
            .chars()
            .filter_map(|c| doc.char_glyph(c, &font.family, &font.style))
            .map(|g| g.width * font_scale * parent_scale)
            .sum();
        apply_justification(canvas, d.justification, line_width);

        let y = i as f64 * f64::from(d.line_height)
            - (count - 1) as f64 * f64::from(d.line_height) / 2.0;
        canvas.translate(0.0, y);

        for c in line.chars() {
            let Some(glyph) = doc.char_glyph(c, &font.family, &font.style) else {
                continue;
            };

            let mut glyph_matrix = parent_matrix;
            glyph_matrix *= Affine::translate((0.0, -f64::from(d.baseline_shift)));
            glyph_matrix *= Affine::scale(font_scale);
            for paint in style.passes() {
                for shape in &glyph.shapes {
                    let mut path = shape.clone();
                    path.apply_affine(glyph_matrix);
                    canvas.draw_path(&path, &paint)?;
                }
            }

            let advance = glyph.width * font_scale * parent_scale;
            let tracking = f64::from(d.tracking / 10.0 + content.extra_tracking());
            canvas.translate(advance + tracking * parent_scale, 0.0);
        }

        canvas.restore()?;
    }
    Ok(())
}

fn draw_with_font(
    content: &TextContent,
    font: &FontModel,
    d: &TextDocument,
    style: &TextStyle,
    canvas: &mut Canvas,
    ctx: &mut RenderCtx<'_>,
    parent_scale: f64,
) -> ScrimResult<()> {
    let Some(face) = ctx.assets.typeface(&font.family, &font.style) else {
        tracing::debug!(
            family = %font.family,
            style = %font.style,
            "no typeface for text layer; skipping"
        );
        return Ok(());
    };

    let size = content.size(d);
    let font_data = ctx.shaper.font_data(&face);
    let lines = split_lines(&d.text);
    let count = lines.len();

    for (i, line) in lines.iter().enumerate() {
        canvas.save();

        let measured = ctx.shaper.shape(&face, size, line)?;
        apply_justification(canvas, d.justification, f64::from(measured.width));

        let y = i as f64 * f64::from(d.line_height)
            - (count - 1) as f64 * f64::from(d.line_height) / 2.0;
        canvas.translate(0.0, y);

        for grapheme in graphemes(line) {
            let shaped = ctx.shaper.shape(&face, size, &grapheme)?;
            for paint in style.passes() {
                canvas.draw_glyphs(&font_data, size, &shaped.glyphs, paint.color, paint.style)?;
            }

            let tracking = f64::from(d.tracking / 10.0 + content.extra_tracking());
            canvas.translate(f64::from(shaped.width) + tracking * parent_scale, 0.0);
        }

        canvas.restore()?;
    }
    Ok(())
}

fn apply_justification(canvas: &mut Canvas, justification: Justification, line_width: f64) {
    match justification {
        Justification::Left => {}
        Justification::Right => canvas.translate(-line_width, 0.0),
        Justification::Center => canvas.translate(-line_width / 2.0, 0.0),
    }
}

/// Normalize line endings to a single separator and split. CRLF collapses
/// first so it doesn't produce an empty line.
pub(crate) fn split_lines(text: &str) -> Vec<String> {
    text.replace("\r\n", "\r")
        .replace('\n', "\r")
        .split('\r')
        .map(str::to_owned)
        .collect()
}

/// Group a line into grapheme clusters: a base character plus any
/// combining marks, joiners, or variation selectors that follow it.
pub(crate) fn graphemes(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for c in line.chars() {
        if is_modifier(c)
            && let Some(last) = out.last_mut()
        {
            last.push(c);
        } else {
            out.push(c.to_string());
        }
    }
    out
}

fn is_modifier(c: char) -> bool {
    matches!(c,
        '\u{0300}'..='\u{036F}'      // combining diacritical marks
        | '\u{1AB0}'..='\u{1AFF}'
        | '\u{1DC0}'..='\u{1DFF}'
        | '\u{20D0}'..='\u{20FF}'
        | '\u{FE00}'..='\u{FE0F}'    // variation selectors
        | '\u{200D}'                 // zero-width joiner
        | '\u{1F3FB}'..='\u{1F3FF}'  // skin tone modifiers
    )
}

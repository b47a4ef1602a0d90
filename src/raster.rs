use kurbo::{Affine, BezPath, Rect};

use crate::{
    assets::ImagePixels,
    composite::{BlendMode, PixelRegion, blend_region_in_place},
    error::{ScrimError, ScrimResult},
    model::Rgba,
};

/// A premultiplied RGBA8 pixel plane.
#[derive(Clone, Debug)]
pub struct Surface {
    width: u16,
    height: u16,
    data: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> ScrimResult<Self> {
        let w: u16 = width
            .try_into()
            .map_err(|_| ScrimError::render("surface width exceeds u16"))?;
        let h: u16 = height
            .try_into()
            .map_err(|_| ScrimError::render("surface height exceeds u16"))?;
        Ok(Self {
            width: w,
            height: h,
            data: vec![0; usize::from(w) * usize::from(h) * 4],
        })
    }

    pub fn width(&self) -> u32 {
        u32::from(self.width)
    }

    pub fn height(&self) -> u32 {
        u32::from(self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * usize::from(self.width) + x as usize) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PaintStyle {
    Fill,
    Stroke { width: f64 },
}

/// Color, style, and blend for one draw. Alpha rides in `color.a`.
#[derive(Clone, Copy, Debug)]
pub struct Paint {
    pub color: Rgba,
    pub style: PaintStyle,
    pub blend: BlendMode,
}

impl Paint {
    pub fn fill(color: Rgba) -> Self {
        Self {
            color,
            style: PaintStyle::Fill,
            blend: BlendMode::SrcOver,
        }
    }

    pub fn erase(alpha: u8) -> Self {
        Self {
            color: Rgba::BLACK.with_alpha(alpha),
            style: PaintStyle::Fill,
            blend: BlendMode::DstOut,
        }
    }
}

/// One glyph placed by shaping, in layout units relative to the run origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlyphPos {
    pub id: u32,
    pub x: f32,
    pub y: f32,
}

struct LayerBuf {
    data: Vec<u8>,
    blend: BlendMode,
    opacity: f32,
    region: PixelRegion,
}

struct StackEntry {
    saved_transform: Affine,
    saved_clip: Rect,
    layer: Option<LayerBuf>,
}

/// Immediate-mode drawing target with a save/restore stack of offscreen
/// layers. Every layer spans the full surface; `save_layer` bounds only
/// restrict the clip and the composited region at restore.
pub struct Canvas {
    width: u16,
    height: u16,
    base: Vec<u8>,
    transform: Affine,
    clip: Rect,
    stack: Vec<StackEntry>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> ScrimResult<Self> {
        let surface = Surface::new(width, height)?;
        Ok(Self::from_surface(surface))
    }

    pub fn from_surface(surface: Surface) -> Self {
        let clip = Rect::new(
            0.0,
            0.0,
            f64::from(surface.width),
            f64::from(surface.height),
        );
        Self {
            width: surface.width,
            height: surface.height,
            base: surface.data,
            transform: Affine::IDENTITY,
            clip,
            stack: Vec::new(),
        }
    }

    /// Flatten any layers left on the stack and hand back the pixels.
    pub fn into_surface(mut self) -> ScrimResult<Surface> {
        while !self.stack.is_empty() {
            self.restore()?;
        }
        Ok(Surface {
            width: self.width,
            height: self.height,
            data: self.base,
        })
    }

    pub fn width(&self) -> u32 {
        u32::from(self.width)
    }

    pub fn height(&self) -> u32 {
        u32::from(self.height)
    }

    pub fn transform(&self) -> Affine {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Affine) {
        self.transform = transform;
    }

    pub fn concat(&mut self, transform: Affine) {
        self.transform *= transform;
    }

    pub fn translate(&mut self, x: f64, y: f64) {
        self.transform *= Affine::translate((x, y));
    }

    pub fn save(&mut self) {
        self.stack.push(StackEntry {
            saved_transform: self.transform,
            saved_clip: self.clip,
            layer: None,
        });
    }

    /// Open an offscreen layer. Draws are clipped to `bounds` (mapped by the
    /// current transform) and the layer lands on what is below it with
    /// `blend` and `opacity` at the matching `restore`.
    pub fn save_layer(&mut self, bounds: Rect, blend: BlendMode, opacity: f32) {
        let device = self.transform.transform_rect_bbox(bounds);
        let scoped = intersect_or_empty(self.clip, device);
        let region = PixelRegion::from_rect(scoped)
            .clamped(usize::from(self.width), usize::from(self.height));
        self.stack.push(StackEntry {
            saved_transform: self.transform,
            saved_clip: self.clip,
            layer: Some(LayerBuf {
                data: vec![0; usize::from(self.width) * usize::from(self.height) * 4],
                blend,
                opacity,
                region,
            }),
        });
        self.clip = scoped;
    }

    pub fn restore(&mut self) -> ScrimResult<()> {
        let entry = self
            .stack
            .pop()
            .ok_or_else(|| ScrimError::render("restore without matching save"))?;
        self.transform = entry.saved_transform;
        self.clip = entry.saved_clip;

        if let Some(layer) = entry.layer {
            let width = usize::from(self.width);
            blend_region_in_place(
                self.target_mut(),
                &layer.data,
                width,
                layer.region,
                layer.blend,
                layer.opacity,
            )?;
        }
        Ok(())
    }

    /// `save_layer` + closure + `restore`, so the pair can't be mismatched.
    pub fn with_layer(
        &mut self,
        bounds: Rect,
        blend: BlendMode,
        opacity: f32,
        f: impl FnOnce(&mut Self) -> ScrimResult<()>,
    ) -> ScrimResult<()> {
        self.save_layer(bounds, blend, opacity);
        let result = f(self);
        self.restore()?;
        result
    }

    /// Intersect the clip with `rect` mapped by the current transform.
    /// Returns false when the resulting clip is empty.
    pub fn clip_rect(&mut self, rect: Rect) -> bool {
        let device = self.transform.transform_rect_bbox(rect);
        self.clip = intersect_or_empty(self.clip, device);
        !is_empty_rect(self.clip)
    }

    pub fn draw_path(&mut self, path: &BezPath, paint: &Paint) -> ScrimResult<()> {
        if is_empty_rect(self.clip) || paint.color.a == 0 {
            return Ok(());
        }
        let cpu_path = bezpath_to_cpu(path);
        let color = paint.color;
        let style = paint.style;
        let src = self.rasterize(|ctx| {
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                color.r, color.g, color.b, color.a,
            ));
            match style {
                PaintStyle::Fill => ctx.fill_path(&cpu_path),
                PaintStyle::Stroke { width } => {
                    ctx.set_stroke(vello_cpu::kurbo::Stroke::new(width));
                    ctx.stroke_path(&cpu_path);
                }
            }
        });
        self.compose(&src, paint.blend, 1.0)
    }

    pub fn draw_rect(&mut self, rect: Rect, paint: &Paint) -> ScrimResult<()> {
        if is_empty_rect(self.clip) || paint.color.a == 0 {
            return Ok(());
        }
        let color = paint.color;
        let src = self.rasterize(|ctx| {
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                color.r, color.g, color.b, color.a,
            ));
            ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
                rect.x0, rect.y0, rect.x1, rect.y1,
            ));
        });
        self.compose(&src, paint.blend, 1.0)
    }

    /// Draw premultiplied image pixels with their top-left at the origin of
    /// the current transform.
    pub fn draw_image(&mut self, image: &ImagePixels, alpha: u8) -> ScrimResult<()> {
        if is_empty_rect(self.clip) || alpha == 0 {
            return Ok(());
        }
        let paint = image_paint(image)?;
        let (w, h) = (f64::from(image.width), f64::from(image.height));
        let src = self.rasterize(|ctx| {
            ctx.set_paint(paint);
            ctx.fill_rect(&vello_cpu::kurbo::Rect::new(0.0, 0.0, w, h));
        });
        self.compose(&src, BlendMode::SrcOver, f32::from(alpha) / 255.0)
    }

    pub fn draw_glyphs(
        &mut self,
        font: &vello_cpu::peniko::FontData,
        size: f32,
        glyphs: &[GlyphPos],
        color: Rgba,
        style: PaintStyle,
    ) -> ScrimResult<()> {
        if is_empty_rect(self.clip) || color.a == 0 || glyphs.is_empty() {
            return Ok(());
        }
        let src = self.rasterize(|ctx| {
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(
                color.r, color.g, color.b, color.a,
            ));
            let run = glyphs.iter().map(|g| vello_cpu::Glyph {
                id: g.id,
                x: g.x,
                y: g.y,
            });
            match style {
                PaintStyle::Fill => {
                    ctx.glyph_run(font).font_size(size).fill_glyphs(run);
                }
                PaintStyle::Stroke { width } => {
                    ctx.set_stroke(vello_cpu::kurbo::Stroke::new(width));
                    ctx.glyph_run(font).font_size(size).stroke_glyphs(run);
                }
            }
        });
        self.compose(&src, BlendMode::SrcOver, 1.0)
    }

    fn rasterize(&self, f: impl FnOnce(&mut vello_cpu::RenderContext)) -> Vec<u8> {
        let mut ctx = vello_cpu::RenderContext::new(self.width, self.height);
        ctx.set_transform(affine_to_cpu(self.transform));
        f(&mut ctx);
        ctx.flush();
        let mut pixmap = vello_cpu::Pixmap::new(self.width, self.height);
        ctx.render_to_pixmap(&mut pixmap);
        pixmap.data_as_u8_slice().to_vec()
    }

    fn compose(&mut self, src: &[u8], mode: BlendMode, opacity: f32) -> ScrimResult<()> {
        let width = usize::from(self.width);
        let height = usize::from(self.height);
        let region = PixelRegion::from_rect(self.clip).clamped(width, height);
        blend_region_in_place(self.target_mut(), src, width, region, mode, opacity)
    }

    fn target_mut(&mut self) -> &mut [u8] {
        for entry in self.stack.iter_mut().rev() {
            if let Some(layer) = &mut entry.layer {
                return &mut layer.data;
            }
        }
        &mut self.base
    }
}

pub(crate) fn intersect_or_empty(a: Rect, b: Rect) -> Rect {
    let r = Rect::new(
        a.x0.max(b.x0),
        a.y0.max(b.y0),
        a.x1.min(b.x1),
        a.y1.min(b.y1),
    );
    if is_empty_rect(r) { Rect::ZERO } else { r }
}

pub(crate) fn is_empty_rect(r: Rect) -> bool {
    r.x1 <= r.x0 || r.y1 <= r.y0
}

fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

fn point_to_cpu(p: kurbo::Point) -> vello_cpu::kurbo::Point {
    vello_cpu::kurbo::Point::new(p.x, p.y)
}

fn bezpath_to_cpu(path: &BezPath) -> vello_cpu::kurbo::BezPath {
    use kurbo::PathEl;

    let mut out = vello_cpu::kurbo::BezPath::new();
    for &el in path.elements() {
        match el {
            PathEl::MoveTo(p) => out.move_to(point_to_cpu(p)),
            PathEl::LineTo(p) => out.line_to(point_to_cpu(p)),
            PathEl::QuadTo(p1, p2) => out.quad_to(point_to_cpu(p1), point_to_cpu(p2)),
            PathEl::CurveTo(p1, p2, p3) => {
                out.curve_to(point_to_cpu(p1), point_to_cpu(p2), point_to_cpu(p3));
            }
            PathEl::ClosePath => out.close_path(),
        }
    }
    out
}

fn image_paint(image: &ImagePixels) -> ScrimResult<vello_cpu::Image> {
    let w: u16 = image
        .width
        .try_into()
        .map_err(|_| ScrimError::render("image width exceeds u16"))?;
    let h: u16 = image
        .height
        .try_into()
        .map_err(|_| ScrimError::render("image height exceeds u16"))?;
    if image.rgba8_premul.len() != image.width as usize * image.height as usize * 4 {
        return Err(ScrimError::render("image byte length mismatch"));
    }

    let mut may_have_opacities = false;
    let mut pixels = Vec::with_capacity(image.width as usize * image.height as usize);
    for px in image.rgba8_premul.chunks_exact(4) {
        let a = px[3];
        may_have_opacities |= a != 255;
        pixels.push(vello_cpu::peniko::color::PremulRgba8 {
            r: px[0],
            g: px[1],
            b: px[2],
            a,
        });
    }

    Ok(vello_cpu::Image {
        image: vello_cpu::ImageSource::Pixmap(std::sync::Arc::new(
            vello_cpu::Pixmap::from_parts_with_opacity(pixels, w, h, may_have_opacities),
        )),
        sampler: vello_cpu::peniko::ImageSampler::default(),
    })
}

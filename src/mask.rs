use kurbo::{Affine, BezPath, Rect, Shape};

use crate::{
    composite::BlendMode,
    error::ScrimResult,
    model::{MaskMode, MaskModel, Rgba},
    raster::{Canvas, Paint, intersect_or_empty},
    value::Animated,
};

struct MaskEntry {
    mode: MaskMode,
    inverted: bool,
    path: Animated<BezPath>,
    opacity: Animated<f32>,
}

/// The sampled mask list of one layer, applied as a destination-in pass
/// over the layer's offscreen buffer.
pub struct MaskStack {
    entries: Vec<MaskEntry>,
}

impl MaskStack {
    pub fn from_models(models: &[MaskModel]) -> Self {
        Self {
            entries: models
                .iter()
                .map(|m| MaskEntry {
                    mode: m.mode,
                    inverted: m.inverted,
                    path: m.path.to_animated(),
                    opacity: m.opacity.to_animated(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_progress(&mut self, progress: f32) {
        for entry in &mut self.entries {
            entry.path.set_progress(progress);
            entry.opacity.set_progress(progress);
        }
    }

    /// Tighten `rect` by the masks that can bound content. `None` and
    /// `Add` entries (and any inverted `Subtract`/`Intersect`) leave the
    /// bounds unconstrained.
    pub fn tighten_bounds(&self, rect: &mut Rect, matrix: Affine) {
        let mut acc = Rect::ZERO;
        let mut has_acc = false;

        for entry in &self.entries {
            match entry.mode {
                MaskMode::None | MaskMode::Add => return,
                MaskMode::Subtract | MaskMode::Intersect => {
                    if entry.inverted {
                        return;
                    }
                }
            }

            let mut path = entry.path.value().clone();
            path.apply_affine(matrix);
            let b = path.bounding_box();
            if has_acc {
                acc = acc.union(b);
            } else {
                acc = b;
                has_acc = true;
            }
        }

        if has_acc {
            *rect = intersect_or_empty(*rect, acc);
        }
    }

    /// Combine all entries into a coverage layer and multiply it into
    /// whatever is currently below on the canvas.
    pub fn apply(&self, canvas: &mut Canvas, matrix: Affine, rect: Rect) -> ScrimResult<()> {
        canvas.with_layer(rect, BlendMode::DstIn, 1.0, |c| {
            let all_none = self.entries.iter().all(|e| e.mode == MaskMode::None);
            for (i, entry) in self.entries.iter().enumerate() {
                let mut path = entry.path.value().clone();
                path.apply_affine(matrix);
                let alpha = opacity_alpha(*entry.opacity.value());

                match entry.mode {
                    MaskMode::None => {
                        // A None mask contributes nothing on its own, but a
                        // stack of only None masks must pass everything
                        // through rather than erase the layer.
                        if all_none {
                            c.draw_rect(rect, &Paint::fill(Rgba::WHITE))?;
                        }
                    }
                    MaskMode::Add => {
                        if entry.inverted {
                            apply_inverted_add(c, rect, &path, alpha)?;
                        } else {
                            c.draw_path(&path, &Paint::fill(Rgba::BLACK.with_alpha(alpha)))?;
                        }
                    }
                    MaskMode::Subtract => {
                        if i == 0 {
                            c.draw_rect(rect, &Paint::fill(Rgba::BLACK))?;
                        }
                        if entry.inverted {
                            apply_inverted_subtract(c, rect, &path, alpha)?;
                        } else {
                            c.draw_path(&path, &Paint::erase(255))?;
                        }
                    }
                    MaskMode::Intersect => {
                        if entry.inverted {
                            apply_inverted_intersect(c, rect, &path, alpha)?;
                        } else {
                            apply_intersect(c, rect, &path, alpha)?;
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

fn opacity_alpha(opacity_percent: f32) -> u8 {
    (opacity_percent * 2.55).round().clamp(0.0, 255.0) as u8
}

fn apply_inverted_add(canvas: &mut Canvas, rect: Rect, path: &BezPath, alpha: u8) -> ScrimResult<()> {
    canvas.with_layer(rect, BlendMode::SrcOver, 1.0, |c| {
        c.draw_rect(rect, &Paint::fill(Rgba::BLACK))?;
        c.draw_path(path, &Paint::erase(alpha))
    })
}

fn apply_inverted_subtract(
    canvas: &mut Canvas,
    rect: Rect,
    path: &BezPath,
    alpha: u8,
) -> ScrimResult<()> {
    // Build (rect minus path) in a nested layer, then knock it out of the
    // accumulated coverage.
    canvas.with_layer(rect, BlendMode::DstOut, 1.0, |c| {
        c.draw_rect(rect, &Paint::fill(Rgba::BLACK))?;
        c.draw_path(path, &Paint::erase(alpha))
    })
}

fn apply_intersect(canvas: &mut Canvas, rect: Rect, path: &BezPath, alpha: u8) -> ScrimResult<()> {
    canvas.with_layer(rect, BlendMode::DstIn, 1.0, |c| {
        c.draw_path(path, &Paint::fill(Rgba::BLACK.with_alpha(alpha)))
    })
}

fn apply_inverted_intersect(
    canvas: &mut Canvas,
    rect: Rect,
    path: &BezPath,
    alpha: u8,
) -> ScrimResult<()> {
    canvas.with_layer(rect, BlendMode::DstIn, 1.0, |c| {
        c.draw_rect(rect, &Paint::fill(Rgba::BLACK))?;
        c.draw_path(path, &Paint::erase(alpha))
    })
}

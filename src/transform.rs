use kurbo::{Affine, Point, Vec2};

use crate::{
    model::TransformModel,
    value::{Animated, OverrideFn},
};

/// Sampled spatial transform of one layer. Channels the document never
/// authored stay `None` and contribute nothing to the matrix until an
/// override forces them into existence.
pub struct LayerTransform {
    anchor: Option<Animated<Point>>,
    position: Option<Animated<Point>>,
    scale: Option<Animated<Vec2>>,
    rotation: Option<Animated<f32>>,
    skew: Option<Animated<f32>>,
    skew_angle: Option<Animated<f32>>,
    opacity: Option<Animated<f32>>,
}

impl LayerTransform {
    pub fn from_model(model: &TransformModel) -> Self {
        Self {
            anchor: model.anchor.as_ref().map(|v| v.to_animated()),
            position: model.position.as_ref().map(|v| v.to_animated()),
            scale: model.scale.as_ref().map(|v| v.to_animated()),
            rotation: model.rotation.as_ref().map(|v| v.to_animated()),
            skew: model.skew.as_ref().map(|v| v.to_animated()),
            skew_angle: model.skew_angle.as_ref().map(|v| v.to_animated()),
            opacity: model.opacity.as_ref().map(|v| v.to_animated()),
        }
    }

    pub fn set_progress(&mut self, progress: f32) {
        for p in [&mut self.anchor, &mut self.position]
            .into_iter()
            .flatten()
        {
            p.set_progress(progress);
        }
        if let Some(s) = &mut self.scale {
            s.set_progress(progress);
        }
        for f in [
            &mut self.rotation,
            &mut self.skew,
            &mut self.skew_angle,
            &mut self.opacity,
        ]
        .into_iter()
        .flatten()
        {
            f.set_progress(progress);
        }
    }

    pub fn opacity(&self) -> Option<&Animated<f32>> {
        self.opacity.as_ref()
    }

    /// Compose the matrix as position, rotation, skew, scale, then anchor,
    /// each pre-multiplied so the anchor offset applies first to points.
    pub fn matrix(&self) -> Affine {
        let mut m = Affine::IDENTITY;

        if let Some(position) = &self.position {
            let p = *position.value();
            if p.x != 0.0 || p.y != 0.0 {
                m *= Affine::translate(p.to_vec2());
            }
        }
        if let Some(rotation) = &self.rotation {
            let deg = *rotation.value();
            if deg != 0.0 {
                m *= Affine::rotate(f64::from(deg).to_radians());
            }
        }
        if let Some(skew) = &self.skew {
            let skew_deg = f64::from(*skew.value());
            if skew_deg != 0.0 {
                // Shear along an arbitrary axis: rotate the axis to
                // vertical, shear, rotate back.
                let (m_cos, m_sin) = match &self.skew_angle {
                    Some(angle) => {
                        let a = (-f64::from(*angle.value()) + 90.0).to_radians();
                        (a.cos(), a.sin())
                    }
                    None => (0.0, 1.0),
                };
                let a_tan = skew_deg.to_radians().tan();
                let m1 = Affine::new([m_cos, -m_sin, m_sin, m_cos, 0.0, 0.0]);
                let m2 = Affine::new([1.0, a_tan, 0.0, 1.0, 0.0, 0.0]);
                let m3 = Affine::new([m_cos, m_sin, -m_sin, m_cos, 0.0, 0.0]);
                m *= m3 * m2 * m1;
            }
        }
        if let Some(scale) = &self.scale {
            let s = *scale.value();
            if s.x != 1.0 || s.y != 1.0 {
                m *= Affine::scale_non_uniform(s.x, s.y);
            }
        }
        if let Some(anchor) = &self.anchor {
            let a = *anchor.value();
            if a.x != 0.0 || a.y != 0.0 {
                m *= Affine::translate(Vec2::new(-a.x, -a.y));
            }
        }
        m
    }

    pub fn set_anchor_override(&mut self, f: Option<OverrideFn<Point>>) {
        set_or_insert(&mut self.anchor, Point::ZERO, f);
    }

    pub fn set_position_override(&mut self, f: Option<OverrideFn<Point>>) {
        set_or_insert(&mut self.position, Point::ZERO, f);
    }

    pub fn set_scale_override(&mut self, f: Option<OverrideFn<Vec2>>) {
        set_or_insert(&mut self.scale, Vec2::new(1.0, 1.0), f);
    }

    pub fn set_rotation_override(&mut self, f: Option<OverrideFn<f32>>) {
        set_or_insert(&mut self.rotation, 0.0, f);
    }

    pub fn set_opacity_override(&mut self, f: Option<OverrideFn<f32>>) {
        set_or_insert(&mut self.opacity, 100.0, f);
    }
}

fn set_or_insert<T: crate::value::Lerp + Clone>(
    slot: &mut Option<Animated<T>>,
    default: T,
    f: Option<OverrideFn<T>>,
) {
    match (slot.as_mut(), f) {
        (Some(anim), f) => anim.set_override(f),
        (None, Some(f)) => {
            let mut anim = Animated::constant(default);
            anim.set_override(Some(f));
            *slot = Some(anim);
        }
        (None, None) => {}
    }
}

/// Scale factor a matrix applies to distances, measured on a unit diagonal.
pub(crate) fn matrix_scale(m: Affine) -> f64 {
    let sqrt2_inv = std::f64::consts::FRAC_1_SQRT_2;
    let origin = m * Point::ZERO;
    let mapped = m * Point::new(sqrt2_inv, sqrt2_inv);
    (mapped - origin).hypot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_model_is_identity() {
        let t = LayerTransform::from_model(&TransformModel::default());
        assert_eq!(t.matrix(), Affine::IDENTITY);
    }

    #[test]
    fn anchor_applies_before_scale() {
        let model = TransformModel {
            anchor: Some(Value::Static(Point::new(10.0, 0.0))),
            scale: Some(Value::Static(Vec2::new(2.0, 2.0))),
            ..Default::default()
        };
        let t = LayerTransform::from_model(&model);
        let p = t.matrix() * Point::new(10.0, 0.0);
        // The anchor point itself stays pinned at the origin.
        assert!(close(p.x, 0.0) && close(p.y, 0.0));
        let q = t.matrix() * Point::new(11.0, 0.0);
        assert!(close(q.x, 2.0));
    }

    #[test]
    fn position_applies_after_rotation() {
        let model = TransformModel {
            position: Some(Value::Static(Point::new(100.0, 0.0))),
            rotation: Some(Value::Static(90.0)),
            ..Default::default()
        };
        let t = LayerTransform::from_model(&model);
        let p = t.matrix() * Point::new(1.0, 0.0);
        // Rotate first (1,0) -> (0,1), then translate.
        assert!(close(p.x, 100.0) && close(p.y, 1.0));
    }

    #[test]
    fn skew_with_default_axis_shears_x_by_y() {
        let model = TransformModel {
            skew: Some(Value::Static(45.0)),
            ..Default::default()
        };
        let t = LayerTransform::from_model(&model);
        let p = t.matrix() * Point::new(0.0, 1.0);
        // tan(45) = 1: a unit of y shifts x by one unit.
        assert!(close(p.x, -1.0) || close(p.x, 1.0), "x was {}", p.x);
        assert!(close(p.y, 1.0));
    }

    #[test]
    fn override_creates_missing_channel() {
        let mut t = LayerTransform::from_model(&TransformModel::default());
        t.set_position_override(Some(Box::new(|_| Point::new(5.0, 7.0))));
        let p = t.matrix() * Point::ZERO;
        assert!(close(p.x, 5.0) && close(p.y, 7.0));
        t.set_position_override(None);
        let p = t.matrix() * Point::ZERO;
        assert!(close(p.x, 0.0) && close(p.y, 0.0));
    }

    #[test]
    fn matrix_scale_measures_uniform_scale() {
        let m = Affine::scale(3.0);
        assert!(close(matrix_scale(m), 3.0));
        assert!(close(matrix_scale(Affine::translate((40.0, 2.0))), 1.0));
    }
}

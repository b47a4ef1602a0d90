use kurbo::{BezPath, PathEl, Point, Vec2};

use crate::{
    error::{ScrimError, ScrimResult},
    model::Rgba,
};

pub trait Lerp: Sized {
    fn lerp(a: &Self, b: &Self, t: f32) -> Self;
}

impl Lerp for f32 {
    fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        a + (b - a) * t
    }
}

impl Lerp for f64 {
    fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        a + (b - a) * f64::from(t)
    }
}

impl Lerp for Point {
    fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        Point::new(
            a.x + (b.x - a.x) * f64::from(t),
            a.y + (b.y - a.y) * f64::from(t),
        )
    }
}

impl Lerp for Vec2 {
    fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        Vec2::new(
            a.x + (b.x - a.x) * f64::from(t),
            a.y + (b.y - a.y) * f64::from(t),
        )
    }
}

impl Lerp for Rgba {
    fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        fn lerp_u8(a: u8, b: u8, t: f32) -> u8 {
            let a = f32::from(a);
            let b = f32::from(b);
            (a + (b - a) * t).round().clamp(0.0, 255.0) as u8
        }

        Self {
            r: lerp_u8(a.r, b.r, t),
            g: lerp_u8(a.g, b.g, t),
            b: lerp_u8(a.b, b.b, t),
            a: lerp_u8(a.a, b.a, t),
        }
    }
}

/// Paths interpolate element-wise when both endpoints have identical verb
/// sequences. Mismatched paths hold the start value for the whole segment.
impl Lerp for BezPath {
    fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        let ae = a.elements();
        let be = b.elements();
        if ae.len() != be.len() {
            return a.clone();
        }

        let mut out = Vec::with_capacity(ae.len());
        for (ea, eb) in ae.iter().zip(be.iter()) {
            let el = match (ea, eb) {
                (PathEl::MoveTo(p0), PathEl::MoveTo(p1)) => PathEl::MoveTo(<Point as Lerp>::lerp(p0, p1, t)),
                (PathEl::LineTo(p0), PathEl::LineTo(p1)) => PathEl::LineTo(<Point as Lerp>::lerp(p0, p1, t)),
                (PathEl::QuadTo(a0, a1), PathEl::QuadTo(b0, b1)) => {
                    PathEl::QuadTo(<Point as Lerp>::lerp(a0, b0, t), <Point as Lerp>::lerp(a1, b1, t))
                }
                (PathEl::CurveTo(a0, a1, a2), PathEl::CurveTo(b0, b1, b2)) => PathEl::CurveTo(
                    <Point as Lerp>::lerp(a0, b0, t),
                    <Point as Lerp>::lerp(a1, b1, t),
                    <Point as Lerp>::lerp(a2, b2, t),
                ),
                (PathEl::ClosePath, PathEl::ClosePath) => PathEl::ClosePath,
                _ => return a.clone(),
            };
            out.push(el);
        }
        BezPath::from_vec(out)
    }
}

/// One keyframe on the normalized `[0, 1]` composition timeline.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Keyframe<T> {
    pub progress: f32,
    pub value: T,
}

/// A property as authored: either a single value or a sorted keyframe track.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value<T> {
    Static(T),
    Keyframes(Vec<Keyframe<T>>),
}

impl<T> Value<T>
where
    T: Lerp + Clone,
{
    pub fn validate(&self) -> ScrimResult<()> {
        match self {
            Self::Static(_) => Ok(()),
            Self::Keyframes(keys) => {
                if keys.is_empty() {
                    return Err(ScrimError::animation(
                        "keyframed value must have at least one keyframe",
                    ));
                }
                if !keys.windows(2).all(|w| w[0].progress <= w[1].progress) {
                    return Err(ScrimError::animation(
                        "keyframes must be sorted by progress",
                    ));
                }
                Ok(())
            }
        }
    }

    pub fn initial(&self) -> &T {
        match self {
            Self::Static(v) => v,
            Self::Keyframes(keys) => &keys[0].value,
        }
    }

    pub fn to_animated(&self) -> Animated<T> {
        match self {
            Self::Static(v) => Animated::constant(v.clone()),
            Self::Keyframes(keys) => Animated::from_keyframes(keys.clone()),
        }
    }
}

pub type OverrideFn<T> = Box<dyn Fn(f32) -> T>;

/// A sampled property. `set_progress` re-evaluates the track once per frame;
/// `value` is then a cheap borrow for the rest of the frame.
pub struct Animated<T> {
    keys: Vec<Keyframe<T>>, // non-empty, sorted by progress
    hold: bool,
    override_fn: Option<OverrideFn<T>>,
    progress: f32,
    current: T,
}

impl<T> Animated<T>
where
    T: Lerp + Clone,
{
    pub fn constant(value: T) -> Self {
        Self {
            keys: vec![Keyframe {
                progress: 0.0,
                value: value.clone(),
            }],
            hold: false,
            override_fn: None,
            progress: 0.0,
            current: value,
        }
    }

    /// Keys must be non-empty and sorted; `Value::validate` checks that at
    /// model load time.
    pub fn from_keyframes(keys: Vec<Keyframe<T>>) -> Self {
        debug_assert!(!keys.is_empty());
        let current = keys[0].value.clone();
        Self {
            keys,
            hold: false,
            override_fn: None,
            progress: 0.0,
            current,
        }
    }

    /// Switch to stepped sampling: each segment holds its start value.
    pub fn with_hold(mut self) -> Self {
        self.hold = true;
        self.current = self.sample(self.progress);
        self
    }

    pub fn set_progress(&mut self, progress: f32) {
        self.progress = progress.clamp(0.0, 1.0);
        self.current = self.sample(self.progress);
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn value(&self) -> &T {
        &self.current
    }

    /// Install or clear an external override. While set, the override wins
    /// over the keyframe track. Takes effect immediately at the current
    /// progress.
    pub fn set_override(&mut self, f: Option<OverrideFn<T>>) {
        self.override_fn = f;
        self.current = self.sample(self.progress);
    }

    pub fn has_override(&self) -> bool {
        self.override_fn.is_some()
    }

    fn sample(&self, progress: f32) -> T {
        if let Some(f) = &self.override_fn {
            return f(progress);
        }

        let idx = self.keys.partition_point(|k| k.progress <= progress);
        if idx == 0 {
            return self.keys[0].value.clone();
        }
        if idx >= self.keys.len() {
            return self.keys[self.keys.len() - 1].value.clone();
        }

        let a = &self.keys[idx - 1];
        let b = &self.keys[idx];
        if self.hold {
            return a.value.clone();
        }

        let denom = b.progress - a.progress;
        if denom <= 0.0 {
            return a.value.clone();
        }
        let t = (progress - a.progress) / denom;
        T::lerp(&a.value, &b.value, t)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Animated<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Animated")
            .field("keys", &self.keys.len())
            .field("hold", &self.hold)
            .field("override", &self.override_fn.is_some())
            .field("progress", &self.progress)
            .field("current", &self.current)
            .finish()
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use kurbo::{BezPath, Point, Vec2};

use crate::{
    error::{ScrimError, ScrimResult},
    value::Value,
};

/// Straight (non-premultiplied) RGBA color as authored in documents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Self = Self::new(0, 0, 0, 255);
    pub const WHITE: Self = Self::new(255, 255, 255, 255);
    pub const TRANSPARENT: Self = Self::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    /// All four channels zero, the "no paint" sentinel.
    pub fn is_zero(self) -> bool {
        self == Self::TRANSPARENT
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct LayerId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MatteType {
    None,
    Add,
    Invert,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MaskMode {
    None,
    Add,
    Subtract,
    Intersect,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MaskModel {
    pub mode: MaskMode,
    #[serde(default)]
    pub inverted: bool,
    pub path: Value<BezPath>,
    /// Percent, 0..=100.
    pub opacity: Value<f32>,
}

/// Animated spatial transform as authored. Absent channels fall back to
/// their identity value.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct TransformModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Value<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value<Point>>,
    /// Scale factors, 1.0 = 100%.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Value<Vec2>>,
    /// Degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Value<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skew: Option<Value<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skew_angle: Option<Value<f32>>,
    /// Percent, 0..=100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<Value<f32>>,
}

impl TransformModel {
    pub fn validate(&self) -> ScrimResult<()> {
        if let Some(v) = &self.anchor {
            v.validate()?;
        }
        if let Some(v) = &self.position {
            v.validate()?;
        }
        if let Some(v) = &self.scale {
            v.validate()?;
        }
        if let Some(v) = &self.rotation {
            v.validate()?;
        }
        if let Some(v) = &self.skew {
            v.validate()?;
        }
        if let Some(v) = &self.skew_angle {
            v.validate()?;
        }
        if let Some(v) = &self.opacity {
            v.validate()?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct FillModel {
    pub color: Value<Rgba>,
    /// Percent, 0..=100.
    pub opacity: Value<f32>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct StrokeModel {
    pub color: Value<Rgba>,
    /// Percent, 0..=100.
    pub opacity: Value<f32>,
    pub width: Value<f32>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ShapeItemModel {
    pub path: Value<BezPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<FillModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<StrokeModel>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Justification {
    #[default]
    Left,
    Right,
    Center,
}

/// A text layer's per-keyframe source document: what to draw and how.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextDocument {
    pub text: String,
    pub font_name: String,
    pub size: f32,
    pub justification: Justification,
    pub line_height: f32,
    #[serde(default)]
    pub baseline_shift: f32,
    #[serde(default)]
    pub tracking: f32,
    pub fill_color: Rgba,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_color: Option<Rgba>,
    #[serde(default)]
    pub stroke_width: f32,
    #[serde(default)]
    pub stroke_over_fill: bool,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TextModel {
    pub document: Value<TextDocument>,
    /// Authored property tracks that override the per-document values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<Value<Rgba>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_color: Option<Value<Rgba>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<Value<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<Value<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Value<f32>>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum LayerKindModel {
    PreComp {
        ref_id: String,
        width: f64,
        height: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_remap: Option<Value<f32>>,
    },
    Solid {
        color: Rgba,
        width: f64,
        height: f64,
    },
    Image {
        ref_id: String,
    },
    Null,
    Shape {
        items: Vec<ShapeItemModel>,
    },
    Text {
        text: TextModel,
    },
    /// Carried through parsing so a document with an unsupported layer
    /// still loads; the build step drops it with a warning.
    Unknown,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct LayerModel {
    pub id: LayerId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<LayerId>,
    pub kind: LayerKindModel,
    #[serde(default = "MatteType::none")]
    pub matte_type: MatteType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masks: Vec<MaskModel>,
    #[serde(default)]
    pub transform: TransformModel,
    /// Visibility track: keyframed 0.0 / 1.0, sampled stepped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub in_out: Vec<crate::value::Keyframe<f32>>,
    #[serde(default = "default_time_stretch")]
    pub time_stretch: f32,
    /// Frame at which this layer starts, in composition frames.
    #[serde(default)]
    pub start_frame: f32,
    #[serde(default)]
    pub hidden: bool,
}

impl MatteType {
    fn none() -> Self {
        Self::None
    }

    pub fn is_matted(self) -> bool {
        matches!(self, Self::Add | Self::Invert)
    }
}

fn default_time_stretch() -> f32 {
    1.0
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ImageAssetModel {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct FontModel {
    pub family: String,
    pub style: String,
}

/// One glyph from the document's character table: vector shapes plus the
/// advance width in glyph units (per 100 units of font size).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CharGlyph {
    pub character: char,
    pub font_family: String,
    pub style: String,
    pub width: f64,
    pub shapes: Vec<BezPath>,
}

/// A parsed animation document: the root layer stack plus shared lookup
/// tables for precomps, image dimensions, fonts, and glyph shapes.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Document {
    pub width: f64,
    pub height: f64,
    pub frame_rate: f32,
    pub start_frame: f32,
    pub end_frame: f32,
    pub layers: Vec<Arc<LayerModel>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub precomps: BTreeMap<String, Vec<Arc<LayerModel>>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, ImageAssetModel>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fonts: BTreeMap<String, FontModel>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub chars: BTreeMap<String, CharGlyph>,
}

/// Key into [`Document::chars`].
pub fn glyph_key(character: char, font_family: &str, style: &str) -> String {
    format!("{character}\u{1}{font_family}\u{1}{style}")
}

impl Document {
    pub fn duration_frames(&self) -> f32 {
        self.end_frame - self.start_frame
    }

    pub fn char_glyph(
        &self,
        character: char,
        font_family: &str,
        style: &str,
    ) -> Option<&CharGlyph> {
        self.chars.get(&glyph_key(character, font_family, style))
    }

    pub fn validate(&self) -> ScrimResult<()> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(ScrimError::validation("document width/height must be > 0"));
        }
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ScrimError::validation("frame_rate must be finite and > 0"));
        }
        if self.end_frame <= self.start_frame {
            return Err(ScrimError::validation("end_frame must be after start_frame"));
        }

        for layer in self.layers.iter().chain(self.precomps.values().flatten()) {
            layer.validate(self)?;
        }
        Ok(())
    }
}

impl LayerModel {
    pub fn validate(&self, doc: &Document) -> ScrimResult<()> {
        self.transform.validate()?;
        for mask in &self.masks {
            mask.path.validate()?;
            mask.opacity.validate()?;
        }
        if !self
            .in_out
            .windows(2)
            .all(|w| w[0].progress <= w[1].progress)
        {
            return Err(ScrimError::validation(format!(
                "layer '{}': in/out keyframes must be sorted",
                self.name
            )));
        }

        match &self.kind {
            LayerKindModel::PreComp {
                ref_id, time_remap, ..
            } => {
                if !doc.precomps.contains_key(ref_id) {
                    return Err(ScrimError::validation(format!(
                        "layer '{}' references unknown precomp '{}'",
                        self.name, ref_id
                    )));
                }
                if let Some(tr) = time_remap {
                    tr.validate()?;
                }
            }
            LayerKindModel::Image { ref_id } => {
                if !doc.images.contains_key(ref_id) {
                    return Err(ScrimError::validation(format!(
                        "layer '{}' references unknown image '{}'",
                        self.name, ref_id
                    )));
                }
            }
            LayerKindModel::Solid { width, height, .. } => {
                if *width < 0.0 || *height < 0.0 {
                    return Err(ScrimError::validation(format!(
                        "layer '{}': solid dimensions must be >= 0",
                        self.name
                    )));
                }
            }
            LayerKindModel::Shape { items } => {
                for item in items {
                    item.path.validate()?;
                    if let Some(fill) = &item.fill {
                        fill.color.validate()?;
                        fill.opacity.validate()?;
                    }
                    if let Some(stroke) = &item.stroke {
                        stroke.color.validate()?;
                        stroke.opacity.validate()?;
                        stroke.width.validate()?;
                    }
                }
            }
            LayerKindModel::Text { text } => {
                text.document.validate()?;
            }
            LayerKindModel::Null | LayerKindModel::Unknown => {}
        }
        Ok(())
    }

    pub fn start_progress(&self, doc: &Document) -> f32 {
        self.start_frame / doc.duration_frames()
    }
}

impl crate::value::Lerp for TextDocument {
    // Text documents switch at keyframes; there is no meaningful midpoint.
    fn lerp(a: &Self, _b: &Self, _t: f32) -> Self {
        a.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Keyframe;

    fn doc_with_layer(layer: LayerModel) -> Document {
        Document {
            width: 100.0,
            height: 100.0,
            frame_rate: 30.0,
            start_frame: 0.0,
            end_frame: 60.0,
            layers: vec![Arc::new(layer)],
            precomps: BTreeMap::new(),
            images: BTreeMap::new(),
            fonts: BTreeMap::new(),
            chars: BTreeMap::new(),
        }
    }

    fn null_layer(id: u64) -> LayerModel {
        LayerModel {
            id: LayerId(id),
            name: format!("layer {id}"),
            parent_id: None,
            kind: LayerKindModel::Null,
            matte_type: MatteType::None,
            masks: Vec::new(),
            transform: TransformModel::default(),
            in_out: Vec::new(),
            time_stretch: 1.0,
            start_frame: 0.0,
            hidden: false,
        }
    }

    #[test]
    fn validate_rejects_missing_precomp() {
        let mut layer = null_layer(1);
        layer.kind = LayerKindModel::PreComp {
            ref_id: "missing".into(),
            width: 10.0,
            height: 10.0,
            time_remap: None,
        };
        let doc = doc_with_layer(layer);
        assert!(doc.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_image() {
        let mut layer = null_layer(1);
        layer.kind = LayerKindModel::Image {
            ref_id: "img_0".into(),
        };
        let doc = doc_with_layer(layer);
        assert!(doc.validate().is_err());
    }

    #[test]
    fn validate_rejects_unsorted_mask_keyframes() {
        let mut layer = null_layer(1);
        layer.masks.push(MaskModel {
            mode: MaskMode::Add,
            inverted: false,
            path: Value::Static(kurbo::BezPath::new()),
            opacity: Value::Keyframes(vec![
                Keyframe {
                    progress: 0.8,
                    value: 100.0,
                },
                Keyframe {
                    progress: 0.2,
                    value: 0.0,
                },
            ]),
        });
        let doc = doc_with_layer(layer);
        assert!(doc.validate().is_err());
    }

    #[test]
    fn document_json_round_trip() {
        let mut layer = null_layer(7);
        layer.kind = LayerKindModel::Solid {
            color: Rgba::new(10, 20, 30, 255),
            width: 50.0,
            height: 40.0,
        };
        let doc = doc_with_layer(layer);

        let json = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back.layers.len(), 1);
        assert_eq!(back.layers[0].id, LayerId(7));
        back.validate().unwrap();
    }

    #[test]
    fn glyph_key_distinguishes_style() {
        assert_ne!(
            glyph_key('a', "Inter", "Regular"),
            glyph_key('a', "Inter", "Bold")
        );
    }
}

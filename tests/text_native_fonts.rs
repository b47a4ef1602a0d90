use std::collections::BTreeMap;
use std::sync::Arc;

use kurbo::Point;
use scrim::model::{FontModel, Justification, LayerKindModel, LayerModel, TextDocument, TextModel};
use scrim::{
    Document, LayerId, LayerTree, MatteType, MemoryAssets, NoAssets, RenderOptions, Rgba, Surface,
    Value,
};

static FONT_BYTES: &[u8] = include_bytes!("assets/DejaVuSansMono.ttf");

const WIDTH: u32 = 192;
const HEIGHT: u32 = 128;
// Far enough in that a right-justified line stays on the surface.
const ANCHOR: Point = Point::new(96.0, 56.0);

fn assets() -> MemoryAssets {
    let mut assets = MemoryAssets::new();
    assets.insert_typeface("DejaVu Sans Mono", "Book", FONT_BYTES.to_vec());
    assets
}

fn text_document(text: &str, justification: Justification, tracking: f32) -> TextDocument {
    TextDocument {
        text: text.into(),
        font_name: "f1".into(),
        size: 32.0,
        justification,
        line_height: 40.0,
        baseline_shift: 0.0,
        tracking,
        fill_color: Rgba::WHITE,
        stroke_color: None,
        stroke_width: 0.0,
        stroke_over_fill: false,
    }
}

fn text_doc(d: TextDocument) -> Document {
    let layer = LayerModel {
        id: LayerId(1),
        name: "text".into(),
        parent_id: None,
        kind: LayerKindModel::Text {
            text: TextModel {
                document: Value::Static(d),
                fill_color: None,
                stroke_color: None,
                stroke_width: None,
                tracking: None,
                size: None,
            },
        },
        matte_type: MatteType::None,
        masks: Vec::new(),
        transform: scrim::model::TransformModel {
            position: Some(Value::Static(ANCHOR)),
            ..Default::default()
        },
        in_out: Vec::new(),
        time_stretch: 1.0,
        start_frame: 0.0,
        hidden: false,
    };

    let mut fonts = BTreeMap::new();
    fonts.insert(
        "f1".to_string(),
        FontModel {
            family: "DejaVu Sans Mono".into(),
            style: "Book".into(),
        },
    );

    Document {
        width: WIDTH as f64,
        height: HEIGHT as f64,
        frame_rate: 30.0,
        start_frame: 0.0,
        end_frame: 30.0,
        layers: vec![Arc::new(layer)],
        precomps: BTreeMap::new(),
        images: BTreeMap::new(),
        fonts,
        chars: BTreeMap::new(),
    }
}

fn render(doc: Document) -> Surface {
    let mut tree = LayerTree::new(doc).unwrap();
    tree.set_progress(0.0);
    tree.render(WIDTH, HEIGHT, &assets(), RenderOptions::default())
        .unwrap()
}

/// Horizontal extent of rendered coverage, ignoring faint antialiased
/// fringe.
fn ink_columns(surface: &Surface) -> (u32, u32) {
    let (mut min, mut max) = (u32::MAX, 0);
    for y in 0..surface.height() {
        for x in 0..surface.width() {
            if surface.pixel(x, y)[3] >= 8 {
                min = min.min(x);
                max = max.max(x);
            }
        }
    }
    assert!(min <= max, "no coverage rendered");
    (min, max)
}

fn ink_rows(surface: &Surface) -> (u32, u32) {
    let (mut min, mut max) = (u32::MAX, 0);
    for y in 0..surface.height() {
        for x in 0..surface.width() {
            if surface.pixel(x, y)[3] >= 8 {
                min = min.min(y);
                max = max.max(y);
            }
        }
    }
    assert!(min <= max, "no coverage rendered");
    (min, max)
}

#[test]
fn each_grapheme_advances_by_its_shaped_width() {
    let (min1, max1) = ink_columns(&render(text_doc(text_document(
        "l",
        Justification::Left,
        0.0,
    ))));
    let (min2, max2) = ink_columns(&render(text_doc(text_document(
        "ll",
        Justification::Left,
        0.0,
    ))));
    let (min3, max3) = ink_columns(&render(text_doc(text_document(
        "lll",
        Justification::Left,
        0.0,
    ))));

    // The line starts at the anchor regardless of glyph count.
    assert!(min1.abs_diff(min2) <= 2 && min2.abs_diff(min3) <= 2);

    // Monospace: each extra grapheme moves the right edge by the same
    // shaped advance.
    let d2 = max2 - max1;
    let d3 = max3 - max2;
    assert!(d2 > 0, "second glyph added no width");
    assert!(d2.abs_diff(d3) <= 2, "advances were {d2} then {d3}");
}

#[test]
fn tracking_adds_to_every_advance() {
    let (_, plain) = ink_columns(&render(text_doc(text_document(
        "ll",
        Justification::Left,
        0.0,
    ))));
    // Tracking is thousandths of an em over ten: 100 adds 10 units per
    // grapheme boundary.
    let (_, tracked) = ink_columns(&render(text_doc(text_document(
        "ll",
        Justification::Left,
        100.0,
    ))));
    let widened = tracked - plain;
    assert!((8..=12).contains(&widened), "tracking widened by {widened}");
}

#[test]
fn justification_shifts_by_the_measured_line_width() {
    let (left_min, _) = ink_columns(&render(text_doc(text_document(
        "ll",
        Justification::Left,
        0.0,
    ))));
    let (center_min, _) = ink_columns(&render(text_doc(text_document(
        "ll",
        Justification::Center,
        0.0,
    ))));
    let (right_min, right_max) = ink_columns(&render(text_doc(text_document(
        "ll",
        Justification::Right,
        0.0,
    ))));

    // Right justification pulls the whole measured line behind the anchor;
    // center pulls it half as far.
    assert!(right_max < ANCHOR.x as u32);
    let full_shift = left_min - right_min;
    let half_shift = left_min - center_min;
    assert!(full_shift > 0);
    assert!(
        (2 * half_shift).abs_diff(full_shift) <= 2,
        "center shifted {half_shift}, right shifted {full_shift}"
    );
}

#[test]
fn multiline_text_spreads_around_the_anchor_line() {
    let (one_min, one_max) = ink_rows(&render(text_doc(text_document(
        "l",
        Justification::Left,
        0.0,
    ))));
    let (two_min, two_max) = ink_rows(&render(text_doc(text_document(
        "l\nl",
        Justification::Left,
        0.0,
    ))));

    // Two lines at height 40 sit 20 above and 20 below the single-line
    // baseline.
    assert!((19..=21).contains(&(one_min - two_min)));
    assert!((19..=21).contains(&(two_max - one_max)));
}

#[test]
fn text_size_scales_the_shaped_advance() {
    let advance_at = |size: f32| {
        let mut one = text_document("l", Justification::Left, 0.0);
        one.size = size;
        let mut two = text_document("ll", Justification::Left, 0.0);
        two.size = size;
        let (_, r1) = ink_columns(&render(text_doc(one)));
        let (_, r2) = ink_columns(&render(text_doc(two)));
        r2 - r1
    };

    let small = advance_at(32.0);
    let large = advance_at(64.0);
    assert!(
        large.abs_diff(2 * small) <= 3,
        "advance {small} at 32 but {large} at 64"
    );
}

#[test]
fn missing_typeface_skips_text_without_error() {
    let mut tree = LayerTree::new(text_doc(text_document("ll", Justification::Left, 0.0))).unwrap();
    tree.set_progress(0.0);
    let surface = tree
        .render(WIDTH, HEIGHT, &NoAssets, RenderOptions::default())
        .unwrap();
    assert!(surface.data().iter().all(|&b| b == 0));
}

use std::collections::BTreeMap;
use std::sync::Arc;

use scrim::model::{LayerKindModel, LayerModel, TransformModel};
use scrim::{Document, KeyPath, LayerId, LayerTree, MatteType, Rgba};

fn solid(id: u64, name: &str) -> LayerModel {
    LayerModel {
        id: LayerId(id),
        name: name.into(),
        parent_id: None,
        kind: LayerKindModel::Solid {
            color: Rgba::new(0, 0, 255, 255),
            width: 8.0,
            height: 8.0,
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

fn precomp(id: u64, name: &str, ref_id: &str) -> LayerModel {
    let mut layer = solid(id, name);
    layer.kind = LayerKindModel::PreComp {
        ref_id: ref_id.into(),
        width: 32.0,
        height: 32.0,
        time_remap: None,
    };
    layer
}

/// Two groups, each containing a layer named "Dot", plus a top-level "Dot".
fn nested_tree() -> LayerTree {
    let mut precomps = BTreeMap::new();
    precomps.insert("g1".to_string(), vec![Arc::new(solid(10, "Dot"))]);
    precomps.insert(
        "g2".to_string(),
        vec![Arc::new(solid(20, "Dot")), Arc::new(solid(21, "Ring"))],
    );
    let doc = Document {
        width: 32.0,
        height: 32.0,
        frame_rate: 30.0,
        start_frame: 0.0,
        end_frame: 30.0,
        layers: vec![
            Arc::new(precomp(1, "Group A", "g1")),
            Arc::new(precomp(2, "Group B", "g2")),
            Arc::new(solid(3, "Dot")),
        ],
        precomps,
        images: BTreeMap::new(),
        fonts: BTreeMap::new(),
        chars: BTreeMap::new(),
    };
    LayerTree::new(doc).unwrap()
}

fn resolved_ids(tree: &LayerTree, keys: &[&str]) -> Vec<u64> {
    let mut ids: Vec<u64> = tree
        .resolve_key_path(&KeyPath::new(keys.iter().copied()))
        .iter()
        .filter_map(|k| k.resolved_layer().map(|id| id.0))
        .collect();
    ids.sort_unstable();
    ids
}

#[test]
fn exact_path_resolves_one_layer() {
    let tree = nested_tree();
    assert_eq!(resolved_ids(&tree, &["Group A", "Dot"]), vec![10]);
}

#[test]
fn wildcard_matches_each_sibling_once() {
    let tree = nested_tree();
    assert_eq!(resolved_ids(&tree, &["*"]), vec![1, 2, 3]);
    assert_eq!(resolved_ids(&tree, &["*", "Dot"]), vec![10, 20]);
}

#[test]
fn globstar_matches_any_depth() {
    let tree = nested_tree();
    assert_eq!(resolved_ids(&tree, &["**", "Dot"]), vec![3, 10, 20]);
}

#[test]
fn globstar_alone_matches_everything() {
    let tree = nested_tree();
    assert_eq!(resolved_ids(&tree, &["**"]), vec![1, 2, 3, 10, 20, 21]);
}

#[test]
fn non_matching_path_resolves_nothing() {
    let tree = nested_tree();
    assert!(resolved_ids(&tree, &["Group C", "Dot"]).is_empty());
}

#[test]
fn resolved_paths_carry_full_names() {
    let tree = nested_tree();
    let found = tree.resolve_key_path(&KeyPath::new(["Group B", "Ring"]));
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].keys().join("."), "Group B.Ring");
    assert_eq!(found[0].resolved_layer(), Some(LayerId(21)));
}

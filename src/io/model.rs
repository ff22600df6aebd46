//! JSON persistence of trained trees.
//!
//! Nodes are stored as a flat list in pre-order with child indices, so the
//! document depth does not grow with the tree depth.

use crate::core::train::SplitCriterion;
use crate::core::tree::{assemble, DecisionTree, FlatNode};
use crate::types::{ClassLabelMapping, LandCoverError, LandCoverResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Current model format version
pub const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredModel {
    version: u32,
    feature_names: Vec<String>,
    classes: Vec<String>,
    criterion: SplitCriterion,
    importances: Vec<f64>,
    nodes: Vec<FlatNode>,
}

/// Serialize a tree to pretty-printed JSON.
pub fn tree_to_json(tree: &DecisionTree) -> LandCoverResult<String> {
    let nodes = tree.root().flatten();
    let stored = StoredModel {
        version: MODEL_FORMAT_VERSION,
        feature_names: tree.feature_names().to_vec(),
        classes: tree.classes().labels().to_vec(),
        criterion: tree.criterion(),
        importances: tree.feature_importances().to_vec(),
        nodes,
    };
    Ok(serde_json::to_string_pretty(&stored)?)
}

/// Parse and validate a tree serialized by [`tree_to_json`].
pub fn tree_from_json(json: &str) -> LandCoverResult<DecisionTree> {
    let stored: StoredModel = serde_json::from_str(json)?;
    if stored.version != MODEL_FORMAT_VERSION {
        return Err(LandCoverError::InvalidFormat(format!(
            "Unsupported model version: {} (expected {})",
            stored.version, MODEL_FORMAT_VERSION
        )));
    }
    if stored.nodes.is_empty() {
        return Err(LandCoverError::InvalidFormat("model has no nodes".to_string()));
    }

    let classes = ClassLabelMapping::try_from(stored.classes)?;

    let root = assemble(stored.nodes)?;
    DecisionTree::new(
        root,
        stored.feature_names,
        classes,
        stored.criterion,
        stored.importances,
    )
}

pub fn save_tree<P: AsRef<Path>>(tree: &DecisionTree, path: P) -> LandCoverResult<()> {
    log::info!("Saving model to {}", path.as_ref().display());
    fs::write(path, tree_to_json(tree)?)?;
    Ok(())
}

pub fn load_tree<P: AsRef<Path>>(path: P) -> LandCoverResult<DecisionTree> {
    log::info!("Loading model from {}", path.as_ref().display());
    let json = fs::read_to_string(path)?;
    let tree = tree_from_json(&json)?;
    log::debug!(
        "Loaded tree with {} nodes over features {:?}",
        tree.node_count(),
        tree.feature_names()
    );
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::train::DecisionTreeTrainer;

    fn tree() -> DecisionTree {
        DecisionTreeTrainer::default()
            .fit_rows(
                &[vec![1.0, 9.0], vec![2.0, 8.0], vec![7.0, 1.0], vec![8.0, 7.5]],
                &["water", "water", "soil", "urban"],
                vec!["red".to_string(), "nir".to_string()],
            )
            .unwrap()
    }

    #[test]
    fn test_json_preserves_tree() {
        let original = tree();
        let json = tree_to_json(&original).unwrap();
        assert!(json.contains("\"version\": 1"));
        let restored = tree_from_json(&json).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let json = tree_to_json(&tree()).unwrap().replace("\"version\": 1", "\"version\": 7");
        assert!(matches!(
            tree_from_json(&json),
            Err(LandCoverError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_malformed_graph_rejected() {
        let mut value: serde_json::Value = serde_json::from_str(&tree_to_json(&tree()).unwrap()).unwrap();
        value["nodes"][0]["left"] = serde_json::json!(0);
        assert!(matches!(
            tree_from_json(&value.to_string()),
            Err(LandCoverError::InvalidFormat(_))
        ));

        value["nodes"][0]["left"] = serde_json::json!(99);
        assert!(tree_from_json(&value.to_string()).is_err());
        assert!(matches!(tree_from_json("{}"), Err(LandCoverError::Json(_))));
    }

    #[test]
    fn test_shared_or_orphan_nodes_rejected() {
        let original: serde_json::Value = serde_json::from_str(&tree_to_json(&tree()).unwrap()).unwrap();
        let root_left = original["nodes"][0]["left"].clone();
        let root_right = original["nodes"][0]["right"].clone();
        assert_eq!(root_left, serde_json::json!(1));

        // both root children point at the same subtree
        let mut shared = original.clone();
        shared["nodes"][0]["right"] = root_left;
        assert!(matches!(
            tree_from_json(&shared.to_string()),
            Err(LandCoverError::InvalidFormat(_))
        ));

        // a trailing leaf nothing points at
        let mut orphan = original.clone();
        let leaf = orphan["nodes"][root_right.as_u64().unwrap() as usize].clone();
        orphan["nodes"].as_array_mut().unwrap().push(leaf);
        assert!(matches!(
            tree_from_json(&orphan.to_string()),
            Err(LandCoverError::InvalidFormat(_))
        ));
    }
}

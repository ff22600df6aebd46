//! Trained decision tree and its per-sample walk.

use crate::core::train::SplitCriterion;
use crate::types::{ClassCode, ClassLabelMapping, LandCoverError, LandCoverResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A node of a trained tree. Parents own their children.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Leaf {
        class: ClassCode,
        /// Training rows per class code that reached this leaf
        distribution: Vec<usize>,
    },
    Split {
        feature: usize,
        threshold: f32,
        /// Rows with `value <= threshold`
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf { .. })
    }

    /// Follow the comparisons from this node down to a leaf.
    ///
    /// `value` yields the sample's value for a feature index, or `None` when
    /// it is no-data, which stops the walk.
    #[inline]
    pub fn walk<F>(&self, mut value: F) -> Option<&TreeNode>
    where
        F: FnMut(usize) -> Option<f32>,
    {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { .. } => return Some(node),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = value(*feature)?;
                    if v.is_nan() {
                        return None;
                    }
                    node = if v <= *threshold { left } else { right };
                }
            }
        }
    }

    /// Nodes in pre-order (left subtree first) with their depth
    fn preorder(&self) -> Preorder<'_> {
        Preorder {
            stack: vec![(self, 0)],
        }
    }

    fn depth(&self) -> usize {
        self.preorder().map(|(_, d)| d).max().unwrap_or(0)
    }

    fn node_count(&self) -> usize {
        self.preorder().count()
    }

    fn leaf_count(&self) -> usize {
        self.preorder().filter(|(n, _)| n.is_leaf()).count()
    }

    fn check(&self, features: usize, classes: usize) -> LandCoverResult<()> {
        for (node, _) in self.preorder() {
            match node {
                TreeNode::Leaf {
                    class,
                    distribution,
                } => {
                    if *class as usize >= classes || distribution.len() != classes {
                        return Err(LandCoverError::InvalidFormat(format!(
                            "leaf class {} / distribution of {} does not fit {} classes",
                            class,
                            distribution.len(),
                            classes
                        )));
                    }
                }
                TreeNode::Split {
                    feature, threshold, ..
                } => {
                    if *feature >= features || !threshold.is_finite() {
                        return Err(LandCoverError::InvalidFormat(format!(
                            "split on feature {} at {} is invalid for {} features",
                            feature, threshold, features
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Pre-order node list with child indices, the inverse of [`assemble`]
    pub(crate) fn flatten(&self) -> Vec<FlatNode> {
        let mut nodes: Vec<FlatNode> = Vec::new();
        // (node, parent index and whether it is the parent's left child)
        let mut stack: Vec<(&TreeNode, Option<(usize, bool)>)> = vec![(self, None)];

        while let Some((node, parent)) = stack.pop() {
            let index = nodes.len();
            match node {
                TreeNode::Leaf {
                    class,
                    distribution,
                } => nodes.push(FlatNode::Leaf {
                    class: *class,
                    distribution: distribution.clone(),
                }),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    // children are filled in once their indices are known
                    nodes.push(FlatNode::Split {
                        feature: *feature,
                        threshold: *threshold,
                        left: 0,
                        right: 0,
                    });
                    stack.push((right, Some((index, false))));
                    stack.push((left, Some((index, true))));
                }
            }
            if let Some((at, is_left)) = parent {
                if let FlatNode::Split { left, right, .. } = &mut nodes[at] {
                    *(if is_left { left } else { right }) = index;
                }
            }
        }
        nodes
    }

    /// Move both children out, leaving empty leaves behind
    fn take_children(&mut self, out: &mut Vec<Box<TreeNode>>) {
        if let TreeNode::Split { left, right, .. } = self {
            out.push(std::mem::replace(left, Box::new(TreeNode::empty_leaf())));
            out.push(std::mem::replace(right, Box::new(TreeNode::empty_leaf())));
        }
    }

    fn empty_leaf() -> TreeNode {
        TreeNode::Leaf {
            class: 0,
            distribution: Vec::new(),
        }
    }
}

// Deep chains would otherwise be dropped recursively.
impl Drop for TreeNode {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.take_children(&mut pending);
        while let Some(mut node) = pending.pop() {
            node.take_children(&mut pending);
        }
    }
}

struct Preorder<'a> {
    stack: Vec<(&'a TreeNode, usize)>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = (&'a TreeNode, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let (node, depth) = self.stack.pop()?;
        if let TreeNode::Split { left, right, .. } = node {
            self.stack.push((right, depth + 1));
            self.stack.push((left, depth + 1));
        }
        Some((node, depth))
    }
}

/// A node whose children are referenced by index into a flat list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub(crate) enum FlatNode {
    Leaf {
        class: ClassCode,
        distribution: Vec<usize>,
    },
    Split {
        feature: usize,
        threshold: f32,
        left: usize,
        right: usize,
    },
}

/// Link a flat node list into an owned tree rooted at index 0.
///
/// Every child index must be greater than its parent's and every node other
/// than the root must be referenced exactly once.
pub(crate) fn assemble(nodes: Vec<FlatNode>) -> LandCoverResult<TreeNode> {
    let count = nodes.len();
    let mut built: Vec<Option<TreeNode>> = (0..count).map(|_| None).collect();

    for (index, node) in nodes.into_iter().enumerate().rev() {
        let node = match node {
            FlatNode::Leaf {
                class,
                distribution,
            } => TreeNode::Leaf {
                class,
                distribution,
            },
            FlatNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                let mut child = |at: usize| {
                    if at <= index || at >= count {
                        return Err(LandCoverError::InvalidFormat(format!(
                            "node {} has child index {} outside ({}, {})",
                            index, at, index, count
                        )));
                    }
                    built[at].take().map(Box::new).ok_or_else(|| {
                        LandCoverError::InvalidFormat(format!(
                            "node {} is referenced more than once",
                            at
                        ))
                    })
                };
                let left = child(left)?;
                let right = child(right)?;
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }
            }
        };
        built[index] = Some(node);
    }

    if let Some(orphan) = built.iter().skip(1).position(Option::is_some) {
        return Err(LandCoverError::InvalidFormat(format!(
            "node {} is unreachable from the root",
            orphan + 1
        )));
    }
    built
        .first_mut()
        .and_then(Option::take)
        .ok_or_else(|| LandCoverError::InvalidFormat("tree has no nodes".to_string()))
}

/// A decision tree together with the feature layout and classes it was trained on
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    root: TreeNode,
    feature_names: Vec<String>,
    classes: ClassLabelMapping,
    criterion: SplitCriterion,
    importances: Vec<f64>,
}

impl DecisionTree {
    /// Assemble a tree, checking that every node fits the feature and class layout.
    pub fn new(
        root: TreeNode,
        feature_names: Vec<String>,
        classes: ClassLabelMapping,
        criterion: SplitCriterion,
        importances: Vec<f64>,
    ) -> LandCoverResult<Self> {
        if importances.len() != feature_names.len() {
            return Err(LandCoverError::InvalidFormat(format!(
                "{} importances for {} features",
                importances.len(),
                feature_names.len()
            )));
        }
        root.check(feature_names.len(), classes.len())?;
        Ok(Self {
            root,
            feature_names,
            classes,
            criterion,
            importances,
        })
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn classes(&self) -> &ClassLabelMapping {
        &self.classes
    }

    pub fn criterion(&self) -> SplitCriterion {
        self.criterion
    }

    /// Mean decrease in impurity per feature, summing to 1 unless the tree is a single leaf
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    /// Number of splits on the longest root-to-leaf path
    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    pub fn node_count(&self) -> usize {
        self.root.node_count()
    }

    pub fn leaf_count(&self) -> usize {
        self.root.leaf_count()
    }

    /// Class code for a feature vector, `None` if a visited feature is NaN or missing
    pub fn predict(&self, features: &[f32]) -> Option<ClassCode> {
        match self.root.walk(|f| features.get(f).copied())? {
            TreeNode::Leaf { class, .. } => Some(*class),
            TreeNode::Split { .. } => None,
        }
    }

    /// Class label for a feature vector
    pub fn predict_label(&self, features: &[f32]) -> Option<&str> {
        self.predict(features).and_then(|c| self.classes.label(c))
    }

    /// Class probabilities (leaf distribution, normalized) in class-code order
    pub fn predict_proba(&self, features: &[f32]) -> Option<Vec<f64>> {
        match self.root.walk(|f| features.get(f).copied())? {
            TreeNode::Leaf { distribution, .. } => {
                let total: usize = distribution.iter().sum();
                if total == 0 {
                    return Some(vec![0.0; distribution.len()]);
                }
                Some(
                    distribution
                        .iter()
                        .map(|&n| n as f64 / total as f64)
                        .collect(),
                )
            }
            TreeNode::Split { .. } => None,
        }
    }

    /// Fail unless `names` are exactly the trained features, in order.
    pub fn validate_features(&self, names: &[String]) -> LandCoverResult<()> {
        if names != self.feature_names.as_slice() {
            return Err(LandCoverError::FeatureMismatch {
                expected: self.feature_names.clone(),
                found: names.to_vec(),
            });
        }
        Ok(())
    }

    fn feature_name(&self, feature: usize) -> &str {
        self.feature_names
            .get(feature)
            .map(String::as_str)
            .unwrap_or("?")
    }
}

enum RuleLine<'a> {
    Node(&'a TreeNode, usize),
    Otherwise(usize, f32, usize),
}

impl fmt::Display for DecisionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![RuleLine::Node(&self.root, 0)];
        while let Some(line) = stack.pop() {
            match line {
                RuleLine::Node(
                    TreeNode::Leaf {
                        class,
                        distribution,
                    },
                    indent,
                ) => {
                    let label = self.classes.label(*class).unwrap_or("?");
                    writeln!(f, "{}-> {} {:?}", "  ".repeat(indent), label, distribution)?;
                }
                RuleLine::Node(
                    TreeNode::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    },
                    indent,
                ) => {
                    writeln!(
                        f,
                        "{}{} <= {}",
                        "  ".repeat(indent),
                        self.feature_name(*feature),
                        threshold
                    )?;
                    stack.push(RuleLine::Node(right, indent + 1));
                    stack.push(RuleLine::Otherwise(*feature, *threshold, indent));
                    stack.push(RuleLine::Node(left, indent + 1));
                }
                RuleLine::Otherwise(feature, threshold, indent) => {
                    writeln!(
                        f,
                        "{}{} > {}",
                        "  ".repeat(indent),
                        self.feature_name(feature),
                        threshold
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(class: ClassCode, distribution: Vec<usize>) -> Box<TreeNode> {
        Box::new(TreeNode::Leaf {
            class,
            distribution,
        })
    }

    /// red <= 0.5 -> water, else (nir <= 0.3 -> urban, else vegetation)
    fn sample_tree() -> DecisionTree {
        let classes = ClassLabelMapping::from_labels(["urban", "vegetation", "water"]).unwrap();
        let root = TreeNode::Split {
            feature: 0,
            threshold: 0.5,
            left: leaf(2, vec![0, 0, 5]),
            right: Box::new(TreeNode::Split {
                feature: 1,
                threshold: 0.3,
                left: leaf(0, vec![3, 1, 0]),
                right: leaf(1, vec![0, 6, 0]),
            }),
        };
        DecisionTree::new(
            root,
            vec!["red".to_string(), "nir".to_string()],
            classes,
            SplitCriterion::Gini,
            vec![0.6, 0.4],
        )
        .unwrap()
    }

    #[test]
    fn test_predict_walks_left_on_equal() {
        let tree = sample_tree();
        assert_eq!(tree.predict_label(&[0.5, 9.0]), Some("water"));
        assert_eq!(tree.predict_label(&[0.6, 0.3]), Some("urban"));
        assert_eq!(tree.predict_label(&[0.6, 0.31]), Some("vegetation"));
    }

    #[test]
    fn test_nan_short_circuits_only_on_visited_feature() {
        let tree = sample_tree();
        // nir is never examined on the water branch
        assert_eq!(tree.predict(&[0.1, f32::NAN]), Some(2));
        assert_eq!(tree.predict(&[f32::NAN, 0.1]), None);
        assert_eq!(tree.predict(&[0.9, f32::NAN]), None);
        assert_eq!(tree.predict(&[0.9]), None);
    }

    #[test]
    fn test_predict_proba() {
        let tree = sample_tree();
        let p = tree.predict_proba(&[0.9, 0.0]).unwrap();
        assert_eq!(p, vec![0.75, 0.25, 0.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_structure_queries() {
        let tree = sample_tree();
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.leaf_count(), 3);
    }

    #[test]
    fn test_validate_features() {
        let tree = sample_tree();
        assert!(tree
            .validate_features(&["red".to_string(), "nir".to_string()])
            .is_ok());
        let swapped = vec!["nir".to_string(), "red".to_string()];
        match tree.validate_features(&swapped) {
            Err(LandCoverError::FeatureMismatch { expected, found }) => {
                assert_eq!(expected[0], "red");
                assert_eq!(found[0], "nir");
            }
            other => panic!("expected FeatureMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_new_rejects_out_of_range_nodes() {
        let classes = ClassLabelMapping::from_labels(["a", "b"]).unwrap();
        let root = TreeNode::Split {
            feature: 3,
            threshold: 1.0,
            left: leaf(0, vec![1, 0]),
            right: leaf(1, vec![0, 1]),
        };
        assert!(matches!(
            DecisionTree::new(root, vec!["x".to_string()], classes, SplitCriterion::Gini, vec![1.0]),
            Err(LandCoverError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_display_rules() {
        let text = sample_tree().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "red <= 0.5");
        assert_eq!(lines[1], "  -> water [0, 0, 5]");
        assert_eq!(lines[2], "red > 0.5");
        assert_eq!(lines[3], "  nir <= 0.3");
        assert_eq!(lines.len(), 7);
    }
}

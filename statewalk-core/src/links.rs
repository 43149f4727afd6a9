// Link-tree merging for page clusters

use crate::history::ObsId;
use crate::model::LinkId;
use crate::tree::KeyTree;
use crate::vectors::{ConcreteTree, Token};
use statewalk_scanner::LinkRef;
use std::collections::BTreeSet;

/// Concrete links of several pages, grouped by abstract link position.
pub type MergedTree = KeyTree<Token, Vec<(ObsId, LinkRef)>>;

/// Merge the link trees of all pages of one cluster.
///
/// The root splits on link kind. Below that a node is only split further
/// when every page has exactly the same non-empty set of child keys there;
/// otherwise everything below is aggregated into a single abstract link.
pub fn merge_trees(trees: &[(ObsId, &ConcreteTree)]) -> MergedTree {
    let mut merged = MergedTree::new();
    let kinds: BTreeSet<&Token> = trees.iter().flat_map(|(_, t)| t.keys()).collect();
    for kind in kinds {
        let subtrees: Vec<(ObsId, Option<&ConcreteTree>)> =
            trees.iter().map(|(obs, t)| (*obs, t.child(kind))).collect();
        merged.insert_child(kind.clone(), merge_node(&subtrees));
    }
    merged
}

fn merge_node(nodes: &[(ObsId, Option<&ConcreteTree>)]) -> MergedTree {
    let key_sets: Vec<Vec<&Token>> = nodes
        .iter()
        .map(|(_, t)| t.map(|t| t.keys()).unwrap_or_default())
        .collect();
    let splittable = key_sets
        .first()
        .is_some_and(|first| !first.is_empty() && key_sets.iter().all(|k| k == first));

    if splittable {
        let mut node = MergedTree::new();
        for key in &key_sets[0] {
            let below: Vec<(ObsId, Option<&ConcreteTree>)> = nodes
                .iter()
                .map(|(obs, t)| (*obs, t.and_then(|t| t.child(key))))
                .collect();
            node.insert_child((*key).clone(), merge_node(&below));
        }
        return node;
    }

    let members = nodes
        .iter()
        .flat_map(|(obs, t)| {
            t.into_iter()
                .flat_map(move |t| t.values().into_iter().map(move |link| (*obs, *link)))
        })
        .collect();
    KeyTree::leaf(members)
}

/// Match a page's link tree against an existing abstract link tree.
/// Returns the abstract link of every concrete link, or `None` when the
/// structures disagree.
pub fn try_merge(
    abstract_tree: &KeyTree<Token, LinkId>,
    page_tree: &ConcreteTree,
) -> Option<Vec<(LinkId, LinkRef)>> {
    let mut out = Vec::new();
    if match_node(abstract_tree, page_tree, &mut out) {
        Some(out)
    } else {
        None
    }
}

fn match_node(
    abstract_node: &KeyTree<Token, LinkId>,
    page_node: &ConcreteTree,
    out: &mut Vec<(LinkId, LinkRef)>,
) -> bool {
    if let Some(id) = abstract_node.value() {
        out.extend(page_node.values().into_iter().map(|link| (*id, *link)));
        return true;
    }
    if abstract_node.keys() != page_node.keys() {
        return false;
    }
    abstract_node.children().all(|(key, child)| {
        page_node
            .child(key)
            .is_some_and(|page_child| match_node(child, page_child, out))
    })
}

/// A concrete link of `page_tree` sitting at the abstract link position `path`.
pub fn resolve(page_tree: &ConcreteTree, path: &[Token]) -> Option<LinkRef> {
    page_tree
        .get(path)
        .and_then(|node| node.values().first().map(|link| **link))
}

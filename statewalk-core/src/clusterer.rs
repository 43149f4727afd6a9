// Hierarchical page clustering

use crate::config::ClusterConfig;
use crate::error::RebuildReason;
use crate::history::ObsId;
use crate::model::PageId;
use crate::vectors::{FeatureVector, Level};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct ClusterNode {
    children: BTreeMap<Level, ClusterNode>,
    /// Observations whose vector ends at this node.
    members: Vec<ObsId>,
    leaf_count: usize,
    depth: usize,
    clusterable: bool,
    page: Option<PageId>,
}

impl ClusterNode {
    fn refresh(&mut self) {
        let own = usize::from(!self.members.is_empty());
        self.leaf_count = own + self.children.values().map(|c| c.leaf_count).sum::<usize>();
        self.depth = 1 + self.children.values().map(|c| c.depth).max().unwrap_or(0);
    }

    fn insert(&mut self, path: &[Level], obs: ObsId) {
        match path.split_first() {
            None => self.members.push(obs),
            Some((key, rest)) => self.children.entry(key.clone()).or_default().insert(rest, obs),
        }
        self.refresh();
    }

    fn all_members(&self, out: &mut Vec<ObsId>) {
        out.extend(&self.members);
        for child in self.children.values() {
            child.all_members(out);
        }
    }
}

/// Where an observation landed after an incremental add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub page: PageId,
    pub created: bool,
}

/// Pages keyed by the levels of their feature vectors. A subtree that is
/// large, shallow and deep enough collapses into one abstract page.
#[derive(Debug, Clone)]
pub struct PageClusterer {
    root: ClusterNode,
    config: ClusterConfig,
}

fn median(values: &[usize]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    }
}

impl PageClusterer {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            root: ClusterNode::default(),
            config,
        }
    }

    /// Cluster a batch of observations. Groups come back in tree order and
    /// group `i` is abstract page `PageId(i)`.
    pub fn build<'a>(
        config: &ClusterConfig,
        items: impl IntoIterator<Item = (ObsId, &'a FeatureVector)>,
    ) -> (Self, Vec<Vec<ObsId>>) {
        let mut clusterer = Self::new(config.clone());
        for (obs, vector) in items {
            clusterer.root.insert(vector, obs);
        }
        let cfg = clusterer.config.clone();
        scan(&mut clusterer.root, 0, &cfg);
        let mut groups = Vec::new();
        assign(&mut clusterer.root, &mut groups);
        debug!("Clustered pages into {} groups", groups.len());
        (clusterer, groups)
    }

    /// Add one observation without rebuilding. Fails when the
    /// clusterability of any existing node would change, since the batch
    /// result would then differ from the incremental one.
    pub fn add(
        &mut self,
        obs: ObsId,
        vector: &FeatureVector,
        fresh: PageId,
    ) -> Result<Placement, RebuildReason> {
        self.root.insert(vector, obs);
        self.check_flags(vector)?;

        let mut node = &mut self.root;
        for (n, key) in vector.iter().enumerate() {
            let Some(child) = node.children.get_mut(key) else {
                return Err(RebuildReason::ClusterShift);
            };
            node = child;
            let terminal = n + 1 == vector.len();
            if node.clusterable || terminal {
                return Ok(match node.page {
                    Some(page) => Placement {
                        page,
                        created: false,
                    },
                    None => {
                        node.page = Some(fresh);
                        Placement {
                            page: fresh,
                            created: true,
                        }
                    }
                });
            }
        }
        Err(RebuildReason::ClusterShift)
    }

    /// Re-evaluate every node whose inputs changed: the nodes on the
    /// inserted path and their siblings.
    fn check_flags(&self, vector: &FeatureVector) -> Result<(), RebuildReason> {
        let mut node = &self.root;
        for (n, key) in vector.iter().enumerate() {
            let preds = child_predicates(node, n, &self.config);
            for ((_, child), pred) in node.children.iter().zip(preds) {
                let below = child_predicates(child, n + 1, &self.config);
                let flag = pred && !below.iter().any(|p| *p);
                if flag != child.clusterable {
                    debug!("Clusterability changed at level {}", n);
                    return Err(RebuildReason::ClusterShift);
                }
            }
            match node.children.get(key) {
                Some(child) => node = child,
                None => return Err(RebuildReason::ClusterShift),
            }
        }
        Ok(())
    }
}

fn predicate(key: &Level, node: &ClusterNode, n: usize, sibling_median: f64, cfg: &ClusterConfig) -> bool {
    let level = n as f64;
    !node.children.is_empty()
        && node.leaf_count as f64 > sibling_median
        && node.leaf_count as f64 > cfg.min_leaves * (1.0 + 1.0 / (level + 1.0))
        && key.len() as f64 > cfg.key_len_factor * (-level).exp()
        && node.depth <= cfg.max_subtree_depth
        && n >= cfg.min_level
}

/// Predicate value of each child of `node`, in key order. Children sit at level `n`.
fn child_predicates(node: &ClusterNode, n: usize, cfg: &ClusterConfig) -> Vec<bool> {
    let counts: Vec<usize> = node.children.values().map(|c| c.leaf_count).collect();
    let med = median(&counts);
    node.children
        .iter()
        .map(|(key, child)| predicate(key, child, n, med, cfg))
        .collect()
}

/// Set clusterable flags below `node`; returns whether any child satisfied the predicate.
fn scan(node: &mut ClusterNode, n: usize, cfg: &ClusterConfig) -> bool {
    let preds = child_predicates(node, n, cfg);
    let mut any = false;
    for (child, pred) in node.children.values_mut().zip(preds) {
        let below = scan(child, n + 1, cfg);
        child.clusterable = pred && !below;
        any |= pred;
    }
    any
}

fn assign(node: &mut ClusterNode, groups: &mut Vec<Vec<ObsId>>) {
    for child in node.children.values_mut() {
        if child.children.is_empty() || child.clusterable {
            let mut members = Vec::new();
            child.all_members(&mut members);
            members.sort_unstable();
            child.page = Some(PageId(groups.len()));
            groups.push(members);
        } else {
            if !child.members.is_empty() {
                let mut members = child.members.clone();
                members.sort_unstable();
                child.page = Some(PageId(groups.len()));
                groups.push(members);
            }
            assign(child, groups);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vectors::Token;

    fn vector(parts: &[&[&str]]) -> FeatureVector {
        parts
            .iter()
            .map(|level| level.iter().map(|t| Token::Str(t.to_string())).collect())
            .collect()
    }

    fn loose() -> ClusterConfig {
        ClusterConfig {
            min_leaves: 0.5,
            key_len_factor: 0.0,
            max_subtree_depth: 6,
            min_level: 0,
        }
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3, 1, 2]), 2.0);
        assert_eq!(median(&[1, 2, 3, 4]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_distinct_vectors_get_own_pages() {
        let a = vector(&[&["x"], &["a"]]);
        let b = vector(&[&["x"], &["b"]]);
        let c = vector(&[&["y"]]);
        let items = vec![(0, &a), (1, &b), (2, &c), (3, &a)];
        let (_, groups) = PageClusterer::build(&ClusterConfig::default(), items);
        assert_eq!(groups, vec![vec![0, 3], vec![1], vec![2]]);
    }

    #[test]
    fn test_large_subtree_collapses() {
        // three pages under "big", one under "small"
        let vs: Vec<FeatureVector> = vec![
            vector(&[&["big"], &["1"]]),
            vector(&[&["big"], &["2"]]),
            vector(&[&["big"], &["3"]]),
            vector(&[&["small"], &["1"]]),
        ];
        let items = vs.iter().enumerate().map(|(i, v)| (i, v));
        let (_, groups) = PageClusterer::build(&loose(), items);
        assert_eq!(groups, vec![vec![0, 1, 2], vec![3]]);
    }

    #[test]
    fn test_incremental_joins_existing_page() {
        let a = vector(&[&["x"], &["a"]]);
        let b = vector(&[&["x"], &["b"]]);
        let (mut clusterer, groups) =
            PageClusterer::build(&ClusterConfig::default(), vec![(0, &a), (1, &b)]);
        assert_eq!(groups.len(), 2);
        let placed = clusterer.add(2, &b, PageId(2)).unwrap();
        assert_eq!(
            placed,
            Placement {
                page: PageId(1),
                created: false
            }
        );
        let c = vector(&[&["x"], &["c"]]);
        let placed = clusterer.add(3, &c, PageId(2)).unwrap();
        assert!(placed.created);
        assert_eq!(placed.page, PageId(2));
    }

    #[test]
    fn test_incremental_detects_flag_change() {
        let vs: Vec<FeatureVector> = vec![
            vector(&[&["big"], &["1"]]),
            vector(&[&["big"], &["2"]]),
            vector(&[&["small"], &["1"]]),
        ];
        let items = vs.iter().enumerate().map(|(i, v)| (i, v));
        let (mut clusterer, groups) = PageClusterer::build(&loose(), items);
        // 2 leaves vs 1: "big" already collapses
        assert_eq!(groups, vec![vec![0, 1], vec![2]]);
        // a second "small" leaf ties the counts and un-collapses "big"
        let extra = vector(&[&["small"], &["2"]]);
        assert_eq!(
            clusterer.add(3, &extra, PageId(2)),
            Err(RebuildReason::ClusterShift)
        );
    }

    #[test]
    fn test_incremental_into_collapsed_subtree() {
        let vs: Vec<FeatureVector> = vec![
            vector(&[&["big"], &["1"]]),
            vector(&[&["big"], &["2"]]),
            vector(&[&["big"], &["3"]]),
            vector(&[&["small"], &["1"]]),
        ];
        let items = vs.iter().enumerate().map(|(i, v)| (i, v));
        let (mut clusterer, _) = PageClusterer::build(&loose(), items);
        let extra = vector(&[&["big"], &["4"]]);
        let placed = clusterer.add(4, &extra, PageId(2)).unwrap();
        assert_eq!(placed.page, PageId(0));
        assert!(!placed.created);
    }
}

// State inference over the observation history

use crate::config::EngineConfig;
use crate::error::ReduceError;
use crate::graph::AppGraph;
use crate::history::{History, ObsId};
use crate::model::{LinkId, PageId, ReqId, StateId, StrictKey};
use crate::vectors::FeatureVector;
use serde::Serialize;
use statewalk_scanner::Method;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Maps every raw state to the state it was merged into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateMap {
    map: Vec<StateId>,
}

impl StateMap {
    pub fn identity(len: usize) -> Self {
        Self {
            map: (0..len).collect(),
        }
    }

    pub fn new(map: Vec<StateId>) -> Self {
        Self { map }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// One step of the mapping. States outside the map are their own image.
    pub fn get(&self, state: StateId) -> StateId {
        self.map.get(state).copied().unwrap_or(state)
    }

    /// Follow the mapping until it stops moving.
    pub fn resolve(&self, state: StateId) -> StateId {
        let mut current = state;
        for _ in 0..=self.map.len() {
            let next = self.get(current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    pub fn is_fixed_point(&self) -> bool {
        self.map.iter().all(|&s| self.get(s) == s)
    }

    pub fn states(&self) -> BTreeSet<StateId> {
        self.map.iter().copied().collect()
    }

    pub fn as_slice(&self) -> &[StateId] {
        &self.map
    }
}

/// Symmetric set of state pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairSet {
    pairs: BTreeSet<(StateId, StateId)>,
}

impl PairSet {
    fn key(a: StateId, b: StateId) -> (StateId, StateId) {
        (a.min(b), a.max(b))
    }

    /// Returns true when the pair was not present yet. A state is never
    /// paired with itself.
    pub fn insert(&mut self, a: StateId, b: StateId) -> bool {
        a != b && self.pairs.insert(Self::key(a, b))
    }

    pub fn contains(&self, a: StateId, b: StateId) -> bool {
        self.pairs.contains(&Self::key(a, b))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(StateId, StateId)> {
        self.pairs.iter()
    }
}

#[derive(Debug, Clone)]
pub struct Reduction {
    pub map: StateMap,
    /// State of every observation after the forward pass.
    pub forward: Vec<StateId>,
    pub must_differ: PairSet,
    /// Forward states paired with the representative they were collapsed into.
    pub together: PairSet,
    /// Observations where the forward pass was forced to open a new state.
    pub splits: BTreeSet<ObsId>,
}

impl Reduction {
    pub fn state_count(&self) -> usize {
        self.map.states().len()
    }
}

struct Facts<'a> {
    page: PageId,
    request: ReqId,
    link: Option<LinkId>,
    strict: &'a StrictKey,
    features: &'a FeatureVector,
    method: Method,
    path: &'a str,
    post: bool,
}

fn collect_facts<'a>(graph: &AppGraph, history: &'a History) -> Vec<Facts<'a>> {
    history
        .iter()
        .enumerate()
        .map(|(i, obs)| Facts {
            page: graph.page_of(i),
            request: graph.request_of(i),
            link: graph.link_of(i),
            strict: obs.strict_key(),
            features: obs.features(),
            method: obs.request().method,
            path: &obs.request().path,
            post: obs.request().is_post(),
        })
        .collect()
}

/// Infer the states of the history. The graph must have been built from
/// the same history with one raw state per observation.
///
/// A forward pass opens a new state only where the history cannot be
/// explained otherwise. The forward states are then merged again by
/// colouring the "must differ" relation.
pub fn reduce(
    graph: &AppGraph,
    history: &History,
    config: &EngineConfig,
) -> Result<Reduction, ReduceError> {
    let facts = collect_facts(graph, history);
    if facts.is_empty() {
        return Ok(Reduction {
            map: StateMap::identity(0),
            forward: Vec::new(),
            must_differ: PairSet::default(),
            together: PairSet::default(),
            splits: BTreeSet::new(),
        });
    }

    let (forward, splits) = forward_states(&facts, config)?;
    let mut must_differ = static_constraints(&facts, &forward);
    let edges = request_edges(&facts, &forward);
    let states: BTreeSet<StateId> = forward.iter().copied().collect();
    let entries: BTreeMap<StateId, (ReqId, PageId)> = states
        .iter()
        .filter(|&&s| s > 0)
        .map(|&s| (s, (facts[s].request, facts[s].page)))
        .collect();

    let colors = loop {
        propagate(&mut must_differ, &edges);
        let colors = color(&states, &entries, &must_differ);
        if !enforce_determinism(&mut must_differ, &edges, &colors) {
            break colors;
        }
    };

    let mut representative: BTreeMap<usize, StateId> = BTreeMap::new();
    let mut together = PairSet::default();
    for (&state, &c) in &colors {
        let first = *representative.entry(c).or_insert(state);
        together.insert(first, state);
    }
    let map: Vec<StateId> = forward
        .iter()
        .map(|s| representative[&colors[s]])
        .collect();
    let map = StateMap::new(map);
    info!(
        "Inferred {} states ({} forward, {} constraints)",
        map.states().len(),
        states.len(),
        must_differ.len()
    );
    Ok(Reduction {
        map,
        forward,
        must_differ,
        together,
        splits,
    })
}

struct Conflict {
    at: ObsId,
    witness: ObsId,
    /// Inclusive range where a new state would resolve the conflict.
    range: (ObsId, ObsId),
    states: Vec<StateId>,
    had_previous: Vec<bool>,
}

enum Pass {
    Done(Vec<StateId>),
    Conflict(Conflict),
}

fn forward_states(
    facts: &[Facts<'_>],
    config: &EngineConfig,
) -> Result<(Vec<StateId>, BTreeSet<ObsId>), ReduceError> {
    let mut splits = BTreeSet::new();
    loop {
        match forward_pass(facts, &splits) {
            Pass::Done(states) => return Ok((states, splits)),
            Pass::Conflict(conflict) => {
                let Some(k) = choose_split(facts, &conflict, &splits, config) else {
                    return Err(ReduceError::StateSplitExhausted {
                        at: conflict.at,
                        witness: conflict.witness,
                    });
                };
                debug!(
                    "Observation {} conflicts with {}, new state at {}",
                    conflict.at, conflict.witness, k
                );
                splits.insert(k);
            }
        }
    }
}

fn forward_pass(facts: &[Facts<'_>], splits: &BTreeSet<ObsId>) -> Pass {
    let n = facts.len();
    let mut f = vec![0; n];
    let mut had_previous = vec![false; n];
    let mut by_request: HashMap<(ReqId, StateId), ObsId> = HashMap::new();
    let mut by_link: HashMap<(LinkId, StateId), ObsId> = HashMap::new();
    let mut by_strict: HashMap<(&StrictKey, PageId, StateId), ObsId> = HashMap::new();
    by_strict.insert((facts[0].strict, facts[0].page, 0), 0);

    for i in 1..n {
        let source = f[i - 1];
        let forced = splits.contains(&i);
        let fact = &facts[i];

        // one link from one state always issues the same request
        if let Some(link) = fact.link
            && let Some(&j) = by_link.get(&(link, source))
            && facts[j].request != fact.request
        {
            return Pass::Conflict(Conflict {
                at: i,
                witness: j,
                range: (j, i - 1),
                states: f,
                had_previous,
            });
        }

        let previous = by_request.get(&(fact.request, source)).copied();
        had_previous[i] = previous.is_some();
        let next = match previous {
            Some(j) => {
                let moved = f[j] != f[j - 1];
                if facts[j].page != fact.page || (forced && !moved) {
                    return Pass::Conflict(Conflict {
                        at: i,
                        witness: j,
                        range: (j, i - 1),
                        states: f,
                        had_previous,
                    });
                }
                f[j]
            }
            None if forced => i,
            None => source,
        };
        f[i] = next;

        // the same request reaching the same page in one state gives the same structure
        if let Some(&j) = by_strict.get(&(fact.strict, fact.page, next))
            && facts[j].features != fact.features
        {
            return Pass::Conflict(Conflict {
                at: i,
                witness: j,
                range: (j + 1, i),
                states: f,
                had_previous,
            });
        }

        by_request.insert((fact.request, source), i);
        if let Some(link) = fact.link {
            by_link.insert((link, source), i);
        }
        by_strict.insert((fact.strict, fact.page, next), i);
    }
    Pass::Done(f)
}

/// Pick where to open a new state: the eligible observation whose
/// method and path most often changed state so far.
fn choose_split(
    facts: &[Facts<'_>],
    conflict: &Conflict,
    splits: &BTreeSet<ObsId>,
    config: &EngineConfig,
) -> Option<ObsId> {
    let f = &conflict.states;
    let mut counters: HashMap<(Method, &str), (u32, u32)> = HashMap::new();
    for k in 1..=conflict.at {
        let entry = counters.entry((facts[k].method, facts[k].path)).or_default();
        entry.0 += 1;
        if k < conflict.at && f[k] != f[k - 1] {
            entry.1 += 1;
        }
    }

    let (lo, hi) = conflict.range;
    (lo.max(1)..=hi)
        .filter(|k| !splits.contains(k) && !conflict.had_previous[*k] && f[*k] == f[*k - 1])
        .map(|k| {
            let (hits, transitions) = counters
                .get(&(facts[k].method, facts[k].path))
                .copied()
                .unwrap_or_default();
            let mut score = (transitions as f64 + 1.0) / (hits as f64 + 2.0);
            if facts[k].post {
                score += config.post_weight;
            }
            (score, k)
        })
        .max_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .map(|(_, k)| k)
}

/// Pairs of forward states that provably cannot be the same state.
fn static_constraints(facts: &[Facts<'_>], f: &[StateId]) -> PairSet {
    let mut pairs = PairSet::default();

    // same request reaching different pages: the sources differ
    let mut by_request: BTreeMap<ReqId, BTreeSet<(StateId, PageId)>> = BTreeMap::new();
    // same link issuing different requests: the sources differ
    let mut by_link: BTreeMap<LinkId, BTreeSet<(StateId, ReqId)>> = BTreeMap::new();
    for i in 1..facts.len() {
        by_request
            .entry(facts[i].request)
            .or_default()
            .insert((f[i - 1], facts[i].page));
        if let Some(link) = facts[i].link {
            by_link
                .entry(link)
                .or_default()
                .insert((f[i - 1], facts[i].request));
        }
    }
    for set in by_request.values() {
        differing_pairs(set, &mut pairs);
    }
    for set in by_link.values() {
        differing_pairs(set, &mut pairs);
    }

    // same strict request and page with different structure: the destinations differ
    let mut by_strict: BTreeMap<(&StrictKey, PageId), Vec<(StateId, &FeatureVector)>> =
        BTreeMap::new();
    for (i, fact) in facts.iter().enumerate() {
        by_strict
            .entry((fact.strict, fact.page))
            .or_default()
            .push((f[i], fact.features));
    }
    for list in by_strict.values() {
        for (i, (x, fx)) in list.iter().enumerate() {
            for (y, fy) in &list[i + 1..] {
                if fx != fy {
                    pairs.insert(*x, *y);
                }
            }
        }
    }
    pairs
}

fn differing_pairs<T: PartialEq>(set: &BTreeSet<(StateId, T)>, pairs: &mut PairSet) {
    let items: Vec<&(StateId, T)> = set.iter().collect();
    for (i, (a, ta)) in items.iter().map(|p| (&p.0, &p.1)).enumerate() {
        for (b, tb) in items[i + 1..].iter().map(|p| (&p.0, &p.1)) {
            if ta != tb {
                pairs.insert(*a, *b);
            }
        }
    }
}

/// Distinct (source, destination) state pairs of every request.
fn request_edges(facts: &[Facts<'_>], f: &[StateId]) -> Vec<Vec<(StateId, StateId)>> {
    let mut edges: BTreeMap<ReqId, BTreeSet<(StateId, StateId)>> = BTreeMap::new();
    for i in 1..facts.len() {
        edges
            .entry(facts[i].request)
            .or_default()
            .insert((f[i - 1], f[i]));
    }
    edges
        .into_values()
        .map(|set| set.into_iter().collect())
        .collect()
}

/// Spread constraints along request edges until nothing changes:
/// different sources imply different destinations and vice versa.
fn propagate(pairs: &mut PairSet, edges: &[Vec<(StateId, StateId)>]) {
    loop {
        let mut grew = false;
        for list in edges {
            for (i, &(a, x)) in list.iter().enumerate() {
                for &(b, y) in &list[i + 1..] {
                    if a == b || x == y {
                        continue;
                    }
                    if pairs.contains(a, b) && pairs.insert(x, y) {
                        grew = true;
                    }
                    if pairs.contains(x, y) && pairs.insert(a, b) {
                        grew = true;
                    }
                }
            }
        }
        if !grew {
            break;
        }
    }
}

/// Greedy colouring in state order. A state entered the same way as an
/// already coloured state reuses its colour when allowed.
fn color(
    states: &BTreeSet<StateId>,
    entries: &BTreeMap<StateId, (ReqId, PageId)>,
    pairs: &PairSet,
) -> BTreeMap<StateId, usize> {
    let mut colors: BTreeMap<StateId, usize> = BTreeMap::new();
    for &state in states {
        let forbidden: BTreeSet<usize> = colors
            .iter()
            .filter(|(other, _)| pairs.contains(state, **other))
            .map(|(_, c)| *c)
            .collect();
        let preferred = entries.get(&state).and_then(|entry| {
            colors
                .iter()
                .find(|(other, c)| entries.get(*other) == Some(entry) && !forbidden.contains(*c))
                .map(|(_, c)| *c)
        });
        let chosen = preferred.unwrap_or_else(|| {
            (0..=colors.len())
                .find(|c| !forbidden.contains(c))
                .unwrap_or(colors.len())
        });
        colors.insert(state, chosen);
    }
    colors
}

/// Merged states must stay deterministic: one request from one state
/// leads to one state. Returns true if new constraints were added.
fn enforce_determinism(
    pairs: &mut PairSet,
    edges: &[Vec<(StateId, StateId)>],
    colors: &BTreeMap<StateId, usize>,
) -> bool {
    let mut added = false;
    for list in edges {
        for (i, &(a, x)) in list.iter().enumerate() {
            for &(b, y) in &list[i + 1..] {
                if a != b && colors[&a] == colors[&b] && colors[&x] != colors[&y] {
                    added |= pairs.insert(a, b);
                }
            }
        }
    }
    added
}

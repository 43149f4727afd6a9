// Exploration frontier: picks the next path to walk

use crate::config::EngineConfig;
use crate::graph::AppGraph;
use crate::history::History;
use crate::model::{AbstractLink, LinkCategory, LinkId, PageId, ReqId, StateId, Target};
use rand::Rng;
use rand::seq::SliceRandom;
use statewalk_scanner::{FormParams, LinkKind};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap, HashSet};
use std::ops::Add;
use tracing::debug;

/// Lexicographic path cost. Known state changes dominate, then the plain
/// step/visit penalty, then per-category visit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CostVector {
    pub state_changes: u32,
    pub penalty: u32,
    pub counters: [u32; 2 * LinkCategory::COUNT],
}

impl Add for CostVector {
    type Output = CostVector;

    fn add(self, other: CostVector) -> CostVector {
        let mut counters = self.counters;
        for (c, o) in counters.iter_mut().zip(other.counters) {
            *c += o;
        }
        CostVector {
            state_changes: self.state_changes + other.state_changes,
            penalty: self.penalty + other.penalty,
            counters,
        }
    }
}

impl CostVector {
    /// Cost of following `link` once from `state`. Visits from other states
    /// count a third.
    pub fn step(link: &AbstractLink, state: StateId) -> Self {
        let current = link.visits_in(state);
        let elsewhere = link.visits_elsewhere(state).div_ceil(3);
        let mut counters = [0; 2 * LinkCategory::COUNT];
        let slot = 2 * link.category.index();
        counters[slot] = current;
        counters[slot + 1] = elsewhere;
        CostVector {
            state_changes: 0,
            penalty: 1 + current + elsewhere,
            counters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub link: LinkId,
    /// Parameters to submit when the link is a form.
    pub params: Option<FormParams>,
    /// Page and state the step is known to reach.
    pub expect: Option<(PageId, StateId)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Path(Vec<Step>),
    Restart,
    Done,
}

#[derive(Debug, Clone)]
struct Entry {
    cost: CostVector,
    seq: u64,
    node: (PageId, StateId),
    path: Vec<Step>,
}

// heap order only looks at cost, ties broken by insertion order
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        (self.cost, self.seq) == (other.cost, other.seq)
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.cost, self.seq).cmp(&(other.cost, other.seq))
    }
}

struct Candidate {
    cost: CostVector,
    seq: u64,
    path: Vec<Step>,
}

/// Requests carrying a state hint that were not issued since the last
/// confirmed state change.
fn hinted_requests(graph: &AppGraph, history: &History) -> BTreeSet<ReqId> {
    let mut recent = BTreeSet::new();
    let mut i = history.len().min(graph.observations());
    while i > 1 {
        i -= 1;
        recent.insert(graph.request_of(i));
        if graph.state_of(i) != graph.state_of(i - 1) {
            break;
        }
    }
    graph
        .requests()
        .iter()
        .filter(|r| r.state_hints > 0 && !recent.contains(&r.id))
        .map(|r| r.id)
        .collect()
}

/// True when the page count grew over the last `patience` observations.
pub fn recently_grew(page_counts: &[usize], patience: usize) -> bool {
    let n = page_counts.len();
    if n < 2 {
        return false;
    }
    let from = n.saturating_sub(patience + 1);
    page_counts[n - 1] > page_counts[from]
}

pub fn plan<R: Rng>(
    graph: Option<&AppGraph>,
    history: &History,
    config: &EngineConfig,
    page_counts: &[usize],
    rng: &mut R,
) -> Decision {
    let Some(graph) = graph else {
        return Decision::Restart;
    };
    if graph.observations() == 0 {
        return Decision::Restart;
    }
    let last = graph.observations() - 1;
    let start = (graph.page_of(last), graph.current_state());
    let hinted = hinted_requests(graph, history);

    let mut heap = BinaryHeap::new();
    let mut seq = 0u64;
    heap.push(Reverse(Entry {
        cost: CostVector::default(),
        seq,
        node: start,
        path: Vec::new(),
    }));
    let mut settled: HashSet<(PageId, StateId)> = HashSet::new();
    let mut terminals: Vec<Candidate> = Vec::new();
    let mut hinted_terminals: Vec<Candidate> = Vec::new();

    while let Some(Reverse(entry)) = heap.pop() {
        if !settled.insert(entry.node) {
            continue;
        }
        let (page, state) = entry.node;
        for id in graph.page(page).link_ids() {
            let link = graph.link(id);
            if link.skip {
                continue;
            }
            let cost = entry.cost + CostVector::step(link, state);
            let mut follow = |request: ReqId, params: Option<FormParams>, seq: &mut u64| {
                let mut path = entry.path.clone();
                *seq += 1;
                let Some(target) = graph.request(request).page_target(state) else {
                    path.push(Step {
                        link: id,
                        params,
                        expect: None,
                    });
                    terminals.push(Candidate {
                        cost,
                        seq: *seq,
                        path,
                    });
                    return;
                };
                let next = (target.page, target.transition);
                let mut cost = cost;
                if target.transition != state {
                    cost.state_changes += 1;
                }
                path.push(Step {
                    link: id,
                    params,
                    expect: Some(next),
                });
                if hinted.contains(&request) {
                    hinted_terminals.push(Candidate {
                        cost,
                        seq: *seq,
                        path: path.clone(),
                    });
                }
                if !settled.contains(&next) {
                    heap.push(Reverse(Entry {
                        cost,
                        seq: *seq,
                        node: next,
                        path,
                    }));
                }
            };
            match link.targets.get(&state) {
                Some(Target::Request(t)) if t.visits > 0 => follow(t.request, None, &mut seq),
                Some(Target::Form(ft)) if ft.visits() > 0 => {
                    for (params, t) in ft.entries() {
                        if t.visits > 0 {
                            follow(t.request, Some(params.clone()), &mut seq);
                        }
                    }
                }
                _ => {
                    seq += 1;
                    let mut path = entry.path.clone();
                    path.push(Step {
                        link: id,
                        params: None,
                        expect: None,
                    });
                    terminals.push(Candidate { cost, seq, path });
                }
            }
        }
    }

    let pool = if hinted_terminals.is_empty() {
        terminals
    } else {
        debug!("Revisiting {} hinted requests", hinted.len());
        hinted_terminals
    };
    if let Some(best) = pool.into_iter().min_by_key(|c| (c.cost, c.seq)) {
        return Decision::Path(truncate_after_change(best.path, start.1));
    }

    if recently_grew(page_counts, config.patience) {
        let anchors: Vec<LinkId> = graph
            .page(start.0)
            .link_ids()
            .into_iter()
            .filter(|id| {
                let link = graph.link(*id);
                link.kind == LinkKind::Anchor && !link.skip
            })
            .collect();
        if let Some(&id) = anchors.choose(rng) {
            debug!("No unvisited link reachable, random walk via {}", id);
            return Decision::Path(vec![Step {
                link: id,
                params: None,
                expect: None,
            }]);
        }
    }

    let unvisited_anywhere = graph.links().iter().any(|link| {
        graph
            .page(link.page)
            .seen_states
            .iter()
            .any(|&s| link.is_unvisited(s))
    });
    if unvisited_anywhere {
        Decision::Restart
    } else {
        Decision::Done
    }
}

/// Keep the path up to and including its first known state change; what
/// lies beyond may no longer hold once the state moved.
fn truncate_after_change(mut path: Vec<Step>, start: StateId) -> Vec<Step> {
    let mut state = start;
    for (i, step) in path.iter().enumerate() {
        if let Some((_, next)) = step.expect {
            if next != state {
                path.truncate(i + 1);
                break;
            }
            state = next;
        }
    }
    path
}

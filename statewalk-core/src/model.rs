// Abstract entities of the application graph

use crate::error::GraphError;
use crate::history::ObsId;
use crate::tree::KeyTree;
use crate::vectors::Token;
use serde::Serialize;
use statewalk_scanner::{FormParams, LinkKind, LinkRef, Method, Request};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Raw states are the index of the observation that entered them.
pub type StateId = usize;

macro_rules! arena_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(pub usize);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(PageId, "P");
arena_id!(ReqId, "R");
arena_id!(LinkId, "L");

/// Exact identity of a request: method, path, filtered query and body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StrictKey {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub params: Vec<(String, String)>,
}

impl StrictKey {
    pub fn of(request: &Request) -> Self {
        Self {
            method: request.method,
            path: request.path.clone(),
            query: request.query.clone(),
            params: request.params.clone(),
        }
    }

    pub fn context(&self) -> ContextKey {
        ContextKey {
            method: self.method,
            path: self.path.clone(),
        }
    }
}

/// Requests sharing method and path may be merged into one abstract request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContextKey {
    pub method: Method,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTarget {
    pub page: PageId,
    pub transition: StateId,
    pub visits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReqTarget {
    pub request: ReqId,
    pub transition: StateId,
    pub visits: u32,
}

/// Outcome of submitting a form from one state, per parameter set.
/// All entries share the form's transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormTarget {
    transition: StateId,
    entries: BTreeMap<FormParams, ReqTarget>,
}

impl FormTarget {
    pub fn new(transition: StateId) -> Self {
        Self {
            transition,
            entries: BTreeMap::new(),
        }
    }

    pub fn transition(&self) -> StateId {
        self.transition
    }

    pub fn visits(&self) -> u32 {
        self.entries.values().map(|t| t.visits).sum()
    }

    pub fn entries(&self) -> &BTreeMap<FormParams, ReqTarget> {
        &self.entries
    }

    pub fn get(&self, params: &FormParams) -> Option<&ReqTarget> {
        self.entries.get(params)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, params: FormParams, target: ReqTarget) -> Result<(), GraphError> {
        if target.transition != self.transition {
            return Err(GraphError::TransitionMismatch {
                expected: self.transition,
                found: target.transition,
            });
        }
        self.entries.insert(params, target);
        Ok(())
    }

    fn merge(&mut self, other: FormTarget, state: StateId) -> Result<(), GraphError> {
        if other.transition != self.transition {
            return Err(GraphError::InconsistentMerge {
                what: "form transition".to_string(),
                state,
            });
        }
        for (params, target) in other.entries {
            match self.entries.get_mut(&params) {
                Some(existing) if existing.request == target.request => {
                    existing.visits += target.visits;
                }
                Some(_) if target.visits == 0 => {}
                Some(existing) if existing.visits == 0 => *existing = target,
                Some(_) => {
                    return Err(GraphError::InconsistentMerge {
                        what: "form request".to_string(),
                        state,
                    });
                }
                None => {
                    self.entries.insert(params, target);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Page(PageTarget),
    Request(ReqTarget),
    Form(FormTarget),
}

impl Target {
    pub fn transition(&self) -> StateId {
        match self {
            Target::Page(t) => t.transition,
            Target::Request(t) => t.transition,
            Target::Form(t) => t.transition,
        }
    }

    pub fn visits(&self) -> u32 {
        match self {
            Target::Page(t) => t.visits,
            Target::Request(t) => t.visits,
            Target::Form(t) => t.visits(),
        }
    }

    pub(crate) fn remapped(self, map: impl Fn(StateId) -> StateId) -> Self {
        match self {
            Target::Page(t) => Target::Page(PageTarget {
                transition: map(t.transition),
                ..t
            }),
            Target::Request(t) => Target::Request(ReqTarget {
                transition: map(t.transition),
                ..t
            }),
            Target::Form(t) => {
                let transition = map(t.transition);
                let entries = t
                    .entries
                    .into_iter()
                    .map(|(p, e)| (p, ReqTarget { transition, ..e }))
                    .collect();
                Target::Form(FormTarget {
                    transition,
                    entries,
                })
            }
        }
    }

    /// Combine two targets recorded from states that turned out to be the
    /// same. They must agree on destination and transition.
    pub(crate) fn merge(&mut self, other: Target, state: StateId) -> Result<(), GraphError> {
        let mismatch = |what: &str| GraphError::InconsistentMerge {
            what: what.to_string(),
            state,
        };
        match (self, other) {
            (Target::Page(a), Target::Page(b)) => {
                if a.page != b.page || a.transition != b.transition {
                    return Err(mismatch("page target"));
                }
                a.visits += b.visits;
            }
            // speculative targets give way to observed ones
            (Target::Request(_), Target::Request(b)) if b.visits == 0 => {}
            (Target::Request(a), Target::Request(b)) if a.visits == 0 => *a = b,
            (Target::Request(a), Target::Request(b)) => {
                if a.request != b.request || a.transition != b.transition {
                    return Err(mismatch("link target"));
                }
                a.visits += b.visits;
            }
            (Target::Form(_), Target::Form(b)) if b.visits() == 0 => {}
            (Target::Form(a), Target::Form(b)) if a.visits() == 0 => *a = b,
            (Target::Form(a), Target::Form(b)) => a.merge(b, state)?,
            _ => return Err(mismatch("target kind")),
        }
        Ok(())
    }
}

/// How a link is followed, used for cost accounting in the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum LinkCategory {
    PostForm,
    GetForm,
    AnchorWithQuery,
    AnchorWithoutQuery,
    Redirect,
}

impl LinkCategory {
    pub const COUNT: usize = 5;

    pub fn index(&self) -> usize {
        match self {
            LinkCategory::PostForm => 0,
            LinkCategory::GetForm => 1,
            LinkCategory::AnchorWithQuery => 2,
            LinkCategory::AnchorWithoutQuery => 3,
            LinkCategory::Redirect => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AbstractPage {
    pub id: PageId,
    pub links: KeyTree<Token, LinkId>,
    pub members: Vec<ObsId>,
    pub observations: BTreeMap<StateId, Vec<ObsId>>,
    pub seen_states: BTreeSet<StateId>,
}

impl AbstractPage {
    pub fn new(id: PageId) -> Self {
        Self {
            id,
            links: KeyTree::new(),
            members: Vec::new(),
            observations: BTreeMap::new(),
            seen_states: BTreeSet::new(),
        }
    }

    pub fn link_ids(&self) -> Vec<LinkId> {
        self.links.values().into_iter().copied().collect()
    }

    pub(crate) fn record(&mut self, obs: ObsId, state: StateId) {
        self.observations.entry(state).or_default().push(obs);
        self.seen_states.insert(state);
    }
}

#[derive(Debug, Clone)]
pub struct AbstractRequest {
    pub id: ReqId,
    pub method: Method,
    pub path: String,
    pub requests: BTreeSet<StrictKey>,
    pub targets: BTreeMap<StateId, Target>,
    pub observations: Vec<ObsId>,
    pub changing_state: bool,
    pub state_hints: usize,
}

impl AbstractRequest {
    pub fn new(id: ReqId, method: Method, path: &str) -> Self {
        Self {
            id,
            method,
            path: path.to_string(),
            requests: BTreeSet::new(),
            targets: BTreeMap::new(),
            observations: Vec::new(),
            changing_state: false,
            state_hints: 0,
        }
    }

    /// False for requests only known from speculation.
    pub fn request_actually_made(&self) -> bool {
        !self.observations.is_empty()
    }

    pub fn page_target(&self, state: StateId) -> Option<&PageTarget> {
        match self.targets.get(&state) {
            Some(Target::Page(t)) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AbstractLink {
    pub id: LinkId,
    pub kind: LinkKind,
    pub category: LinkCategory,
    pub page: PageId,
    /// Key path of the link inside its page's link tree.
    pub path: Vec<Token>,
    pub members: Vec<(ObsId, LinkRef)>,
    pub targets: BTreeMap<StateId, Target>,
    pub skip: bool,
}

impl AbstractLink {
    pub fn visits_in(&self, state: StateId) -> u32 {
        self.targets.get(&state).map(|t| t.visits()).unwrap_or(0)
    }

    pub fn visits_elsewhere(&self, state: StateId) -> u32 {
        self.targets
            .iter()
            .filter(|(s, _)| **s != state)
            .map(|(_, t)| t.visits())
            .sum()
    }

    /// Not followed yet from `state`, speculative targets included.
    pub fn is_unvisited(&self, state: StateId) -> bool {
        !self.skip && self.visits_in(state) == 0
    }
}

use crate::model::StrictKey;
use crate::vectors::{self, ConcreteTree, FeatureVector};
use statewalk_scanner::{Exchange, FormParams, LinkRef, Page, Request};
use std::collections::BTreeSet;

/// Index of an observation in the history.
pub type ObsId = usize;

/// The link on the previous page that produced an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    pub link: LinkRef,
    pub params: Option<FormParams>,
}

/// One observed request/page pair, with the derived structures the graph
/// builder needs cached alongside.
#[derive(Debug, Clone)]
pub struct Observation {
    pub exchange: Exchange,
    pub via: Option<Via>,
    /// Set when this observation forced a rebuild of the graph.
    pub state_hint: bool,
    links: ConcreteTree,
    features: FeatureVector,
    strict: StrictKey,
}

impl Observation {
    pub fn new(exchange: Exchange, via: Option<Via>) -> Self {
        let links = vectors::link_tree(&exchange.page);
        let features = vectors::page_vector(&links);
        let strict = StrictKey::of(&exchange.request);
        Self {
            exchange,
            via,
            state_hint: false,
            links,
            features,
            strict,
        }
    }

    pub fn page(&self) -> &Page {
        &self.exchange.page
    }

    pub fn request(&self) -> &Request {
        &self.exchange.request
    }

    pub fn link_tree(&self) -> &ConcreteTree {
        &self.links
    }

    pub fn features(&self) -> &FeatureVector {
        &self.features
    }

    pub fn strict_key(&self) -> &StrictKey {
        &self.strict
    }
}

/// Append-only sequence of observations.
#[derive(Debug, Clone, Default)]
pub struct History {
    observations: Vec<Observation>,
    skipped: BTreeSet<(ObsId, LinkRef)>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observation: Observation) -> ObsId {
        self.observations.push(observation);
        self.observations.len() - 1
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn get(&self, id: ObsId) -> Option<&Observation> {
        self.observations.get(id)
    }

    pub fn last(&self) -> Option<&Observation> {
        self.observations.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    pub fn mark_hint(&mut self, id: ObsId) {
        if let Some(obs) = self.observations.get_mut(id) {
            obs.state_hint = true;
        }
    }

    /// Remember that a concrete link cannot be followed.
    pub fn mark_skipped(&mut self, id: ObsId, link: LinkRef) {
        self.skipped.insert((id, link));
    }

    pub fn is_skipped(&self, id: ObsId, link: LinkRef) -> bool {
        self.skipped.contains(&(id, link))
    }
}

impl std::ops::Index<ObsId> for History {
    type Output = Observation;

    fn index(&self, id: ObsId) -> &Observation {
        &self.observations[id]
    }
}

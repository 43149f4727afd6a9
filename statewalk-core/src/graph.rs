// Application graph of abstract pages, requests and links

use crate::clusterer::PageClusterer;
use crate::config::EngineConfig;
use crate::error::{GraphError, NeedsRebuild, RebuildReason};
use crate::history::{History, ObsId};
use crate::links::{self, MergedTree};
use crate::model::{
    AbstractLink, AbstractPage, AbstractRequest, ContextKey, FormTarget, LinkCategory, LinkId,
    PageId, PageTarget, ReqId, ReqTarget, StateId, StrictKey, Target,
};
use crate::reduce::StateMap;
use crate::vectors::Token;
use statewalk_scanner::{
    FormParams, FormValues, LinkKind, LinkRef, Method, Navigator, Page, Request,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct AppGraph {
    pages: Vec<AbstractPage>,
    requests: Vec<AbstractRequest>,
    links: Vec<AbstractLink>,
    page_of: Vec<PageId>,
    request_of: Vec<ReqId>,
    link_of: Vec<Option<LinkId>>,
    states: Vec<StateId>,
    member_links: BTreeMap<(ObsId, LinkRef), LinkId>,
    strict_index: BTreeMap<StrictKey, ReqId>,
    strict_dests: BTreeMap<StrictKey, BTreeSet<PageId>>,
    context_index: BTreeMap<ContextKey, Vec<ReqId>>,
    clusterer: PageClusterer,
}

fn link_category(page: &Page, link: LinkRef) -> LinkCategory {
    match link.kind {
        LinkKind::Redirect => LinkCategory::Redirect,
        LinkKind::Form => match page.form(link).map(|f| f.method) {
            Some(Method::Post) => LinkCategory::PostForm,
            _ => LinkCategory::GetForm,
        },
        LinkKind::Anchor => {
            let has_query = page
                .anchors
                .get(link.index)
                .and_then(|a| Url::parse(&a.href).ok())
                .is_some_and(|u| u.query().is_some_and(|q| !q.is_empty()));
            if has_query {
                LinkCategory::AnchorWithQuery
            } else {
                LinkCategory::AnchorWithoutQuery
            }
        }
    }
}

impl AppGraph {
    fn empty(config: &EngineConfig) -> Self {
        Self {
            pages: Vec::new(),
            requests: Vec::new(),
            links: Vec::new(),
            page_of: Vec::new(),
            request_of: Vec::new(),
            link_of: Vec::new(),
            states: Vec::new(),
            member_links: BTreeMap::new(),
            strict_index: BTreeMap::new(),
            strict_dests: BTreeMap::new(),
            context_index: BTreeMap::new(),
            clusterer: PageClusterer::new(config.cluster.clone()),
        }
    }

    /// Build the graph from the whole history. Every observation is its own
    /// state; a state map from the reducer collapses them afterwards.
    pub fn build(history: &History, config: &EngineConfig) -> Result<Self, GraphError> {
        let mut graph = Self::empty(config);
        let n = history.len();

        // pages
        let (clusterer, groups) = PageClusterer::build(
            &config.cluster,
            history.iter().enumerate().map(|(i, o)| (i, o.features())),
        );
        graph.clusterer = clusterer;
        graph.page_of = vec![PageId(0); n];
        for (index, members) in groups.iter().enumerate() {
            let id = PageId(index);
            let mut page = AbstractPage::new(id);
            page.members = members.clone();
            graph.pages.push(page);
            for &obs in members {
                graph.page_of[obs] = id;
            }
            let trees: Vec<_> = members
                .iter()
                .map(|&obs| (obs, history[obs].link_tree()))
                .collect();
            graph.add_links(id, links::merge_trees(&trees), history);
        }

        // requests
        graph.cluster_requests(history);

        // targets, one raw state per observation
        graph.states = (0..n).collect();
        graph.link_of = vec![None; n];
        for i in 0..n {
            let page = graph.page_of[i];
            graph.pages[page.0].record(i, i);
            if i == 0 {
                continue;
            }
            let request = graph.request_of[i];
            graph.requests[request.0].targets.insert(
                i - 1,
                Target::Page(PageTarget {
                    page,
                    transition: i,
                    visits: 1,
                }),
            );
            let Some(via) = &history[i].via else {
                continue;
            };
            let Some(&link) = graph.member_links.get(&(i - 1, via.link)) else {
                warn!("Observation {} followed a link that is not in the graph", i);
                continue;
            };
            graph.link_of[i] = Some(link);
            let target = ReqTarget {
                request,
                transition: i,
                visits: 1,
            };
            let entry = match graph.links[link.0].kind {
                LinkKind::Form => {
                    let mut ft = FormTarget::new(i);
                    ft.insert(via.params.clone().unwrap_or_default(), target)?;
                    Target::Form(ft)
                }
                _ => Target::Request(target),
            };
            graph.links[link.0].targets.insert(i - 1, entry);
        }
        debug!(
            "Built graph: {} pages, {} requests, {} links",
            graph.pages.len(),
            graph.requests.len(),
            graph.links.len()
        );
        Ok(graph)
    }

    fn add_links(&mut self, page: PageId, merged: MergedTree, history: &History) {
        for (path, members) in merged.entries() {
            let id = LinkId(self.links.len());
            let Some(&(first_obs, first_link)) = members.first() else {
                continue;
            };
            let kind = match path.first() {
                Some(Token::Kind(kind)) => *kind,
                _ => first_link.kind,
            };
            let skip = members
                .iter()
                .any(|(obs, link)| history.is_skipped(*obs, *link));
            for member in members {
                self.member_links.insert(*member, id);
            }
            self.pages[page.0].links.insert(&path, id);
            self.links.push(AbstractLink {
                id,
                kind,
                category: link_category(history[first_obs].page(), first_link),
                page,
                path,
                members: members.clone(),
                targets: BTreeMap::new(),
                skip,
            });
        }
    }

    /// Group observations into abstract requests. Strict clusters sharing
    /// method and path merge when their destination page sets agree, or
    /// when one of them already reaches every page the others reach;
    /// otherwise they split by exact destination set.
    fn cluster_requests(&mut self, history: &History) {
        let mut strict: BTreeMap<StrictKey, Vec<ObsId>> = BTreeMap::new();
        for (i, obs) in history.iter().enumerate() {
            strict.entry(obs.strict_key().clone()).or_default().push(i);
        }
        let mut contexts: BTreeMap<ContextKey, Vec<StrictKey>> = BTreeMap::new();
        for (key, members) in &strict {
            let dests: BTreeSet<PageId> = members.iter().map(|&o| self.page_of[o]).collect();
            self.strict_dests.insert(key.clone(), dests);
            contexts.entry(key.context()).or_default().push(key.clone());
        }

        self.request_of = vec![ReqId(0); history.len()];
        for (context, keys) in contexts {
            let sets: Vec<&BTreeSet<PageId>> = keys.iter().map(|k| &self.strict_dests[k]).collect();
            let union: BTreeSet<PageId> = sets.iter().flat_map(|s| s.iter().copied()).collect();
            let merge_all = sets.windows(2).all(|w| w[0] == w[1]) || sets.iter().any(|s| **s == union);

            let mut groups: BTreeMap<BTreeSet<PageId>, Vec<StrictKey>> = BTreeMap::new();
            if merge_all {
                groups.insert(union, keys);
            } else {
                for key in keys {
                    groups
                        .entry(self.strict_dests[&key].clone())
                        .or_default()
                        .push(key);
                }
            }
            for keys in groups.into_values() {
                let id = self.new_request(&context);
                for key in keys {
                    for &obs in &strict[&key] {
                        self.request_of[obs] = id;
                        let request = &mut self.requests[id.0];
                        request.observations.push(obs);
                        if history[obs].state_hint {
                            request.state_hints += 1;
                        }
                    }
                    self.register_key(id, key);
                }
                self.requests[id.0].observations.sort_unstable();
                self.context_index.entry(context.clone()).or_default().push(id);
            }
        }
    }

    fn new_request(&mut self, context: &ContextKey) -> ReqId {
        let id = ReqId(self.requests.len());
        self.requests
            .push(AbstractRequest::new(id, context.method, &context.path));
        id
    }

    fn register_key(&mut self, id: ReqId, key: StrictKey) {
        if let Some(previous) = self.strict_index.insert(key.clone(), id)
            && previous != id
        {
            self.requests[previous.0].requests.remove(&key);
        }
        self.requests[id.0].requests.insert(key);
    }

    fn request_dests(&self, id: ReqId) -> BTreeSet<PageId> {
        self.requests[id.0]
            .requests
            .iter()
            .filter_map(|k| self.strict_dests.get(k))
            .flat_map(|s| s.iter().copied())
            .collect()
    }

    /// Abstract request for an observed strict key reaching `page`, without
    /// changing how existing requests are grouped.
    fn place_request(&mut self, key: &StrictKey, page: PageId) -> Result<ReqId, RebuildReason> {
        let context = key.context();
        let context_ids = self.context_index.get(&context).cloned().unwrap_or_default();
        let existing = self.strict_index.get(key).copied();

        if let Some(id) = existing
            && self.requests[id.0].request_actually_made()
        {
            let dests = self.strict_dests.get(key).cloned().unwrap_or_default();
            if !dests.contains(&page) {
                if context_ids.len() > 1 {
                    return Err(RebuildReason::RequestSplit);
                }
                let union = self.request_dests(id);
                if !union.contains(&page) && dests != union {
                    return Err(RebuildReason::RequestSplit);
                }
            }
            self.strict_dests.entry(key.clone()).or_default().insert(page);
            return Ok(id);
        }

        let joined = match context_ids.as_slice() {
            [] => None,
            [only] => {
                if self.request_dests(*only).contains(&page) {
                    Some(*only)
                } else {
                    return Err(RebuildReason::RequestSplit);
                }
            }
            ids => {
                let single = BTreeSet::from([page]);
                ids.iter().copied().find(|id| self.request_dests(*id) == single)
            }
        };
        let id = match (joined, existing) {
            (Some(id), _) => id,
            // a speculative request becomes real
            (None, Some(id)) => id,
            (None, None) => self.new_request(&context),
        };
        self.register_key(id, key.clone());
        self.strict_dests.entry(key.clone()).or_default().insert(page);
        let ids = self.context_index.entry(context).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        Ok(id)
    }

    /// Fold observation `n` into the graph. On success the result equals a
    /// full rebuild followed by the current state map.
    pub fn extend(&mut self, history: &History, n: ObsId) -> Result<(), NeedsRebuild> {
        let obs = &history[n];
        let source = self.current_state();

        // page
        let fresh = PageId(self.pages.len());
        let placement = self.clusterer.add(n, obs.features(), fresh)?;
        let page = placement.page;
        if placement.created {
            self.pages.push(AbstractPage::new(fresh));
            self.add_links(fresh, links::merge_trees(&[(n, obs.link_tree())]), history);
        } else {
            let members = links::try_merge(&self.pages[page.0].links, obs.link_tree())
                .ok_or(RebuildReason::LinkTreeMismatch { page })?;
            for (id, link) in members {
                self.member_links.insert((n, link), id);
                let abstract_link = &mut self.links[id.0];
                abstract_link.members.push((n, link));
                if history.is_skipped(n, link) {
                    abstract_link.skip = true;
                }
            }
        }
        self.pages[page.0].members.push(n);

        if n == 0 {
            let request = self.place_request(obs.strict_key(), page)?;
            self.record(n, page, request, None, 0);
            return Ok(());
        }

        // request
        let request = self.place_request(obs.strict_key(), page)?;
        let ar = &mut self.requests[request.0];
        let state = match ar.targets.get_mut(&source) {
            Some(Target::Page(t)) if t.page == page => {
                t.visits += 1;
                t.transition
            }
            Some(_) => {
                return Err(RebuildReason::RequestConflict {
                    request,
                    state: source,
                }
                .into());
            }
            None => {
                ar.targets.insert(
                    source,
                    Target::Page(PageTarget {
                        page,
                        transition: source,
                        visits: 1,
                    }),
                );
                source
            }
        };
        ar.observations.push(n);
        if obs.state_hint {
            ar.state_hints += 1;
        }

        // identical requests must not produce different pages in one state
        if let Some(seen) = self.pages[page.0].observations.get(&state) {
            let conflict = seen.iter().any(|&m| {
                history[m].strict_key() == obs.strict_key() && history[m].features() != obs.features()
            });
            if conflict {
                return Err(RebuildReason::SignatureConflict { page, state }.into());
            }
        }

        // link
        let link = match &obs.via {
            Some(via) => {
                let id = *self
                    .member_links
                    .get(&(n - 1, via.link))
                    .ok_or(RebuildReason::UnknownLink { obs: n })?;
                let params = via.params.clone().unwrap_or_default();
                self.record_link(id, source, request, state, params)?;
                Some(id)
            }
            None => None,
        };

        self.record(n, page, request, link, state);
        Ok(())
    }

    fn record_link(
        &mut self,
        id: LinkId,
        source: StateId,
        request: ReqId,
        state: StateId,
        params: FormParams,
    ) -> Result<(), RebuildReason> {
        let conflict = RebuildReason::LinkConflict {
            link: id,
            state: source,
        };
        let observed = ReqTarget {
            request,
            transition: state,
            visits: 1,
        };
        let link = &mut self.links[id.0];
        match link.kind {
            LinkKind::Form => {
                let target = link
                    .targets
                    .entry(source)
                    .or_insert_with(|| Target::Form(FormTarget::new(state)));
                let Target::Form(ft) = target else {
                    return Err(conflict);
                };
                if ft.transition() != state {
                    if ft.visits() > 0 {
                        return Err(conflict);
                    }
                    *ft = FormTarget::new(state);
                }
                let entry = match ft.get(&params) {
                    Some(t) if t.visits > 0 && t.request != request => return Err(conflict),
                    Some(t) if t.visits > 0 => ReqTarget {
                        visits: t.visits + 1,
                        ..observed
                    },
                    _ => observed,
                };
                ft.insert(params, entry).map_err(|_| conflict)?;
            }
            _ => match link.targets.get_mut(&source) {
                Some(Target::Request(t)) if t.visits == 0 => *t = observed,
                Some(Target::Request(t)) if t.request == request && t.transition == state => {
                    t.visits += 1;
                }
                Some(_) => return Err(conflict),
                None => {
                    link.targets.insert(source, Target::Request(observed));
                }
            },
        }
        Ok(())
    }

    fn record(&mut self, n: ObsId, page: PageId, request: ReqId, link: Option<LinkId>, state: StateId) {
        if n == 0 {
            self.requests[request.0].observations.push(n);
        }
        self.page_of.push(page);
        self.request_of.push(request);
        self.link_of.push(link);
        self.states.push(state);
        self.pages[page.0].record(n, state);
    }

    /// Rewrite every state through `map`, merging targets of states that
    /// collapse into one.
    pub fn apply_state_map(&mut self, map: &StateMap) -> Result<(), GraphError> {
        let resolve = |s: StateId| map.resolve(s);
        for state in self.states.iter_mut() {
            *state = resolve(*state);
        }
        for request in self.requests.iter_mut() {
            request.targets = remap_targets(std::mem::take(&mut request.targets), &resolve)?;
        }
        for link in self.links.iter_mut() {
            link.targets = remap_targets(std::mem::take(&mut link.targets), &resolve)?;
        }
        for page in self.pages.iter_mut() {
            page.observations.clear();
            page.seen_states.clear();
        }
        for (i, state) in self.states.iter().enumerate() {
            self.pages[self.page_of[i].0].record(i, *state);
        }
        for request in self.requests.iter_mut() {
            request.changing_state = false;
        }
        for i in 1..self.states.len() {
            if self.states[i] != self.states[i - 1] {
                self.requests[self.request_of[i].0].changing_state = true;
            }
        }
        Ok(())
    }

    /// Give every (link, seen state) pair without a target a speculative
    /// one, predicting the request the link would issue.
    pub fn complete_missing<N, F>(&mut self, history: &History, navigator: &N, forms: &mut F)
    where
        N: Navigator + ?Sized,
        F: FormValues + ?Sized,
    {
        let mut pending = Vec::new();
        for link in &self.links {
            for &state in &self.pages[link.page.0].seen_states {
                if !link.targets.contains_key(&state) {
                    pending.push((link.id, state));
                }
            }
        }
        let mut added = 0;
        for (id, state) in pending {
            let Some(&(obs, link_ref)) = self.links[id.0].members.first() else {
                continue;
            };
            let page = history[obs].page();
            let target = match link_ref.kind {
                LinkKind::Form => {
                    let Some(form) = page.form(link_ref) else {
                        continue;
                    };
                    let mut ft = FormTarget::new(state);
                    for params in forms.candidates(form) {
                        let Some(action) = page.action(link_ref, Some(&params)) else {
                            continue;
                        };
                        match navigator.speculate(&action) {
                            Ok(request) => {
                                let request = self.speculative_request(&request);
                                let entry = ReqTarget {
                                    request,
                                    transition: state,
                                    visits: 0,
                                };
                                if ft.insert(params, entry).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!("Form {} cannot be submitted: {}", id, e);
                                break;
                            }
                        }
                    }
                    if ft.is_empty() {
                        self.links[id.0].skip = true;
                    }
                    Target::Form(ft)
                }
                _ => {
                    let Some(action) = page.action(link_ref, None) else {
                        continue;
                    };
                    match navigator.speculate(&action) {
                        Ok(request) => Target::Request(ReqTarget {
                            request: self.speculative_request(&request),
                            transition: state,
                            visits: 0,
                        }),
                        Err(e) => {
                            debug!("Link {} cannot be followed: {}", id, e);
                            self.links[id.0].skip = true;
                            continue;
                        }
                    }
                }
            };
            self.links[id.0].targets.insert(state, target);
            added += 1;
        }
        if added > 0 {
            debug!("Completed {} missing link targets", added);
        }
    }

    fn speculative_request(&mut self, request: &Request) -> ReqId {
        let key = StrictKey::of(request);
        if let Some(&id) = self.strict_index.get(&key) {
            return id;
        }
        let context = key.context();
        if let Some([only]) = self.context_index.get(&context).map(|ids| ids.as_slice()) {
            return *only;
        }
        let id = self.new_request(&context);
        self.register_key(id, key);
        id
    }

    pub fn mark_skipped(&mut self, id: LinkId) {
        if let Some(link) = self.links.get_mut(id.0) {
            link.skip = true;
        }
    }

    pub fn pages(&self) -> &[AbstractPage] {
        &self.pages
    }

    pub fn requests(&self) -> &[AbstractRequest] {
        &self.requests
    }

    pub fn links(&self) -> &[AbstractLink] {
        &self.links
    }

    pub fn page(&self, id: PageId) -> &AbstractPage {
        &self.pages[id.0]
    }

    pub fn request(&self, id: ReqId) -> &AbstractRequest {
        &self.requests[id.0]
    }

    pub fn link(&self, id: LinkId) -> &AbstractLink {
        &self.links[id.0]
    }

    pub fn page_of(&self, obs: ObsId) -> PageId {
        self.page_of[obs]
    }

    pub fn request_of(&self, obs: ObsId) -> ReqId {
        self.request_of[obs]
    }

    pub fn link_of(&self, obs: ObsId) -> Option<LinkId> {
        self.link_of[obs]
    }

    pub fn state_of(&self, obs: ObsId) -> StateId {
        self.states[obs]
    }

    pub fn observations(&self) -> usize {
        self.states.len()
    }

    /// State after the last observation.
    pub fn current_state(&self) -> StateId {
        self.states.last().copied().unwrap_or(0)
    }

    pub fn states(&self) -> BTreeSet<StateId> {
        self.states.iter().copied().collect()
    }

    /// Requests observed to move the application into another state.
    pub fn changing_requests(&self) -> Vec<ReqId> {
        self.requests
            .iter()
            .filter(|r| r.changing_state)
            .map(|r| r.id)
            .collect()
    }
}

fn remap_targets(
    targets: BTreeMap<StateId, Target>,
    resolve: &impl Fn(StateId) -> StateId,
) -> Result<BTreeMap<StateId, Target>, GraphError> {
    let mut out: BTreeMap<StateId, Target> = BTreeMap::new();
    for (state, target) in targets {
        let state = resolve(state);
        let target = target.remapped(resolve);
        match out.get_mut(&state) {
            Some(existing) => existing.merge(target, state)?,
            None => {
                out.insert(state, target);
            }
        }
    }
    Ok(out)
}

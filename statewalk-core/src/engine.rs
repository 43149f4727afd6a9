use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::frontier::{self, Decision, Step};
use crate::graph::AppGraph;
use crate::history::{History, ObsId, Observation, Via};
use crate::links;
use crate::model::LinkId;
use crate::reduce;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use statewalk_scanner::{Exchange, FormValues, LinkKind, Navigator, ScanError, perform};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Shared flag checked between steps; set it to stop exploring.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Nothing left to explore.
    Completed,
    Cancelled,
    /// Observation or restart budget used up.
    BudgetExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub reason: StopReason,
    pub observations: usize,
    pub states: usize,
    pub pages: usize,
    pub requests: usize,
    pub restarts: usize,
    pub rebuilds: usize,
}

enum StepResult {
    /// The step produced an observation matching what the graph predicted.
    Advanced,
    /// Stop executing the current path and plan again.
    Replan,
}

/// Drives the exploration: plan a path, walk it, fold every new
/// observation into the graph and rebuild whenever it stops fitting.
pub struct Engine<N: Navigator, F: FormValues> {
    navigator: N,
    forms: F,
    config: EngineConfig,
    history: History,
    graph: Option<AppGraph>,
    rng: StdRng,
    cancel: CancelFlag,
    page_counts: Vec<usize>,
    restarts: usize,
    rebuilds: usize,
}

impl<N: Navigator, F: FormValues> Engine<N, F> {
    pub fn new(navigator: N, forms: F, config: EngineConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            navigator,
            forms,
            config,
            history: History::new(),
            graph: None,
            rng,
            cancel: CancelFlag::new(),
            page_counts: Vec::new(),
            restarts: 0,
            rebuilds: 0,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn graph(&self) -> Option<&AppGraph> {
        self.graph.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    /// Explore the application reachable from `entry` until nothing is
    /// left, the budget runs out or the cancel flag is set.
    pub async fn run(&mut self, entry: &str) -> Result<Outcome> {
        info!("Exploring {}", entry);
        let exchange = self.navigator.open(entry).await?;
        self.ingest(exchange, None)?;

        loop {
            if self.cancel.is_cancelled() {
                info!("Exploration cancelled");
                return Ok(self.outcome(StopReason::Cancelled));
            }
            if self.history.len() >= self.config.max_observations {
                info!("Observation budget of {} used up", self.config.max_observations);
                return Ok(self.outcome(StopReason::BudgetExhausted));
            }

            let decision = frontier::plan(
                self.graph.as_ref(),
                &self.history,
                &self.config,
                &self.page_counts,
                &mut self.rng,
            );
            match decision {
                Decision::Done => {
                    info!("Exploration complete");
                    return Ok(self.outcome(StopReason::Completed));
                }
                Decision::Restart => {
                    if self.graph.is_none() {
                        // the entry page offers nothing to follow
                        return Ok(self.outcome(StopReason::Completed));
                    }
                    if self.restarts >= self.config.max_restarts {
                        warn!("Restart budget of {} used up", self.config.max_restarts);
                        return Ok(self.outcome(StopReason::BudgetExhausted));
                    }
                    self.restarts += 1;
                    info!("Restarting from {} ({})", entry, self.restarts);
                    let exchange = self.navigator.open(entry).await?;
                    self.ingest(exchange, None)?;
                }
                Decision::Path(steps) => self.walk(steps).await?,
            }
        }
    }

    async fn walk(&mut self, steps: Vec<Step>) -> Result<()> {
        let before = self.history.len();
        let first = steps.first().map(|s| s.link);
        for step in steps {
            if self.cancel.is_cancelled() || self.history.len() >= self.config.max_observations {
                break;
            }
            match self.take_step(&step).await? {
                StepResult::Advanced => {}
                StepResult::Replan => break,
            }
        }
        // a path that produced nothing must not be planned again
        if self.history.len() == before
            && let Some(link) = first
            && let Some(graph) = self.graph.as_mut()
            && !graph.link(link).skip
        {
            warn!("Link {} could not be followed, skipping it", link);
            graph.mark_skipped(link);
        }
        Ok(())
    }

    async fn take_step(&mut self, step: &Step) -> Result<StepResult> {
        let Some(graph) = self.graph.as_ref() else {
            return Ok(StepResult::Replan);
        };
        let Some(last) = self.history.len().checked_sub(1) else {
            return Ok(StepResult::Replan);
        };
        let link = graph.link(step.link);
        if graph.page_of(last) != link.page {
            debug!("Current page left the planned path");
            return Ok(StepResult::Replan);
        }
        let observation = &self.history[last];
        let Some(link_ref) = links::resolve(observation.link_tree(), &link.path) else {
            return Ok(StepResult::Replan);
        };
        let page = observation.page();
        let params = match link_ref.kind {
            LinkKind::Form => match &step.params {
                Some(params) => Some(params.clone()),
                None => page.form(link_ref).and_then(|f| self.forms.next_params(f)),
            },
            _ => None,
        };
        if link_ref.kind == LinkKind::Form && params.is_none() {
            self.skip_link(step.link);
            return Ok(StepResult::Replan);
        }
        let Some(action) = page.action(link_ref, params.as_ref()) else {
            return Ok(StepResult::Replan);
        };
        debug!("Following {} ({:?})", step.link, link_ref.kind);
        let result = perform(&mut self.navigator, action).await;

        let exchange = match result {
            Ok(exchange) => exchange,
            Err(ScanError::UnsubmittableForm { action }) => {
                warn!("Form {} cannot be submitted", action);
                self.skip_link(step.link);
                return Ok(StepResult::Replan);
            }
            Err(e) => return Err(EngineError::Navigation(e)),
        };
        let rebuilds = self.rebuilds;
        self.ingest(
            exchange,
            Some(Via {
                link: link_ref,
                params,
            }),
        )?;
        if self.rebuilds != rebuilds {
            return Ok(StepResult::Replan);
        }
        if let Some(expected) = step.expect
            && let Some(graph) = self.graph.as_ref()
        {
            let last = self.history.len() - 1;
            let reached = (graph.page_of(last), graph.current_state());
            if reached != expected {
                debug!("Expected {:?}, reached {:?}", expected, reached);
                return Ok(StepResult::Replan);
            }
        }
        Ok(StepResult::Advanced)
    }

    fn skip_link(&mut self, link: LinkId) {
        let Some(graph) = self.graph.as_mut() else {
            return;
        };
        for &(obs, link_ref) in &graph.link(link).members {
            self.history.mark_skipped(obs, link_ref);
        }
        graph.mark_skipped(link);
    }

    fn ingest(&mut self, exchange: Exchange, via: Option<Via>) -> Result<ObsId> {
        debug!("Observed {} -> {}", exchange.request, exchange.page.url);
        let n = self.history.push(Observation::new(exchange, via));

        match self.graph.as_mut() {
            Some(graph) => {
                if let Err(e) = graph.extend(&self.history, n) {
                    info!("{}", e);
                    self.history.mark_hint(n);
                    self.rebuild()?;
                }
            }
            None => self.rebuild()?,
        }
        if let Some(graph) = self.graph.as_mut() {
            graph.complete_missing(&self.history, &self.navigator, &mut self.forms);
        }
        let pages = self.graph.as_ref().map(|g| g.pages().len()).unwrap_or(0);
        self.page_counts.push(pages);
        Ok(n)
    }

    fn rebuild(&mut self) -> Result<()> {
        if self.history.len() == 1 && !self.history[0].page().has_links() {
            debug!("Entry page has no links");
            self.graph = None;
            return Ok(());
        }
        self.rebuilds += 1;
        let mut graph = AppGraph::build(&self.history, &self.config)?;
        let reduction = reduce::reduce(&graph, &self.history, &self.config)?;
        graph.apply_state_map(&reduction.map)?;
        info!(
            "Rebuilt graph from {} observations: {} pages, {} requests, {} states",
            self.history.len(),
            graph.pages().len(),
            graph.requests().len(),
            reduction.state_count()
        );
        self.graph = Some(graph);
        Ok(())
    }

    fn outcome(&self, reason: StopReason) -> Outcome {
        let (states, pages, requests) = match &self.graph {
            Some(g) => (g.states().len(), g.pages().len(), g.requests().len()),
            None => (usize::from(!self.history.is_empty()), self.history.len().min(1), 0),
        };
        Outcome {
            reason,
            observations: self.history.len(),
            states,
            pages,
            requests,
            restarts: self.restarts,
            rebuilds: self.rebuilds,
        }
    }
}

// Report generation from the inferred application model

use crate::engine::Outcome;
use crate::error::Result;
use crate::graph::AppGraph;
use crate::history::History;
use crate::model::{StateId, Target};
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct ModelReport {
    pub entry: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    pub observations: usize,
    pub states: Vec<StateId>,
    pub pages: Vec<PageReport>,
    pub requests: Vec<RequestReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub id: usize,
    /// Distinct URLs of the member pages, in observation order.
    pub urls: Vec<String>,
    pub states: Vec<StateId>,
    pub links: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub id: usize,
    pub method: String,
    pub path: String,
    pub changing_state: bool,
    pub made: bool,
    pub state_hints: usize,
    pub targets: Vec<TargetReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub state: StateId,
    pub page: usize,
    pub transition: StateId,
    pub visits: u32,
}

impl ModelReport {
    pub fn new(entry: &str, graph: Option<&AppGraph>, history: &History) -> Self {
        let mut report = ModelReport {
            entry: entry.to_string(),
            outcome: None,
            observations: history.len(),
            states: Vec::new(),
            pages: Vec::new(),
            requests: Vec::new(),
        };
        let Some(graph) = graph else {
            if let Some(first) = history.get(0) {
                report.states.push(0);
                report.pages.push(PageReport {
                    id: 0,
                    urls: vec![first.page().url.clone()],
                    states: vec![0],
                    links: 0,
                });
            }
            return report;
        };

        report.states = graph.states().into_iter().collect();
        for page in graph.pages() {
            let mut urls: Vec<String> = Vec::new();
            for &obs in &page.members {
                let url = &history[obs].page().url;
                if !urls.contains(url) {
                    urls.push(url.clone());
                }
            }
            report.pages.push(PageReport {
                id: page.id.0,
                urls,
                states: page.seen_states.iter().copied().collect(),
                links: page.link_ids().len(),
            });
        }
        for request in graph.requests() {
            let targets = request
                .targets
                .iter()
                .filter_map(|(state, target)| match target {
                    Target::Page(t) => Some(TargetReport {
                        state: *state,
                        page: t.page.0,
                        transition: t.transition,
                        visits: t.visits,
                    }),
                    _ => None,
                })
                .collect();
            report.requests.push(RequestReport {
                id: request.id.0,
                method: request.method.to_string(),
                path: request.path.clone(),
                changing_state: request.changing_state,
                made: request.request_actually_made(),
                state_hints: request.state_hints,
                targets,
            });
        }
        report
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Model of {}\n", self.entry));
        out.push_str(&"=".repeat(60));
        out.push('\n');
        if let Some(outcome) = &self.outcome {
            out.push_str(&format!("Stopped: {:?}\n", outcome.reason));
        }
        out.push_str(&format!("Observations: {}\n", self.observations));
        out.push_str(&format!("States:       {}\n", self.states.len()));
        out.push_str(&format!("Pages:        {}\n", self.pages.len()));
        let made = self.requests.iter().filter(|r| r.made).count();
        out.push_str(&format!("Requests:     {}\n", made));
        out.push('\n');

        out.push_str("Pages\n");
        for page in &self.pages {
            let first = page.urls.first().map(String::as_str).unwrap_or("-");
            out.push_str(&format!(
                "  P{:<4} {} ({} urls, {} links, states {:?})\n",
                page.id,
                first,
                page.urls.len(),
                page.links,
                page.states
            ));
        }
        out.push('\n');

        out.push_str("Requests\n");
        for request in self.requests.iter().filter(|r| r.made) {
            let marker = if request.changing_state { " *" } else { "" };
            out.push_str(&format!(
                "  R{:<4} {} {}{}\n",
                request.id, request.method, request.path, marker
            ));
            for t in &request.targets {
                out.push_str(&format!(
                    "         s{} -> P{} s{} ({}x)\n",
                    t.state, t.page, t.transition, t.visits
                ));
            }
        }
        out
    }
}

/// Graphviz rendering: pages and requests as nodes, links and request
/// targets as edges labelled with their states.
pub fn to_dot(graph: &AppGraph, history: &History) -> String {
    let mut dot: DiGraph<String, String> = DiGraph::new();
    let mut page_nodes: BTreeMap<usize, NodeIndex> = BTreeMap::new();
    let mut request_nodes: BTreeMap<usize, NodeIndex> = BTreeMap::new();

    for page in graph.pages() {
        let url = page
            .members
            .first()
            .and_then(|&obs| history.get(obs))
            .map(|o| o.page().url.clone())
            .unwrap_or_default();
        page_nodes.insert(page.id.0, dot.add_node(format!("{} {}", page.id, url)));
    }
    for request in graph.requests().iter().filter(|r| r.request_actually_made()) {
        let label = format!("{} {} {}", request.id, request.method, request.path);
        request_nodes.insert(request.id.0, dot.add_node(label));
    }

    for request in graph.requests() {
        let Some(&from) = request_nodes.get(&request.id.0) else {
            continue;
        };
        for (state, target) in &request.targets {
            if let Target::Page(t) = target
                && let Some(&to) = page_nodes.get(&t.page.0)
            {
                dot.add_edge(from, to, format!("s{} -> s{}", state, t.transition));
            }
        }
    }
    for link in graph.links() {
        let Some(&from) = page_nodes.get(&link.page.0) else {
            continue;
        };
        for (state, target) in &link.targets {
            let requests: Vec<_> = match target {
                Target::Request(t) if t.visits > 0 => vec![t.request],
                Target::Form(ft) => ft
                    .entries()
                    .values()
                    .filter(|t| t.visits > 0)
                    .map(|t| t.request)
                    .collect(),
                _ => Vec::new(),
            };
            for request in requests {
                if let Some(&to) = request_nodes.get(&request.0) {
                    dot.add_edge(from, to, format!("{} s{}", link.id, state));
                }
            }
        }
    }
    format!("{}", Dot::new(&dot))
}

// Scripted sites and history helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use statewalk_core::{AppGraph, EngineConfig, History, Observation, Reduction, Via, reduce};
use statewalk_scanner::{
    Action, Anchor, Exchange, FieldTag, FieldType, Form, FormField, FormParams, LinkRef, Method,
    Navigator, Page, Redirect, Request, Result,
};

pub const BASE: &str = "http://example.com";

pub fn url(path: &str) -> String {
    format!("{}{}", BASE, path)
}

pub fn page(path: &str) -> Page {
    Page::html(&url(path), 200)
}

/// A site is a function from request to page; it may keep state of its own.
pub type Route = Box<dyn FnMut(&Request) -> Page + Send>;

pub struct FakeSite {
    route: Route,
    pub requests: Vec<Request>,
}

impl FakeSite {
    pub fn new(route: impl FnMut(&Request) -> Page + Send + 'static) -> Self {
        Self {
            route: Box::new(route),
            requests: Vec::new(),
        }
    }

    fn serve(&mut self, request: Request) -> Exchange {
        let page = (self.route)(&request);
        self.requests.push(request.clone());
        Exchange::new(request, page)
    }
}

#[async_trait]
impl Navigator for FakeSite {
    async fn open(&mut self, url: &str) -> Result<Exchange> {
        let request = Request::get(url)?;
        Ok(self.serve(request))
    }

    async fn click(&mut self, anchor: &Anchor) -> Result<Exchange> {
        let request = Action::Click(anchor).to_request()?;
        Ok(self.serve(request))
    }

    async fn submit_form(&mut self, form: &Form, params: &FormParams) -> Result<Exchange> {
        let request = Action::Submit(form, params).to_request()?;
        Ok(self.serve(request))
    }

    async fn follow_redirect(&mut self, redirect: &Redirect) -> Result<Exchange> {
        let request = Action::Follow(redirect).to_request()?;
        Ok(self.serve(request))
    }
}

// ============================================================================
// Static catalogue: index, add page, item views and a static page
// ============================================================================

pub fn catalogue_index(items: &[u32]) -> Page {
    let mut index = page("/")
        .with_anchor(&url("/add"), "/html/body/a")
        .with_anchor(&url("/static"), "/html/body/a");
    for item in items {
        index = index.with_anchor(&url(&format!("/view?id={}", item)), "/html/body/ul/li/a");
    }
    index
}

pub fn catalogue(request: &Request) -> Page {
    match request.path.as_str() {
        "/add" => page("/add").with_anchor(&url("/"), "/html/body/div/a"),
        "/view" => page(&format!("/view?{}", request.query)).with_anchor(&url("/"), "/html/body/a"),
        "/static" => page("/static").with_anchor(&url("/"), "/html/body/footer/a"),
        _ => catalogue_index(&[1, 2]),
    }
}

// ============================================================================
// Toggle site: /toggle flips a flag that changes what /right shows
// ============================================================================

pub fn toggle_index(path: &str) -> Page {
    page(path)
        .with_anchor(&url("/left"), "/html/body/a")
        .with_anchor(&url("/right"), "/html/body/a")
        .with_anchor(&url("/toggle"), "/html/body/a")
}

pub fn toggle_site() -> impl FnMut(&Request) -> Page + Send + 'static {
    let mut on = false;
    move |request: &Request| match request.path.as_str() {
        "/left" => page("/left").with_anchor(&url("/"), "/html/body/nav/a"),
        "/right" if on => page("/right")
            .with_anchor(&url("/"), "/html/body/div/a")
            .with_anchor(&url("/secret"), "/html/body/div/a"),
        "/right" => page("/right").with_anchor(&url("/"), "/html/body/div/a"),
        "/toggle" => {
            on = !on;
            toggle_index("/toggle")
        }
        "/secret" => page("/secret").with_anchor(&url("/"), "/html/body/nav/a"),
        _ => toggle_index("/"),
    }
}

// ============================================================================
// Search site: a GET form leading to a results page
// ============================================================================

pub fn search_form() -> Form {
    Form {
        method: Method::Get,
        action: url("/search"),
        dompath: "/html/body/form".to_string(),
        inputs: vec![FormField::new(FieldTag::Input, FieldType::Text, "q", "")],
        hiddens: vec![],
        textareas: vec![],
        submitters: vec![FormField::new(FieldTag::Input, FieldType::Submit, "go", "Search")],
    }
}

pub fn search_site(request: &Request) -> Page {
    match request.path.as_str() {
        "/search" => page("/search").with_anchor(&url("/"), "/html/body/a"),
        _ => page("/").with_form(search_form()),
    }
}

// ============================================================================
// Login site: POST /login opens /private until /logout
// ============================================================================

pub fn login_form() -> Form {
    Form {
        method: Method::Post,
        action: url("/login"),
        dompath: "/html/body/form".to_string(),
        inputs: vec![
            FormField::new(FieldTag::Input, FieldType::Text, "user", ""),
            FormField::new(FieldTag::Input, FieldType::Password, "password", ""),
        ],
        hiddens: vec![],
        textareas: vec![],
        submitters: vec![FormField::new(FieldTag::Input, FieldType::Submit, "login", "Log in")],
    }
}

pub fn login_site() -> impl FnMut(&Request) -> Page + Send + 'static {
    let mut logged_in = false;
    move |request: &Request| match request.path.as_str() {
        "/login" => {
            logged_in = true;
            page("/login").with_anchor(&url("/"), "/html/body/div/a")
        }
        "/logout" => {
            logged_in = false;
            page("/logout").with_anchor(&url("/"), "/html/body/p/a")
        }
        "/private" if logged_in => page("/private")
            .with_anchor(&url("/"), "/html/body/a")
            .with_anchor(&url("/logout"), "/html/body/nav/a"),
        "/private" => page("/private").with_anchor(&url("/"), "/html/body/a"),
        _ => page("/")
            .with_anchor(&url("/private"), "/html/body/a")
            .with_form(login_form()),
    }
}

// ============================================================================
// Drifting site: /next changes shape on its third request with nothing in between
// ============================================================================

pub fn drifting_site() -> impl FnMut(&Request) -> Page + Send + 'static {
    let mut served = 0;
    move |request: &Request| match request.path.as_str() {
        "/next" => {
            served += 1;
            if served < 3 {
                page("/next").with_anchor(&url("/next"), "/html/body/div/a")
            } else {
                page("/next")
                    .with_anchor(&url("/next"), "/html/body/div/a")
                    .with_anchor(&url("/"), "/html/body/footer/a")
            }
        }
        _ => page("/").with_anchor(&url("/next"), "/html/body/a"),
    }
}

// ============================================================================
// History helpers
// ============================================================================

/// Replay a sequence of paths against a site. Each step goes through the
/// anchor of the previous page pointing at the next URL, when there is one.
pub fn walk(site: &mut dyn FnMut(&Request) -> Page, paths: &[&str]) -> History {
    let mut history = History::new();
    for path in paths {
        let request = Request::get(&url(path)).unwrap();
        let via = history.last().and_then(|prev| {
            prev.page()
                .anchors
                .iter()
                .position(|a| a.href == request.url)
                .map(|i| Via {
                    link: LinkRef::anchor(i),
                    params: None,
                })
        });
        let page = site(&request);
        history.push(Observation::new(Exchange::new(request, page), via));
    }
    history
}

/// Full rebuild: graph, state inference and the resulting map applied.
pub fn infer(history: &History) -> (AppGraph, Reduction) {
    let config = EngineConfig::default();
    let mut graph = AppGraph::build(history, &config).unwrap();
    let reduction = reduce(&graph, history, &config).unwrap();
    graph.apply_state_map(&reduction.map).unwrap();
    (graph, reduction)
}

pub fn made_requests(graph: &AppGraph) -> usize {
    graph
        .requests()
        .iter()
        .filter(|r| r.request_actually_made())
        .count()
}

/// State of every observation, in order.
pub fn obs_states(graph: &AppGraph) -> Vec<usize> {
    (0..graph.observations()).map(|i| graph.state_of(i)).collect()
}

/// True when both labelings group the observations the same way.
pub fn same_partition(a: &[usize], b: &[usize]) -> bool {
    a.len() == b.len()
        && (0..a.len()).all(|i| (0..a.len()).all(|j| (a[i] == a[j]) == (b[i] == b[j])))
}

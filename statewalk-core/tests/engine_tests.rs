// Tests for the exploration engine

mod support;

use async_trait::async_trait;
use statewalk_core::model::AbstractLink;
use statewalk_core::{
    AppGraph, CancelFlag, Engine, EngineConfig, EngineError, ReduceError, StopReason,
};
use statewalk_scanner::{
    Anchor, Exchange, Form, FormFiller, FormParams, LinkKind, Method, Navigator, Page, Redirect,
    Request, ScanError,
};
use std::collections::BTreeSet;
use support::{
    FakeSite, catalogue, drifting_site, infer, login_form, login_site, made_requests, obs_states,
    page, same_partition, search_site, url,
};

/// Index with an /about link and a login form that has lost its submit button.
fn locked_site(request: &Request) -> Page {
    match request.path.as_str() {
        "/about" => page("/about").with_anchor(&url("/"), "/html/body/div/a"),
        _ => {
            let mut form = login_form();
            form.submitters.clear();
            page("/")
                .with_anchor(&url("/about"), "/html/body/a")
                .with_form(form)
        }
    }
}

/// Predicts form requests like any navigator but refuses to send them.
struct NoSubmit(FakeSite);

#[async_trait]
impl Navigator for NoSubmit {
    async fn open(&mut self, url: &str) -> statewalk_scanner::Result<Exchange> {
        self.0.open(url).await
    }

    async fn click(&mut self, anchor: &Anchor) -> statewalk_scanner::Result<Exchange> {
        self.0.click(anchor).await
    }

    async fn submit_form(
        &mut self,
        form: &Form,
        _params: &FormParams,
    ) -> statewalk_scanner::Result<Exchange> {
        Err(ScanError::UnsubmittableForm {
            action: form.action.clone(),
        })
    }

    async fn follow_redirect(
        &mut self,
        redirect: &Redirect,
    ) -> statewalk_scanner::Result<Exchange> {
        self.0.follow_redirect(redirect).await
    }
}

fn form_link(graph: &AppGraph) -> &AbstractLink {
    graph
        .links()
        .iter()
        .find(|l| l.kind == LinkKind::Form)
        .unwrap()
}

// ============================================================================
// Termination Tests
// ============================================================================

#[tokio::test]
async fn test_entry_without_links_completes() {
    let site = FakeSite::new(|_| page("/"));
    let mut engine = Engine::new(site, FormFiller::new(), EngineConfig::default());

    let outcome = engine.run(&url("/")).await.unwrap();

    assert_eq!(outcome.reason, StopReason::Completed);
    assert_eq!(outcome.observations, 1);
    assert_eq!(outcome.states, 1);
    assert_eq!(outcome.pages, 1);
    assert!(engine.graph().is_none());
}

#[tokio::test]
async fn test_cancelled_before_first_step() {
    let site = FakeSite::new(catalogue);
    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut engine =
        Engine::new(site, FormFiller::new(), EngineConfig::default()).with_cancel_flag(cancel);

    let outcome = engine.run(&url("/")).await.unwrap();

    assert_eq!(outcome.reason, StopReason::Cancelled);
    assert_eq!(outcome.observations, 1);
}

#[tokio::test]
async fn test_observation_budget() {
    let site = FakeSite::new(catalogue);
    let config = EngineConfig::default().with_max_observations(3);
    let mut engine = Engine::new(site, FormFiller::new(), config);

    let outcome = engine.run(&url("/")).await.unwrap();

    assert_eq!(outcome.reason, StopReason::BudgetExhausted);
    assert_eq!(outcome.observations, 3);
    assert_eq!(engine.navigator().requests.len(), 3);
}

// ============================================================================
// Exploration Tests
// ============================================================================

#[tokio::test]
async fn test_explores_static_catalogue() {
    let site = FakeSite::new(catalogue);
    let mut engine = Engine::new(site, FormFiller::new(), EngineConfig::default());

    let outcome = engine.run(&url("/")).await.unwrap();

    assert_eq!(outcome.reason, StopReason::Completed);
    assert_eq!(outcome.states, 1);
    assert_eq!(outcome.pages, 4);
    let graph = engine.graph().unwrap();
    assert_eq!(made_requests(graph), 4);
    for link in graph.links() {
        assert!(!link.is_unvisited(0), "{} was never followed", link.id);
    }
}

#[tokio::test]
async fn test_same_seed_same_walk() {
    let mut first = Engine::new(
        FakeSite::new(catalogue),
        FormFiller::new(),
        EngineConfig::default().with_seed(7),
    );
    let mut second = Engine::new(
        FakeSite::new(catalogue),
        FormFiller::new(),
        EngineConfig::default().with_seed(7),
    );
    first.run(&url("/")).await.unwrap();
    second.run(&url("/")).await.unwrap();

    let urls = |requests: &[statewalk_scanner::Request]| {
        requests.iter().map(|r| r.url.clone()).collect::<Vec<_>>()
    };
    assert_eq!(
        urls(&first.navigator().requests),
        urls(&second.navigator().requests)
    );
}

#[tokio::test]
async fn test_submits_search_form() {
    let site = FakeSite::new(search_site);
    let mut engine = Engine::new(site, FormFiller::new(), EngineConfig::default());

    let outcome = engine.run(&url("/")).await.unwrap();

    assert_eq!(outcome.reason, StopReason::Completed);
    let graph = engine.graph().unwrap();
    assert!(form_link(graph).visits_in(0) > 0);
    assert!(
        engine
            .navigator()
            .requests
            .iter()
            .any(|r| r.path == "/search")
    );
}

// ============================================================================
// Unsubmittable Form Tests
// ============================================================================

#[tokio::test]
async fn test_form_without_submitter_is_skipped() {
    let config = EngineConfig::default().with_patience(0).with_max_restarts(0);
    let mut engine = Engine::new(FakeSite::new(locked_site), FormFiller::new(), config);

    let outcome = engine.run(&url("/")).await.unwrap();

    assert_eq!(outcome.reason, StopReason::Completed);
    assert_eq!(outcome.restarts, 0);
    assert!(form_link(engine.graph().unwrap()).skip);
    let paths: Vec<&str> = engine
        .navigator()
        .requests
        .iter()
        .map(|r| r.path.as_str())
        .collect();
    assert_eq!(paths, vec!["/", "/about", "/"]);
}

#[tokio::test]
async fn test_refused_submission_skips_form() {
    let site = NoSubmit(FakeSite::new(search_site));
    let mut engine = Engine::new(site, FormFiller::new(), EngineConfig::default());

    let outcome = engine.run(&url("/")).await.unwrap();

    assert_eq!(outcome.reason, StopReason::Completed);
    assert_eq!(outcome.observations, 1);
    assert_eq!(engine.navigator().0.requests.len(), 1);

    let form = form_link(engine.graph().unwrap());
    assert!(form.skip);
    // remembered on the history so rebuilds keep skipping it
    let (obs, link) = form.members[0];
    assert!(engine.history().is_skipped(obs, link));
}

// ============================================================================
// State Discovery Tests
// ============================================================================

#[tokio::test]
async fn test_login_site_finds_logged_in_state() {
    let site = FakeSite::new(login_site());
    let mut engine = Engine::new(site, FormFiller::new(), EngineConfig::default());

    let outcome = engine.run(&url("/")).await.unwrap();

    assert_eq!(outcome.reason, StopReason::Completed);
    assert_eq!(outcome.states, 2);
    assert_eq!(outcome.pages, 5);

    let graph = engine.graph().unwrap();
    assert_eq!(graph.states(), BTreeSet::from([0, 3]));
    assert_eq!(made_requests(graph), 4);
    let mut changing: Vec<&str> = graph
        .changing_requests()
        .iter()
        .map(|&id| graph.request(id).path.as_str())
        .collect();
    changing.sort();
    assert_eq!(changing, vec!["/login", "/logout"]);
    for request in graph.requests().iter().filter(|r| r.path == "/login") {
        assert_eq!(request.method, Method::Post);
    }
}

#[tokio::test]
async fn test_login_site_incremental_matches_rebuild() {
    for budget in 6..=30 {
        let config = EngineConfig::default().with_max_observations(budget);
        let mut engine = Engine::new(FakeSite::new(login_site()), FormFiller::new(), config);
        engine.run(&url("/")).await.unwrap();

        let graph = engine.graph().unwrap();
        let (rebuilt, _) = infer(engine.history());
        assert!(
            same_partition(&obs_states(graph), &obs_states(&rebuilt)),
            "states diverge with a budget of {}",
            budget
        );
    }
}

#[tokio::test]
async fn test_unexplainable_site_is_fatal() {
    let site = FakeSite::new(drifting_site());
    let mut engine = Engine::new(site, FormFiller::new(), EngineConfig::default());

    let err = engine.run(&url("/")).await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::Reduce(ReduceError::StateSplitExhausted { at: 3, witness: 2 })
    ));
    assert_eq!(engine.history().len(), 4);
}

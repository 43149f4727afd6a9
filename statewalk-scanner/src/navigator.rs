use crate::error::{Result, ScanError};
use crate::form_filler::FormParams;
use crate::page::{Anchor, Form, Page, Redirect};
use crate::request::{Method, Request};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

/// One navigation step: the request that was made and the page it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub request: Request,
    pub page: Page,
}

impl Exchange {
    pub fn new(request: Request, page: Page) -> Self {
        Self { request, page }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    Click(&'a Anchor),
    Submit(&'a Form, &'a FormParams),
    Follow(&'a Redirect),
}

impl Action<'_> {
    /// The request this action issues, computed without sending anything.
    pub fn to_request(&self) -> Result<Request> {
        match self {
            Action::Click(anchor) => Request::get(&anchor.href),
            Action::Follow(redirect) => Request::get(&redirect.location),
            Action::Submit(form, params) => form_request(form, params),
        }
    }
}

/// GET forms carry their parameters in the query string, POST forms in the body.
pub fn form_request(form: &Form, params: &FormParams) -> Result<Request> {
    if !form.is_submittable() {
        return Err(ScanError::UnsubmittableForm {
            action: form.action.clone(),
        });
    }
    let mut url = Url::parse(&form.action)?;
    let pairs = params.pairs();
    match form.method {
        Method::Get => {
            url.query_pairs_mut().clear().extend_pairs(pairs.iter());
            Ok(Request::new(Method::Get, &url, Vec::new()))
        }
        Method::Post => Ok(Request::new(Method::Post, &url, pairs)),
    }
}

/// The browser-side collaborator. Implementations turn navigation failures
/// into synthetic error pages; only unsubmittable forms and malformed URLs
/// come back as errors.
#[async_trait]
pub trait Navigator: Send {
    async fn open(&mut self, url: &str) -> Result<Exchange>;

    async fn click(&mut self, anchor: &Anchor) -> Result<Exchange>;

    async fn submit_form(&mut self, form: &Form, params: &FormParams) -> Result<Exchange>;

    async fn follow_redirect(&mut self, redirect: &Redirect) -> Result<Exchange>;

    /// Request that `action` would issue, without side effects.
    fn speculate(&self, action: &Action<'_>) -> Result<Request> {
        action.to_request()
    }
}

/// Dispatch an action to the matching navigator call.
pub async fn perform<N: Navigator + ?Sized>(nav: &mut N, action: Action<'_>) -> Result<Exchange> {
    match action {
        Action::Click(anchor) => nav.click(anchor).await,
        Action::Submit(form, params) => nav.submit_form(form, params).await,
        Action::Follow(redirect) => nav.follow_redirect(redirect).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{FieldTag, FieldType, FormField};

    fn search_form(method: Method) -> Form {
        Form {
            method,
            action: "http://example.com/search?sort=asc".to_string(),
            dompath: "/html/body/form".to_string(),
            inputs: vec![FormField::new(FieldTag::Input, FieldType::Text, "q", "")],
            hiddens: vec![],
            textareas: vec![],
            submitters: vec![FormField::new(
                FieldTag::Input,
                FieldType::Submit,
                "",
                "Search",
            )],
        }
    }

    fn params() -> FormParams {
        let mut p = FormParams::default();
        p.push("q", "rust");
        p
    }

    #[test]
    fn test_get_form_request_replaces_query() {
        let form = search_form(Method::Get);
        let p = params();
        let req = Action::Submit(&form, &p).to_request().unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/search");
        assert_eq!(req.query, "q=rust");
        assert!(req.params.is_empty());
    }

    #[test]
    fn test_post_form_request_uses_body() {
        let form = search_form(Method::Post);
        let p = params();
        let req = Action::Submit(&form, &p).to_request().unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.query, "sort=asc");
        assert_eq!(req.params, vec![("q".to_string(), "rust".to_string())]);
    }

    #[test]
    fn test_unsubmittable_form() {
        let mut form = search_form(Method::Post);
        form.submitters.clear();
        let p = params();
        let err = Action::Submit(&form, &p).to_request().unwrap_err();
        assert!(matches!(err, ScanError::UnsubmittableForm { .. }));
    }

    #[test]
    fn test_click_request() {
        let anchor = Anchor {
            href: "http://example.com/view?id=2".to_string(),
            dompath: "/html/body/a".to_string(),
        };
        let req = Action::Click(&anchor).to_request().unwrap();
        assert_eq!(req.path, "/view");
        assert_eq!(req.query, "id=2");
    }
}

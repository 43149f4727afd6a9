use crate::error::{Result, ScanError};
use crate::form_filler::FormParams;
use crate::ignore::filter_ignored_parts;
use crate::navigator::{Exchange, Navigator, form_request};
use crate::page::{Anchor, FieldTag, FieldType, Form, FormField, Page, Redirect};
use crate::request::{Method, Request};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Navigator backed by a cookie-keeping reqwest client. Redirects are not
/// followed automatically; they surface as redirect pages.
pub struct HttpNavigator {
    client: Client,
}

impl HttpNavigator {
    pub fn new() -> Result<Self> {
        Self::with_timeout(10)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent("Statewalk/0.1 (https://github.com/trapdoorsec/statewalk)")
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client })
    }

    async fn fetch(&mut self, request: Request) -> Result<Exchange> {
        debug!("Fetching {}", request);

        let start = Instant::now();
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url).form(&request.params),
        };

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Navigation to {} failed: {}", request.url, e);
                let page = Page::error(&request.url, 0);
                return Ok(Exchange::new(request, page));
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);

        let page = if status.is_redirection() {
            match location.and_then(|l| resolve_url(&final_url, &l)) {
                Some(target) => Page::redirect(&final_url, status.as_u16(), &target),
                None => Page::error(&final_url, status.as_u16()),
            }
        } else if status.is_client_error() || status.is_server_error() {
            Page::error(&final_url, status.as_u16())
        } else {
            match response.text().await {
                Ok(body) if is_html => parse_page(&final_url, status.as_u16(), &body)?,
                Ok(_) => Page::html(&final_url, status.as_u16()),
                Err(e) => {
                    warn!("Reading body of {} failed: {}", final_url, e);
                    Page::error(&final_url, status.as_u16())
                }
            }
        };

        info!(
            "{} -> {} ({} links, {:?})",
            request,
            page.status,
            page.link_refs().len(),
            start.elapsed()
        );
        Ok(Exchange::new(request, page))
    }
}

#[async_trait]
impl Navigator for HttpNavigator {
    async fn open(&mut self, url: &str) -> Result<Exchange> {
        let request = Request::get(url)?;
        self.fetch(request).await
    }

    async fn click(&mut self, anchor: &Anchor) -> Result<Exchange> {
        let request = Request::get(&anchor.href)?;
        self.fetch(request).await
    }

    async fn submit_form(&mut self, form: &Form, params: &FormParams) -> Result<Exchange> {
        let request = form_request(form, params)?;
        self.fetch(request).await
    }

    async fn follow_redirect(&mut self, redirect: &Redirect) -> Result<Exchange> {
        let request = Request::get(&redirect.location)?;
        self.fetch(request).await
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ScanError::ParseError(format!("{}: {:?}", css, e)))
}

/// Parse an HTML body into the page model: same-host anchors and forms.
pub fn parse_page(url: &str, status: u16, html: &str) -> Result<Page> {
    let document = Html::parse_document(html);
    let mut page = Page::html(url, status);

    let anchor_selector = selector("a[href]")?;
    for element in document.select(&anchor_selector) {
        if let Some(href) = element.value().attr("href")
            && let Some(absolute) = resolve_url(url, href)
            && is_valid_anchor(url, &absolute)
        {
            page.anchors.push(Anchor {
                href: absolute,
                dompath: dompath(&element),
            });
        }
    }

    let form_selector = selector("form")?;
    let input_selector = selector("input")?;
    let textarea_selector = selector("textarea")?;
    let button_selector = selector("button")?;
    for element in document.select(&form_selector) {
        let attrs = element.value();
        let action_attr = attrs.attr("action").unwrap_or("").trim();
        let action = if action_attr.is_empty() {
            Some(url.to_string())
        } else {
            resolve_url(url, action_attr)
        };
        let Some(action) = action else {
            debug!("Skipping form with unusable action {:?}", action_attr);
            continue;
        };

        let mut form = Form {
            method: Method::from_attr(attrs.attr("method").unwrap_or("")),
            action: filter_ignored_parts(&action),
            dompath: dompath(&element),
            inputs: Vec::new(),
            hiddens: Vec::new(),
            textareas: Vec::new(),
            submitters: Vec::new(),
        };

        for input in element.select(&input_selector) {
            let field_type = FieldType::from_attr(input.value().attr("type").unwrap_or(""));
            let field = FormField::new(
                FieldTag::Input,
                field_type,
                input.value().attr("name").unwrap_or(""),
                input.value().attr("value").unwrap_or(""),
            );
            match field_type {
                FieldType::Hidden => form.hiddens.push(field),
                FieldType::Submit | FieldType::Image => {
                    if field_type == FieldType::Image {
                        form.inputs.push(field.clone());
                    }
                    form.submitters.push(field);
                }
                FieldType::Button => {}
                _ => form.inputs.push(field),
            }
        }
        for textarea in element.select(&textarea_selector) {
            let text: String = textarea.text().collect();
            form.textareas.push(FormField::new(
                FieldTag::Textarea,
                FieldType::Text,
                textarea.value().attr("name").unwrap_or(""),
                &text,
            ));
        }
        for button in element.select(&button_selector) {
            let kind = button.value().attr("type").unwrap_or("");
            if kind.eq_ignore_ascii_case("submit") {
                form.submitters.push(FormField::new(
                    FieldTag::Button,
                    FieldType::Submit,
                    button.value().attr("name").unwrap_or(""),
                    button.value().attr("value").unwrap_or(""),
                ));
            }
        }
        page.forms.push(form);
    }

    Ok(page)
}

/// Tag path from the root to `element`, e.g. `/html/body/ul/li/a`.
fn dompath(element: &ElementRef) -> String {
    let mut names: Vec<&str> = element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .map(|e| e.value().name())
        .collect();
    names.reverse();
    names.push(element.value().name());
    format!("/{}", names.join("/"))
}

fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with('#')
    {
        return None;
    }

    let base_url = Url::parse(base).ok()?;
    let mut resolved = base_url.join(href).ok()?;
    resolved.set_fragment(None);

    Some(resolved.to_string())
}

/// Only plain web links on the current host are followed.
fn is_valid_anchor(current: &str, target: &str) -> bool {
    let (Ok(current), Ok(target)) = (Url::parse(current), Url::parse(target)) else {
        return false;
    };
    matches!(target.scheme(), "http" | "https") && target.host_str() == current.host_str()
}

use crate::error::Result;
use crate::ignore::filter_ignored_parts;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }

    /// Anything that is not POST is submitted as GET.
    pub fn from_attr(attr: &str) -> Self {
        if attr.trim().eq_ignore_ascii_case("post") {
            Method::Post
        } else {
            Method::Get
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete request as issued (or about to be issued) by the navigator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    /// Full URL including the (filtered) query string.
    pub url: String,
    pub path: String,
    pub query: String,
    /// Body parameters, only populated for POST.
    pub params: Vec<(String, String)>,
}

impl Request {
    pub fn new(method: Method, url: &Url, params: Vec<(String, String)>) -> Self {
        let query = url.query().map(filter_ignored_parts).unwrap_or_default();
        let mut full = url.clone();
        full.set_fragment(None);
        full.set_query(if query.is_empty() { None } else { Some(&query) });
        Self {
            method,
            url: full.to_string(),
            path: url.path().to_string(),
            query,
            params,
        }
    }

    pub fn get(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)?;
        Ok(Self::new(Method::Get, &parsed, Vec::new()))
    }

    pub fn is_post(&self) -> bool {
        self.method == Method::Post
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)?;
        if !self.params.is_empty() {
            let body: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, " [{}]", body.join("&"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_splits_path_and_query() {
        let req = Request::get("http://example.com/view.php?id=3#top").unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/view.php");
        assert_eq!(req.query, "id=3");
        assert_eq!(req.url, "http://example.com/view.php?id=3");
    }

    #[test]
    fn test_request_drops_session_id() {
        let req =
            Request::get("http://example.com/a?sid=0123456789abcdef0123456789abcdef").unwrap();
        assert_eq!(req.query, "");
        assert_eq!(req.url, "http://example.com/a");
    }

    #[test]
    fn test_method_from_attr() {
        assert_eq!(Method::from_attr("post"), Method::Post);
        assert_eq!(Method::from_attr(" POST "), Method::Post);
        assert_eq!(Method::from_attr(""), Method::Get);
        assert_eq!(Method::from_attr("put"), Method::Get);
    }

    #[test]
    fn test_is_post() {
        let url = Url::parse("http://example.com/login").unwrap();
        let login = Request::new(Method::Post, &url, vec![("user".to_string(), "a".to_string())]);
        assert!(login.is_post());
        assert!(!Request::get("http://example.com/login").unwrap().is_post());
    }

    #[test]
    fn test_invalid_url() {
        assert!(Request::get("not a url").is_err());
    }
}

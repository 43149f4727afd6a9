// Feature vectors for links, forms and pages

use crate::tree::KeyTree;
use serde::Serialize;
use statewalk_scanner::{Form, LinkKind, LinkRef, Page};
use url::Url;

/// Placeholder for links that point back at the same document.
pub const SAME_PAGE: &str = "<SAME/PAGE>";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Token {
    Kind(LinkKind),
    Str(String),
    List(Vec<String>),
    /// Number of links stored at a node of the link tree.
    Count(usize),
    /// Position among links sharing the same key path.
    Index(usize),
    /// Marker for pages without any link.
    Empty,
}

pub type Level = Vec<Token>;

/// A page's structural signature: one level per depth of its link tree.
pub type FeatureVector = Vec<Level>;

pub type ConcreteTree = KeyTree<Token, LinkRef>;

fn split_query(query: &str) -> (Vec<String>, Vec<String>) {
    let mut keys = Vec::new();
    let mut values = Vec::new();
    for part in query.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = part.split_once('=').unwrap_or((part, ""));
        keys.push(k.to_string());
        values.push(v.to_string());
    }
    keys.sort();
    values.sort();
    (keys, values)
}

fn push_query(tokens: &mut Vec<Token>, query: &str) {
    if query.is_empty() {
        return;
    }
    let (keys, values) = split_query(query);
    tokens.push(Token::List(keys));
    tokens.push(Token::List(values));
}

/// Path segments followed by sorted query keys and values.
pub fn url_vector(path: &str, query: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = if path.trim() == "/" {
        vec![Token::Str("/".to_string())]
    } else {
        path.split('/')
            .filter(|s| !s.is_empty())
            .map(|s| Token::Str(s.to_string()))
            .collect()
    };
    if tokens.is_empty() {
        tokens.push(Token::Str(SAME_PAGE.to_string()));
    }
    push_query(&mut tokens, query);
    tokens
}

pub fn href_vector(href: &str) -> Vec<Token> {
    match Url::parse(href) {
        Ok(url) => url_vector(url.path(), url.query().unwrap_or("")),
        Err(_) => vec![Token::Str(href.to_string())],
    }
}

/// Method, action path, action query, then visible and hidden input names.
pub fn form_vector(form: &Form) -> Vec<Token> {
    let mut tokens = vec![Token::Str(form.method.as_str().to_string())];
    match Url::parse(&form.action) {
        Ok(url) => {
            tokens.extend(url.path().split('/').map(|s| {
                if s.is_empty() {
                    Token::Str("/".to_string())
                } else {
                    Token::Str(s.to_string())
                }
            }));
            push_query(&mut tokens, url.query().unwrap_or(""));
        }
        Err(_) => tokens.push(Token::Str(form.action.clone())),
    }
    let inputs = form.input_names();
    if !inputs.is_empty() {
        tokens.push(Token::List(inputs));
    }
    let hiddens = form.hidden_names();
    if !hiddens.is_empty() {
        tokens.push(Token::List(hiddens));
    }
    tokens
}

fn link_path(page: &Page, link: LinkRef) -> Vec<Token> {
    let mut path = vec![Token::Kind(link.kind)];
    match link.kind {
        LinkKind::Anchor => {
            if let Some(anchor) = page.anchors.get(link.index) {
                if !anchor.dompath.is_empty() {
                    path.push(Token::Str(anchor.dompath.clone()));
                }
                path.extend(href_vector(&anchor.href));
            }
        }
        LinkKind::Form => {
            if let Some(form) = page.forms.get(link.index) {
                if !form.dompath.is_empty() {
                    path.push(Token::Str(form.dompath.clone()));
                }
                path.extend(form_vector(form));
            }
        }
        LinkKind::Redirect => {
            if let Some(redirect) = page.redirects.get(link.index) {
                path.extend(href_vector(&redirect.location));
            }
        }
    }
    path
}

/// Every link of the page placed under its kind, dom path and vector,
/// with a trailing counter keeping identical links apart.
pub fn link_tree(page: &Page) -> ConcreteTree {
    let mut tree = ConcreteTree::new();
    for link in page.link_refs() {
        let mut path = link_path(page, link);
        let counter = tree.get(&path).map(|n| n.child_count()).unwrap_or(0);
        path.push(Token::Index(counter));
        tree.insert(&path, link);
    }
    tree
}

/// Breadth-first levels of the link tree. Each level lists the keys of the
/// nodes at that depth plus a count wherever a link is stored.
pub fn page_vector(tree: &ConcreteTree) -> FeatureVector {
    if tree.is_empty() {
        return vec![vec![Token::Empty]];
    }
    let mut levels = Vec::new();
    let mut frontier = vec![tree];
    while !frontier.is_empty() {
        let mut level = Vec::new();
        let mut next = Vec::new();
        for node in frontier {
            if node.value().is_some() {
                level.push(Token::Count(1));
            }
            for (key, child) in node.children() {
                level.push(key.clone());
                next.push(child);
            }
        }
        levels.push(level);
        frontier = next;
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use statewalk_scanner::{FieldTag, FieldType, FormField, Method};

    fn s(v: &str) -> Token {
        Token::Str(v.to_string())
    }

    #[test]
    fn test_url_vector_root() {
        assert_eq!(url_vector("/", ""), vec![s("/")]);
        assert_eq!(url_vector("", ""), vec![s(SAME_PAGE)]);
    }

    #[test]
    fn test_url_vector_sorts_query() {
        let v = url_vector("/a/view.php", "id=3&cat=b");
        assert_eq!(
            v,
            vec![
                s("a"),
                s("view.php"),
                Token::List(vec!["cat".into(), "id".into()]),
                Token::List(vec!["3".into(), "b".into()]),
            ]
        );
    }

    #[test]
    fn test_form_vector() {
        let form = Form {
            method: Method::Post,
            action: "http://example.com/save".to_string(),
            dompath: "/html/body/form".to_string(),
            inputs: vec![FormField::new(FieldTag::Input, FieldType::Text, "title", "")],
            hiddens: vec![FormField::new(FieldTag::Input, FieldType::Hidden, "token", "x")],
            textareas: vec![],
            submitters: vec![],
        };
        assert_eq!(
            form_vector(&form),
            vec![
                s("POST"),
                s("/"),
                s("save"),
                Token::List(vec!["title".into()]),
                Token::List(vec!["token".into()]),
            ]
        );
    }

    #[test]
    fn test_identical_links_get_counters() {
        let page = Page::html("http://example.com/", 200)
            .with_anchor("http://example.com/a", "/html/body/a")
            .with_anchor("http://example.com/a", "/html/body/a");
        let tree = link_tree(&page);
        let base = vec![Token::Kind(LinkKind::Anchor), s("/html/body/a"), s("a")];
        let node = tree.get(&base).unwrap();
        assert_eq!(node.keys(), vec![&Token::Index(0), &Token::Index(1)]);
        assert_eq!(tree.values().len(), 2);
    }

    #[test]
    fn test_empty_page_vector() {
        let page = Page::error("http://example.com/x", 500);
        assert_eq!(page_vector(&link_tree(&page)), vec![vec![Token::Empty]]);
    }

    #[test]
    fn test_page_vector_levels() {
        let page = Page::html("http://example.com/", 200).with_anchor("http://example.com/", "");
        let v = page_vector(&link_tree(&page));
        assert_eq!(v[0], vec![Token::Kind(LinkKind::Anchor)]);
        assert_eq!(v[1], vec![s("/")]);
        assert_eq!(v[2], vec![Token::Index(0)]);
        assert_eq!(v[3], vec![Token::Count(1)]);
        assert_eq!(v.len(), 4);
    }

    #[test]
    fn test_same_structure_same_vector() {
        let a = Page::html("http://example.com/view?id=1", 200)
            .with_anchor("http://example.com/", "/html/body/a");
        let b = Page::html("http://example.com/view?id=2", 200)
            .with_anchor("http://example.com/", "/html/body/a");
        assert_eq!(page_vector(&link_tree(&a)), page_vector(&link_tree(&b)));
    }
}

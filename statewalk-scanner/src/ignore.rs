use regex::Regex;
use std::sync::LazyLock;

/// Session identifiers that change between visits but carry no meaning for
/// the application model.
static IGNORED_PARTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"&sid=[a-f0-9]{32}",
        r"sid=[a-f0-9]{32}&",
        r"\?sid=[a-f0-9]{32}$",
        r"^sid=[a-f0-9]{32}$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Strip ignored parts (session ids) from a URL or query string.
pub fn filter_ignored_parts(s: &str) -> String {
    let mut out = s.to_string();
    for re in IGNORED_PARTS.iter() {
        out = re.replace_all(&out, "").into_owned();
    }
    out
}

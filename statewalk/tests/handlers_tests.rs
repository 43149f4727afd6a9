use statewalk::commands::command_argument_builder;
use statewalk::handlers::*;
use statewalk_core::{EngineConfig, History, Observation};
use statewalk_scanner::{Exchange, Page, Request};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tempfile::{NamedTempFile, TempDir};

fn single_page_history() -> History {
    let request = Request::get("http://example.com/").unwrap();
    let page = Page::html("http://example.com/", 200);
    let mut history = History::new();
    history.push(Observation::new(Exchange::new(request, page), None));
    history
}

#[test]
fn test_parse_named_param() {
    let (name, value) = parse_named_param("user=alice").unwrap();
    assert_eq!(name, "user");
    assert_eq!(value, "alice");
}

#[test]
fn test_parse_named_param_keeps_equals_in_value() {
    let (name, value) = parse_named_param("token=a=b").unwrap();
    assert_eq!(name, "token");
    assert_eq!(value, "a=b");
}

#[test]
fn test_parse_named_param_empty_value() {
    let (_, value) = parse_named_param("q=").unwrap();
    assert_eq!(value, "");
}

#[test]
fn test_parse_named_param_invalid() {
    assert!(parse_named_param("novalue").is_err());
    assert!(parse_named_param("=value").is_err());
}

#[test]
fn test_report_format_from_str() {
    assert_eq!(ReportFormat::from_str("text").unwrap(), ReportFormat::Text);
    assert_eq!(ReportFormat::from_str("JSON").unwrap(), ReportFormat::Json);
    assert_eq!(ReportFormat::from_str("graphviz").unwrap(), ReportFormat::Dot);
    assert!(ReportFormat::from_str("csv").is_err());
}

#[test]
fn test_load_config_default() {
    let config = load_config(None).unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
fn test_load_config_from_file() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    writeln!(temp_file, r#"{{"max_observations": 42, "cluster": {{"min_leaves": 3.0}}}}"#)?;

    let config = load_config(Some(temp_file.path()))?;

    assert_eq!(config.max_observations, 42);
    assert_eq!(config.cluster.min_leaves, 3.0);
    assert_eq!(config.patience, EngineConfig::default().patience);
    Ok(())
}

#[test]
fn test_load_config_missing_file() {
    let result = load_config(Some(Path::new("/nonexistent/statewalk.json")));
    assert!(result.is_err());
}

#[test]
fn test_load_config_invalid_json() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "not json").unwrap();
    assert!(load_config(Some(temp_file.path())).is_err());
}

#[test]
fn test_build_engine_config_overrides() {
    let matches = command_argument_builder().get_matches_from([
        "statewalk",
        "explore",
        "--url",
        "http://example.com/",
        "--max-steps",
        "25",
        "--seed",
        "9",
    ]);
    let (_, explore) = matches.subcommand().unwrap();
    let config = build_engine_config(explore).unwrap();
    assert_eq!(config.max_observations, 25);
    assert_eq!(config.seed, 9);
}

#[test]
fn test_repeated_params_are_collected() {
    let matches = command_argument_builder().get_matches_from([
        "statewalk",
        "explore",
        "-u",
        "http://example.com/",
        "-p",
        "user=alice",
        "-p",
        "pass=secret",
    ]);
    let (_, explore) = matches.subcommand().unwrap();
    let params: Vec<&String> = explore.get_many::<String>("param").unwrap().collect();
    assert_eq!(params.len(), 2);
}

#[test]
fn test_render_report_without_graph() {
    let history = single_page_history();
    let text = render_report("http://example.com/", None, &history, None, ReportFormat::Text).unwrap();
    assert!(text.contains("Observations: 1"));

    let json = render_report("http://example.com/", None, &history, None, ReportFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["entry"], "http://example.com/");

    let dot = render_report("http://example.com/", None, &history, None, ReportFormat::Dot).unwrap();
    assert!(dot.starts_with("digraph"));
}

#[test]
fn test_write_output_to_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let path = dir.path().join("model.json");

    write_output("{}", Some(path.as_path()))?;

    assert_eq!(std::fs::read_to_string(&path)?, "{}");
    Ok(())
}

#[test]
fn test_build_form_filler_uses_named_params() {
    use statewalk_scanner::{FieldTag, FieldType, Form, FormField, FormValues, Method};

    let form = Form {
        method: Method::Get,
        action: "http://example.com/search".to_string(),
        dompath: "/html/body/form".to_string(),
        inputs: vec![FormField::new(FieldTag::Input, FieldType::Text, "q", "")],
        hiddens: vec![],
        textareas: vec![],
        submitters: vec![FormField::new(FieldTag::Input, FieldType::Submit, "go", "Go")],
    };
    let mut filler = build_form_filler(1, &[("q".to_string(), "needle".to_string())]);
    let candidates = filler.candidates(&form);
    assert!(
        candidates
            .iter()
            .any(|p| p.values.get("q").is_some_and(|v| v.contains(&"needle".to_string())))
    );
}

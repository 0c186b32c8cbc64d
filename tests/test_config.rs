use std::collections::HashMap;
use std::path::PathBuf;

use devproxy::config::Config;
use devproxy::proxy::{PathMatch, RelayStrategy};

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_config_defaults() {
    let cfg = Config::from_lookup(env(&[])).unwrap();

    assert_eq!(cfg.listen_addr, "127.0.0.1:5173");
    assert_eq!(cfg.upstream, "http://localhost:5000");
    assert!(cfg.suppress_encoding);
    assert!(cfg.static_dir.is_none());

    let rules = cfg.forward_rules().unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].matcher, PathMatch::Prefix("/api".into()));
    assert_eq!(rules[0].strategy, RelayStrategy::Buffered);
    assert_eq!(rules[1].matcher, PathMatch::Exact("/test".into()));
    assert_eq!(rules[1].strategy, RelayStrategy::Streamed);
}

#[test]
fn test_config_env_overrides() {
    let cfg = Config::from_lookup(env(&[
        ("LISTEN", "0.0.0.0:3000"),
        ("UPSTREAM", "http://127.0.0.1:8081"),
        ("STATIC_DIR", "./dist"),
    ]))
    .unwrap();

    assert_eq!(cfg.listen_addr, "0.0.0.0:3000");
    assert_eq!(cfg.upstream().unwrap().authority(), "127.0.0.1:8081");
    assert_eq!(cfg.static_dir, Some(PathBuf::from("./dist")));
}

#[test]
fn test_config_rejects_bad_upstream() {
    assert!(Config::from_lookup(env(&[("UPSTREAM", "https://localhost:5000")])).is_err());
    assert!(Config::from_lookup(env(&[("UPSTREAM", "localhost")])).is_err());
}

#[test]
fn test_config_yaml() {
    let cfg = Config::from_yaml_str(
        r#"
listen_addr: "127.0.0.1:9000"
upstream: "http://localhost:7000"
suppress_encoding: false
request_timeout_ms: 1500
rules:
  - prefix: /graphql
    strategy: streamed
  - exact: /health
    strategy: buffered
"#,
    )
    .unwrap();

    assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
    assert!(!cfg.suppress_encoding);
    assert_eq!(cfg.request_timeout_ms, 1500);
    // Unset fields keep their defaults
    assert_eq!(cfg.connect_timeout_ms, 5_000);

    let rules = cfg.forward_rules().unwrap();
    assert_eq!(rules[0].matcher, PathMatch::Prefix("/graphql".into()));
    assert_eq!(rules[0].strategy, RelayStrategy::Streamed);
    assert_eq!(rules[1].matcher, PathMatch::Exact("/health".into()));
    assert_eq!(rules[1].upstream.port(), 7000);
}

#[test]
fn test_config_yaml_rejects_unknown_fields() {
    assert!(Config::from_yaml_str("listen: 127.0.0.1:80\n").is_err());
    assert!(Config::from_yaml_str("rules:\n  - prefix: /a\n    strategy: cached\n").is_err());
}

#[test]
fn test_config_rule_needs_one_matcher() {
    let cfg = Config::from_yaml_str(
        "rules:\n  - prefix: /a\n    exact: /a\n    strategy: buffered\n",
    )
    .unwrap();
    assert!(cfg.forward_rules().is_err());
}

#[test]
fn test_config_file_then_env() {
    let path = std::env::temp_dir().join(format!("devproxy-config-{}.yaml", std::process::id()));
    std::fs::write(&path, "listen_addr: \"127.0.0.1:9100\"\nconnect_timeout_ms: 250\n").unwrap();
    let path_str = path.to_string_lossy().to_string();

    let from_file = Config::from_lookup(env(&[("DEVPROXY_CONFIG", path_str.as_str())])).unwrap();
    assert_eq!(from_file.listen_addr, "127.0.0.1:9100");
    assert_eq!(from_file.connect_timeout_ms, 250);

    let overridden = Config::from_lookup(env(&[
        ("DEVPROXY_CONFIG", path_str.as_str()),
        ("LISTEN", "127.0.0.1:9200"),
    ]))
    .unwrap();
    assert_eq!(overridden.listen_addr, "127.0.0.1:9200");
    assert_eq!(overridden.connect_timeout_ms, 250);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_config_missing_file_is_an_error() {
    let cfg = Config::from_lookup(env(&[("DEVPROXY_CONFIG", "/nonexistent/devproxy.yaml")]));
    assert!(cfg.is_err());
}

#[test]
fn test_config_zero_timeout_is_rejected() {
    let path = std::env::temp_dir().join(format!("devproxy-zero-{}.yaml", std::process::id()));
    std::fs::write(&path, "request_timeout_ms: 0\n").unwrap();
    let path_str = path.to_string_lossy().to_string();

    let cfg = Config::from_lookup(env(&[("DEVPROXY_CONFIG", path_str.as_str())]));
    std::fs::remove_file(&path).unwrap();

    assert!(cfg.is_err());
}

#[test]
fn test_config_forwarder() {
    let cfg = Config::from_lookup(env(&[])).unwrap();
    assert_eq!(
        cfg.forwarder().request_timeout(),
        std::time::Duration::from_millis(30_000)
    );
}

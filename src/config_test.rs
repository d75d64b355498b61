use std::collections::HashMap;

use super::*;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn from_lookup_defaults() {
    let cfg = ClientConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
    assert_eq!(cfg.session_cookie, None);
    assert_eq!(cfg.timeouts, ClientTimeouts::default());
    assert_eq!(cfg.timeouts.request_secs, 60);
}

#[test]
fn from_lookup_parses_overrides() {
    let cfg = ClientConfig::from_lookup(lookup(&[
        ("CAMPUS_BASE_URL", "https://campus.example.test/api/"),
        ("CAMPUS_SESSION_COOKIE", "session_data=abc"),
        ("CAMPUS_REQUEST_TIMEOUT_SECS", "30"),
        ("CAMPUS_CONNECT_TIMEOUT_SECS", "5"),
        ("CAMPUS_STREAM_IDLE_TIMEOUT_SECS", "45"),
    ]))
    .unwrap();
    assert_eq!(cfg.base_url, "https://campus.example.test/api");
    assert_eq!(cfg.session_cookie.as_deref(), Some("session_data=abc"));
    assert_eq!(cfg.timeouts, ClientTimeouts { request_secs: 30, connect_secs: 5, stream_idle_secs: 45 });
}

#[test]
fn unparsable_or_zero_timeouts_fall_back_to_defaults() {
    let cfg = ClientConfig::from_lookup(lookup(&[
        ("CAMPUS_REQUEST_TIMEOUT_SECS", "soon"),
        ("CAMPUS_CONNECT_TIMEOUT_SECS", "0"),
    ]))
    .unwrap();
    assert_eq!(cfg.timeouts.request_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    assert_eq!(cfg.timeouts.connect_secs, DEFAULT_CONNECT_TIMEOUT_SECS);
}

#[test]
fn blank_cookie_is_ignored() {
    let cfg = ClientConfig::from_lookup(lookup(&[("CAMPUS_SESSION_COOKIE", "  ")])).unwrap();
    assert_eq!(cfg.session_cookie, None);
}

#[test]
fn non_http_base_url_errors() {
    let err = ClientConfig::from_lookup(lookup(&[("CAMPUS_BASE_URL", "ftp://host")])).unwrap_err();
    assert!(err.to_string().contains("invalid base URL"));
    assert!(ClientConfig::new("http://").is_err());
}

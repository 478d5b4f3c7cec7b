use super::*;

#[test]
fn http_base_maps_to_ws() {
    let url = ws_endpoint("http://localhost:8080", COMPLETIONS_PATH).expect("url");
    assert_eq!(url, "ws://localhost:8080/ws/completions");
}

#[test]
fn https_base_maps_to_wss_and_trims_slashes() {
    let url = ws_endpoint("https://chat.example.com/", "/ws/completions").expect("url");
    assert_eq!(url, "wss://chat.example.com/ws/completions");
}

#[test]
fn ws_base_is_kept() {
    let url = ws_endpoint("ws://127.0.0.1:9000", "ws/completions").expect("url");
    assert_eq!(url, "ws://127.0.0.1:9000/ws/completions");
}

#[test]
fn unknown_scheme_is_rejected() {
    let err = ws_endpoint("ftp://host", COMPLETIONS_PATH).expect_err("scheme should fail");
    assert!(matches!(err, ConfigError::InvalidBaseUrl(ref url) if url == "ftp://host"));
}

#[test]
fn empty_host_is_rejected() {
    assert!(ws_endpoint("http://", COMPLETIONS_PATH).is_err());
}

#[test]
fn defaults_are_one_second() {
    let config = ChannelConfig::new("ws://x/ws/completions");
    assert_eq!(config.reconnect_interval, Duration::from_secs(1));
    assert_eq!(config.ping_interval, Duration::from_secs(1));
}

#[test]
fn builders_override_intervals() {
    let config = ChannelConfig::resolve(DEFAULT_BASE_URL, COMPLETIONS_PATH)
        .expect("config")
        .with_reconnect_interval(Duration::from_millis(20))
        .with_ping_interval(Duration::from_millis(30));
    assert_eq!(config.endpoint, "ws://127.0.0.1:8080/ws/completions");
    assert_eq!(config.reconnect_interval, Duration::from_millis(20));
    assert_eq!(config.ping_interval, Duration::from_millis(30));
}

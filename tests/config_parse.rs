use docrelay::config::Config;

#[test]
fn parse_example_config() {
    let raw = include_str!("../docrelay.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert!(!cfg.ledger.path.is_empty());
    assert!(cfg.ledger.busy_timeout_ms > 0);
    assert_eq!(cfg.collaborators.scanner.timeout_seconds, 120);
    assert_eq!(
        cfg.collaborators.scanner.env.get("SCAN_ENVIRONMENT").map(String::as_str),
        Some("production")
    );
    assert!(cfg.collaborators.notifier.args.is_empty());
    assert_eq!(cfg.scan.accepted_mime_types, vec!["application/pdf".to_string()]);
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let cfg: Config = toml::from_str(
        r#"
        [ledger]
        path = "x.sqlite3"
        busy_timeout_ms = 100

        [collaborators.notifier]
        program = "notify-bin"
        "#,
    )
    .expect("parse TOML");
    assert_eq!(cfg.ledger.path, "x.sqlite3");
    assert_eq!(cfg.collaborators.notifier.program, "notify-bin");
    assert_eq!(cfg.collaborators.notifier.timeout_seconds, 60);
    assert_eq!(cfg.collaborators.scanner.program, "scripts/scan_submit");
    assert_eq!(cfg.retention.stale_submission_seconds, 3_600);
    assert!(!cfg.messages.submission_failed.is_empty());
}

#[test]
fn effective_config_round_trips_through_toml() {
    let cfg = Config::default();
    let raw = toml::to_string(&cfg).expect("serialize");
    let back: Config = toml::from_str(&raw).expect("parse");
    assert_eq!(back.delivery.report_filename, cfg.delivery.report_filename);
}

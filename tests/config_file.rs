use traffic_fusion::{Config, DecisionEngine};

#[test]
fn example_config_matches_defaults() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("traffic.example.toml");
    let config = Config::from_file(&path).unwrap();
    assert_eq!(config, Config::default());
    assert!(config.validate().is_ok());

    let engine = DecisionEngine::from_config(&config).unwrap();
    assert_eq!(engine.timing().green_min(), 10);
    assert_eq!(engine.timing().green_max(), 45);
    assert_eq!(engine.max_vehicles(), 20);
}

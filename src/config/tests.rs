use super::yaml::apply_env_overrides;
use super::*;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8000);
    assert_eq!(config.venice.text_model, "deepseek-r1-671b");
    assert_eq!(config.venice.request_timeout(), Duration::from_secs(180));
    assert_eq!(config.rate_limit.base_delay(), Duration::from_secs(10));
    assert_eq!(config.rate_limit.spacing(), Duration::from_secs(5));
    assert_eq!(config.rate_limit.retry_delay(), Duration::from_secs(5));
    assert_eq!(config.rate_limit.max_attempts, 3);
    assert_eq!(config.game.max_history_turns, None);
}

#[test]
fn test_partial_yaml_keeps_defaults() {
    let yaml = r#"
server:
  port: 9100
rate_limit:
  spacing_ms: 250
game:
  max_history_turns: 40
"#;
    let config = parse_config(yaml).unwrap();
    assert_eq!(config.server.port, 9100);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.rate_limit.spacing_ms, 250);
    assert_eq!(config.rate_limit.base_delay_ms, 10_000);
    assert_eq!(config.game.max_history_turns, Some(40));
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_empty_yaml_is_default() {
    assert_eq!(parse_config("  \n").unwrap(), Config::default());
}

#[test]
fn test_invalid_yaml_reports_path() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("questcast.yaml");
    std::fs::write(&path, "server: [not, a, map").unwrap();

    let err = load_config(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("questcast.yaml"));
}

#[test]
fn test_missing_file_uses_defaults() {
    let temp = TempDir::new().unwrap();
    let config = load_config(&temp.path().join("absent.yaml")).unwrap();
    assert_eq!(config.server, ServerConfig::default());
}

#[test]
fn test_env_override() {
    let mut config = Config::default();
    config.venice.api_key = "from-file".to_string();

    apply_env_overrides(&mut config, Some("   ".to_string()));
    assert_eq!(config.venice.api_key, "from-file");

    apply_env_overrides(&mut config, Some("from-env".to_string()));
    assert_eq!(config.venice.api_key, "from-env");
}

#[tokio::test]
async fn test_load_game_assets() {
    let temp = TempDir::new().unwrap();
    let instructions = temp.path().join("gameInstructions.txt");
    let state = temp.path().join("initialGameState.txt");
    std::fs::write(&instructions, "You are the narrator.").unwrap();
    std::fs::write(&state, "{\"hp\":10}").unwrap();

    let game = GameConfig {
        instructions_path: instructions,
        initial_game_state_path: state,
        ..GameConfig::default()
    };
    let assets = load_game_assets(&game).await.unwrap();
    assert_eq!(assets.instructions, "You are the narrator.");
    assert_eq!(assets.initial_game_state, "{\"hp\":10}");
}

#[tokio::test]
async fn test_missing_asset_is_error() {
    let temp = TempDir::new().unwrap();
    let game = GameConfig {
        instructions_path: temp.path().join("missing.txt"),
        ..GameConfig::default()
    };
    let err = load_game_assets(&game).await.unwrap_err();
    assert!(matches!(err, ConfigError::Asset { .. }));
}

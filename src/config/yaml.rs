//! YAML 配置加载

use super::types::{Config, GameAssets, GameConfig};
use std::path::{Path, PathBuf};

/// 覆盖 API 密钥的环境变量
pub const API_KEY_ENV: &str = "VENICE_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("读取配置文件失败 {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("解析配置文件失败 {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("加载游戏资源失败 {path}: {source}")]
    Asset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 加载配置文件
///
/// 文件不存在时使用默认配置；环境变量中的 API 密钥覆盖文件中的值。
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        parse_config(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        tracing::info!("[CONFIG] 配置文件不存在，使用默认配置: {:?}", path);
        Config::default()
    };

    apply_env_overrides(&mut config, std::env::var(API_KEY_ENV).ok());
    Ok(config)
}

/// 从 YAML 文本解析配置，缺失字段取默认值
pub fn parse_config(content: &str) -> Result<Config, serde_yaml::Error> {
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(content)
}

pub(crate) fn apply_env_overrides(config: &mut Config, api_key: Option<String>) {
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        config.venice.api_key = key;
    }
}

/// 读取指令文本和初始游戏状态
pub async fn load_game_assets(game: &GameConfig) -> Result<GameAssets, ConfigError> {
    let instructions = read_asset(&game.instructions_path).await?;
    let initial_game_state = read_asset(&game.initial_game_state_path).await?;

    tracing::info!(
        "[CONFIG] 游戏资源加载完成: instructions={} chars, initial_game_state={} chars",
        instructions.chars().count(),
        initial_game_state.chars().count()
    );

    Ok(GameAssets {
        instructions,
        initial_game_state,
    })
}

async fn read_asset(path: &Path) -> Result<String, ConfigError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Asset {
            path: path.to_path_buf(),
            source,
        })
}

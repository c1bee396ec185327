//! 配置管理模块
//!
//! 提供 YAML 配置文件加载、环境变量覆盖和启动时游戏资源读取

mod types;
mod yaml;

pub use types::{
    Config, GameAssets, GameConfig, LoggingConfig, RateLimitSettings, ServerConfig,
    VeniceConfig,
};
pub use yaml::{load_config, load_game_assets, parse_config, ConfigError, API_KEY_ENV};

#[cfg(test)]
mod tests;

//! 应用配置和持久化
//!
//! 提供冷却时长、默认文件、日志级别等设置的存储和读取。

use crate::logging::LogLevel;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// 冷却时长上限
pub const MAX_RECHARGE: Duration = Duration::from_millis(3500);

/// 默认冷却时长
pub const DEFAULT_RECHARGE: Duration = Duration::from_millis(500);

/// 把冷却时长截断到 `0..=MAX_RECHARGE`
pub fn clamp_recharge(recharge: Duration) -> Duration {
    recharge.min(MAX_RECHARGE)
}

/// 应用设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrollSettings {
    /// 两次发送之间的冷却时长（秒）
    pub recharge_secs: f64,
    /// 要发送的文件，未设置时由调用方决定
    pub payload: Option<PathBuf>,
    /// 日志级别
    pub log_level: LogLevel,
    /// 详细日志模式
    pub verbose: bool,
}

impl Default for TrollSettings {
    fn default() -> Self {
        Self {
            recharge_secs: DEFAULT_RECHARGE.as_secs_f64(),
            payload: None,
            log_level: LogLevel::Info,
            verbose: false,
        }
    }
}

impl TrollSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("trolldrop");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        let path = Self::config_path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 截断后的冷却时长；负数、NaN 按 0 处理
    pub fn recharge_duration(&self) -> Duration {
        let secs = if self.recharge_secs.is_finite() {
            self.recharge_secs.clamp(0.0, MAX_RECHARGE.as_secs_f64())
        } else {
            0.0
        };
        Duration::from_secs_f64(secs)
    }
}

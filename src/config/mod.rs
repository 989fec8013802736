// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传准入配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 传输模拟配置
    #[serde(default)]
    pub simulator: SimulatorConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

/// 上传准入配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadConfig {
    /// 最多可容纳的文件数
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// 单个文件最大字节数
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
}

fn default_max_files() -> usize {
    6
}

fn default_max_size_bytes() -> u64 {
    5 * 1024 * 1024 // 5MB
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

impl UploadConfig {
    pub fn new(max_files: usize, max_size_bytes: u64) -> Self {
        Self {
            max_files,
            max_size_bytes,
        }
    }
}

/// 传输模拟配置
///
/// 每一步推进一个随机大小的分片，步与步之间等待随机时长，
/// 并以一定概率额外停顿（模拟网络抖动）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatorConfig {
    /// 第一步之前的等待（毫秒）
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// 分片最小字节数
    #[serde(default = "default_min_chunk_bytes")]
    pub min_chunk_bytes: u64,
    /// 分片最大字节数（含）
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: u64,
    /// 步间最小等待（毫秒）
    #[serde(default = "default_min_step_delay_ms")]
    pub min_step_delay_ms: u64,
    /// 步间最大等待（毫秒，含）
    #[serde(default = "default_max_step_delay_ms")]
    pub max_step_delay_ms: u64,
    /// 额外停顿的概率 [0, 1]
    #[serde(default = "default_stall_probability")]
    pub stall_probability: f64,
    /// 额外停顿时长（毫秒）
    #[serde(default = "default_stall_delay_ms")]
    pub stall_delay_ms: u64,
    /// 随机数种子，设置后每个传输的步进序列可复现
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_initial_delay_ms() -> u64 {
    100
}
fn default_min_chunk_bytes() -> u64 {
    2_000
}
fn default_max_chunk_bytes() -> u64 {
    301_999
}
fn default_min_step_delay_ms() -> u64 {
    50
}
fn default_max_step_delay_ms() -> u64 {
    499
}
fn default_stall_probability() -> f64 {
    0.05
}
fn default_stall_delay_ms() -> u64 {
    500
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            min_chunk_bytes: default_min_chunk_bytes(),
            max_chunk_bytes: default_max_chunk_bytes(),
            min_step_delay_ms: default_min_step_delay_ms(),
            max_step_delay_ms: default_max_step_delay_ms(),
            stall_probability: default_stall_probability(),
            stall_delay_ms: default_stall_delay_ms(),
            seed: None,
        }
    }
}

impl SimulatorConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn stall_delay(&self) -> Duration {
        Duration::from_millis(self.stall_delay_ms)
    }

    /// 校验参数范围
    pub fn validate(&self) -> Result<()> {
        if self.min_chunk_bytes == 0 {
            anyhow::bail!("min_chunk_bytes 必须大于 0，否则传输可能永远无法完成");
        }
        if self.min_chunk_bytes > self.max_chunk_bytes {
            anyhow::bail!(
                "分片范围无效: min_chunk_bytes={} > max_chunk_bytes={}",
                self.min_chunk_bytes,
                self.max_chunk_bytes
            );
        }
        if self.min_step_delay_ms > self.max_step_delay_ms {
            anyhow::bail!(
                "步间等待范围无效: min_step_delay_ms={} > max_step_delay_ms={}",
                self.min_step_delay_ms,
                self.max_step_delay_ms
            );
        }
        if !(0.0..=1.0).contains(&self.stall_probability) {
            anyhow::bail!(
                "stall_probability 必须在 [0, 1] 范围内，当前值: {}",
                self.stall_probability
            );
        }
        Ok(())
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {:?}", path))?;

        let config: AppConfig = toml::from_str(&content).context("解析配置文件失败")?;

        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 加载配置，文件不存在时使用默认配置
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load_from_file(path).await
        } else {
            tracing::info!("配置文件不存在，使用默认配置: {:?}", path);
            Ok(Self::default())
        }
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.validate().context("保存配置失败：配置校验失败")?;

        let content = toml::to_string_pretty(self).context("序列化配置失败")?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("创建配置目录失败: {:?}", parent))?;
            }
        }

        fs::write(path, content)
            .await
            .with_context(|| format!("写入配置文件失败: {:?}", path))?;

        tracing::info!("配置已保存: {:?}", path);
        Ok(())
    }

    /// 校验整体配置
    pub fn validate(&self) -> Result<()> {
        if self.upload.max_files == 0 {
            anyhow::bail!("upload.max_files 必须大于 0");
        }
        if self.upload.max_size_bytes == 0 {
            anyhow::bail!("upload.max_size_bytes 必须大于 0");
        }
        self.simulator.validate()?;
        Ok(())
    }
}

//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__ENGINE__RETRY_LIMIT=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub retrieval: RetrievalSection,
}

/// [app] 段：应用名与工作目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 遥测与学习数据的根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
}

/// [engine] 段：资源边界、重试与审批等待
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_iterations: Option<u64>,
    pub max_depth: Option<u32>,
    pub cost_limit: Option<f64>,
    pub time_limit_secs: Option<u64>,
    pub token_limit: Option<u64>,
    /// 无进度升级窗口（秒）
    pub no_progress_timeout_secs: u64,
    pub retry_limit: u32,
    /// 重试退避基数（毫秒），按 2^n 指数放大
    pub retry_backoff_ms: u64,
    pub approval_timeout_secs: u64,
    pub enable_dry_runs: bool,
    /// 每 n 步输出一次进度摘要
    pub summary_every_n: Option<usize>,
    /// 允许的工具权限标签
    pub tool_permissions: Vec<String>,
    /// 计划步数超过该值即判定过难并分解
    pub decompose_above_steps: usize,
    /// 单步预估成本超过该值触发人工审批
    pub cost_escalation_threshold: f64,
    /// 单步置信度低于该值触发人工审批
    pub min_confidence: f64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_iterations: Some(100),
            max_depth: Some(5),
            cost_limit: None,
            time_limit_secs: None,
            token_limit: None,
            no_progress_timeout_secs: 1800,
            retry_limit: 3,
            retry_backoff_ms: 1000,
            approval_timeout_secs: 300,
            enable_dry_runs: true,
            summary_every_n: None,
            tool_permissions: Vec::new(),
            decompose_above_steps: 10,
            cost_escalation_threshold: 10.0,
            min_confidence: 0.3,
        }
    }
}

/// [telemetry] 段：遥测与学习存储
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    pub enabled: bool,
    /// 遥测事件 JSONL 目录（相对 workspace_root）
    pub telemetry_dir: PathBuf,
    /// 学习库目录（相对 workspace_root）
    pub learning_dir: PathBuf,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            enabled: true,
            telemetry_dir: PathBuf::from("data/telemetry"),
            learning_dir: PathBuf::from("data/learning"),
        }
    }
}

/// [retrieval] 段：研究数据的新鲜度与来源校验
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    /// 数据超过该秒数视为过期
    pub max_age_secs: u64,
    /// 是否要求可信来源
    pub require_trusted: bool,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            max_age_secs: 86400,
            require_trusted: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            engine: EngineSection::default(),
            telemetry: TelemetrySection::default(),
            retrieval: RetrievalSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.retry_limit, 3);
        assert_eq!(cfg.engine.decompose_above_steps, 10);
        assert!(cfg.engine.enable_dry_runs);
        assert!(cfg.telemetry.enabled);
    }
}

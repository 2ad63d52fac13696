//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ARNAV__*` 覆盖（双下划线表示嵌套，如 `ARNAV__RELOCALIZATION__TRACKING_TIMEOUT_SECS=45`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub relocalization: RelocalizationSection,
    pub recorder: RecorderSection,
}

/// [app] 段：数据目录、映射文件名、路线文件、当前路线
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 映射文件所在目录，未设置时用 ./data
    pub data_dir: PathBuf,
    pub mapping_file_name: String,
    /// 路线勘测 JSON；未设置时使用内置 A / B 路线
    pub routes_file: Option<PathBuf>,
    /// "A" 或 "B"
    pub active_route: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            mapping_file_name: "anchor_mapping.json".to_string(),
            routes_file: None,
            active_route: "A".to_string(),
        }
    }
}

impl AppSection {
    pub fn mapping_path(&self) -> PathBuf {
        self.data_dir.join(&self.mapping_file_name)
    }
}

/// [relocalization] 段：超时、轮询间隔、后台补救间隔（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelocalizationSection {
    pub tracking_timeout_secs: f32,
    pub poll_interval_secs: f32,
    pub reanchor_interval_secs: f32,
    /// 同时进行的 load_anchor 请求上限
    pub max_concurrent_loads: usize,
    /// 事件通道容量（慢订阅者超出后丢弃旧事件）
    pub event_capacity: usize,
    /// 低于此成功率时建议重试而不是直接以备用坐标继续
    pub min_success_rate: f32,
}

impl Default for RelocalizationSection {
    fn default() -> Self {
        Self {
            tracking_timeout_secs: 30.0,
            poll_interval_secs: 0.5,
            reanchor_interval_secs: 5.0,
            max_concurrent_loads: 8,
            event_capacity: 256,
            min_success_rate: 0.5,
        }
    }
}

/// [recorder] 段：建图阶段参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderSection {
    /// 创建锚点后等待平台稳定的时间（秒）
    pub settle_delay_secs: f32,
    /// 映射文件 / 路线文件中缺失或非法的到达半径（米）替换为此值
    pub default_radius: f32,
}

impl Default for RecorderSection {
    fn default() -> Self {
        Self {
            settle_delay_secs: 0.5,
            default_radius: 2.0,
        }
    }
}

/// 从 config 目录加载配置，环境变量 ARNAV__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ARNAV__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("ARNAV")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

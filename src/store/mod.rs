//! 锚点映射存储：路点 ID → 锚点句柄（按路线 A / B）
//!
//! 文件格式为带缩进的 JSON（便于 diff）；每次保存整体重写，先写临时文件再 rename。
//! 文件 I/O 只发生在 load / save / flush，upsert / remove 仅修改内存。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

use crate::anchor::AnchorHandle;
use crate::core::AnchorError;

/// 非法半径在加载时替换为此默认值（可由 `[recorder] default_radius` 覆盖）
pub const DEFAULT_RADIUS: f32 = 2.0;

/// 配置给出的默认半径非法时退回 DEFAULT_RADIUS
pub fn valid_default_radius(radius: f32) -> f32 {
    if radius.is_finite() && radius > 0.0 {
        radius
    } else {
        tracing::warn!(radius, "Invalid default radius, using {}", DEFAULT_RADIUS);
        DEFAULT_RADIUS
    }
}

/// 路线标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteId {
    A,
    B,
}

impl RouteId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteId::A => "A",
            RouteId::B => "B",
        }
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteId {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(RouteId::A),
            "B" | "b" => Ok(RouteId::B),
            other => Err(AnchorError::InvalidRoute(other.to_string())),
        }
    }
}

/// 单个路点的锚点映射
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorMapping {
    pub waypoint_id: String,
    pub anchor_handle: AnchorHandle,
    pub radius: f32,
    pub location_name: String,
}

/// 一条路线的全部映射（插入顺序，不一定是路径顺序）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMappingData {
    pub route_id: RouteId,
    #[serde(default)]
    pub waypoints: Vec<AnchorMapping>,
}

impl RouteMappingData {
    pub fn new(route_id: RouteId) -> Self {
        Self {
            route_id,
            waypoints: Vec::new(),
        }
    }

    /// 同 ID 覆盖：先删除旧条目再追加
    pub fn upsert(&mut self, mapping: AnchorMapping) {
        self.waypoints.retain(|m| m.waypoint_id != mapping.waypoint_id);
        self.waypoints.push(mapping);
    }

    pub fn remove(&mut self, waypoint_id: &str) -> bool {
        let before = self.waypoints.len();
        self.waypoints.retain(|m| m.waypoint_id != waypoint_id);
        self.waypoints.len() != before
    }

    pub fn find(&self, waypoint_id: &str) -> Option<&AnchorMapping> {
        self.waypoints.iter().find(|m| m.waypoint_id == waypoint_id)
    }

    /// 重复 ID 保留最后一条；半径非正时替换为默认值。返回修正的条目数。
    fn sanitize(&mut self, default_radius: f32) -> usize {
        let mut fixed = 0;
        let mut kept: Vec<AnchorMapping> = Vec::with_capacity(self.waypoints.len());
        for mut m in self.waypoints.drain(..) {
            if m.radius.is_nan() || m.radius <= 0.0 {
                m.radius = default_radius;
                fixed += 1;
            }
            if let Some(pos) = kept.iter().position(|k| k.waypoint_id == m.waypoint_id) {
                kept.remove(pos);
                fixed += 1;
            }
            kept.push(m);
        }
        self.waypoints = kept;
        fixed
    }
}

/// 持久化文件的根对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingFile {
    pub created_at: String,
    pub route_a: RouteMappingData,
    pub route_b: RouteMappingData,
}

impl MappingFile {
    /// 新建空记录，created_at 取当前本地时间
    pub fn empty() -> Self {
        Self {
            created_at: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            route_a: RouteMappingData::new(RouteId::A),
            route_b: RouteMappingData::new(RouteId::B),
        }
    }

    pub fn route(&self, route_id: RouteId) -> &RouteMappingData {
        match route_id {
            RouteId::A => &self.route_a,
            RouteId::B => &self.route_b,
        }
    }

    pub fn route_mut(&mut self, route_id: RouteId) -> &mut RouteMappingData {
        match route_id {
            RouteId::A => &mut self.route_a,
            RouteId::B => &mut self.route_b,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.route_a.waypoints.is_empty() && self.route_b.waypoints.is_empty()
    }

    pub fn to_json(&self) -> Result<String, AnchorError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// 解析并修正；解析失败返回 StoreCorrupt
    pub fn from_json(json: &str) -> Result<Self, AnchorError> {
        Self::from_json_with_radius(json, DEFAULT_RADIUS)
    }

    /// 同 from_json，非法半径替换为 default_radius
    pub fn from_json_with_radius(json: &str, default_radius: f32) -> Result<Self, AnchorError> {
        let mut file: MappingFile =
            serde_json::from_str(json).map_err(|e| AnchorError::StoreCorrupt(e.to_string()))?;
        // 路线对象与字段位置不一致时以字段位置为准
        file.route_a.route_id = RouteId::A;
        file.route_b.route_id = RouteId::B;
        let fixed = file.route_a.sanitize(default_radius) + file.route_b.sanitize(default_radius);
        if fixed > 0 {
            tracing::warn!(fixed, "Mapping file contained duplicate or invalid entries");
        }
        Ok(file)
    }
}

/// 映射存储：内存副本 + 单写者文件锁
pub struct MappingStore {
    path: PathBuf,
    default_radius: f32,
    data: RwLock<Option<MappingFile>>,
    write_lock: Mutex<()>,
}

impl MappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default_radius: DEFAULT_RADIUS,
            data: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// 加载时替换非法半径所用的默认值
    pub fn with_default_radius(mut self, radius: f32) -> Self {
        self.default_radius = valid_default_radius(radius);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取映射文件；文件不存在或损坏时得到空记录（不报错）
    pub async fn load(&self) -> MappingFile {
        let file = match fs::read_to_string(&self.path).await {
            Ok(json) => match MappingFile::from_json_with_radius(&json, self.default_radius) {
                Ok(file) => {
                    tracing::info!(
                        route_a = file.route_a.waypoints.len(),
                        route_b = file.route_b.waypoints.len(),
                        "Mapping file loaded: {:?}",
                        self.path
                    );
                    file
                }
                Err(e) => {
                    tracing::warn!("{} ({:?}), starting from an empty mapping", e, self.path);
                    MappingFile::empty()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No mapping file at {:?}, a new one will be created", self.path);
                MappingFile::empty()
            }
            Err(e) => {
                tracing::warn!("Mapping file unreadable ({}), starting from an empty mapping", e);
                MappingFile::empty()
            }
        };
        *self.data.write().await = Some(file.clone());
        file
    }

    /// 整体覆盖写入并替换内存副本；并发保存按顺序串行
    pub async fn save(&self, file: MappingFile) -> Result<(), AnchorError> {
        let _guard = self.write_lock.lock().await;
        self.write_file(&file).await?;
        *self.data.write().await = Some(file);
        Ok(())
    }

    /// 将当前内存副本写回文件（未初始化时先建空记录）
    pub async fn flush(&self) -> Result<(), AnchorError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = {
            let mut data = self.data.write().await;
            data.get_or_insert_with(MappingFile::empty).clone()
        };
        self.write_file(&snapshot).await
    }

    async fn write_file(&self, file: &MappingFile) -> Result<(), AnchorError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let json = file.to_json()?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, &self.path).await?;
        tracing::debug!("Mapping file saved: {:?}", self.path);
        Ok(())
    }

    /// 插入或覆盖（同路线同 waypoint_id 只保留最新一条）
    pub async fn upsert(&self, route_id: RouteId, mapping: AnchorMapping) {
        let mut data = self.data.write().await;
        data.get_or_insert_with(MappingFile::empty)
            .route_mut(route_id)
            .upsert(mapping);
    }

    pub async fn remove(&self, route_id: RouteId, waypoint_id: &str) -> bool {
        let mut data = self.data.write().await;
        match data.as_mut() {
            Some(file) => file.route_mut(route_id).remove(waypoint_id),
            None => false,
        }
    }

    /// 指定路线的映射；存储未初始化时返回空列表
    pub async fn mappings_for(&self, route_id: RouteId) -> Vec<AnchorMapping> {
        self.data
            .read()
            .await
            .as_ref()
            .map(|f| f.route(route_id).waypoints.clone())
            .unwrap_or_default()
    }

    pub async fn find(&self, route_id: RouteId, waypoint_id: &str) -> Option<AnchorMapping> {
        self.data
            .read()
            .await
            .as_ref()
            .and_then(|f| f.route(route_id).find(waypoint_id).cloned())
    }

    pub async fn has_mapping_data(&self) -> bool {
        self.data
            .read()
            .await
            .as_ref()
            .is_some_and(|f| !f.is_empty())
    }

    /// 当前内存副本
    pub async fn snapshot(&self) -> Option<MappingFile> {
        self.data.read().await.clone()
    }
}

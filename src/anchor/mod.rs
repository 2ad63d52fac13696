//! 锚点能力层：平台 AR 子系统的抽象
//!
//! 核心引擎只通过 [`AnchorAdapter`] 访问锚点的创建 / 加载 / 追踪 / 删除，不关心底层 SLAM 实现。
//! 实时位姿通过 [`TransformRef`] 以非拥有（Weak）方式引用，查询时可能返回「暂不可用」。

pub mod simulated;
pub mod transforms;

use std::fmt;
use std::sync::Weak;

use async_trait::async_trait;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

pub use simulated::{SimulatedAdapter, SimulatedAnchor};
pub use transforms::TransformTable;

/// 世界坐标系下的三维位置（米）
pub type Vec3 = Vector3<f32>;

/// 平台持久化锚点句柄（不透明字符串，如 GUID）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorHandle(pub String);

impl AnchorHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AnchorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 本次会话内的可追踪对象 ID（由 load_anchor 返回，跨会话无意义）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackableId(pub String);

impl fmt::Display for TrackableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 位姿：位置 + 朝向
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: UnitQuaternion<f32>,
}

impl Pose {
    pub fn new(position: Vec3, rotation: UnitQuaternion<f32>) -> Self {
        Self { position, rotation }
    }

    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }
}

/// 新锚点的建图质量估计
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AnchorQuality {
    Insufficient,
    Sufficient,
    Good,
}

impl AnchorQuality {
    /// 是否允许在当前位姿创建锚点
    pub fn is_sufficient(self) -> bool {
        self >= AnchorQuality::Sufficient
    }
}

/// 锚点追踪状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    NotTracking,
    Tracking,
}

/// 实时位姿来源（通常是平台的场景图）；对象可能随时失效
pub trait PoseSource: Send + Sync {
    fn pose_of(&self, trackable: &TrackableId) -> Option<Pose>;
}

/// 指向外部场景图中某个锚点变换的非拥有引用
#[derive(Clone)]
pub struct TransformRef {
    trackable: TrackableId,
    source: Weak<dyn PoseSource>,
}

impl TransformRef {
    pub fn new(trackable: TrackableId, source: Weak<dyn PoseSource>) -> Self {
        Self { trackable, source }
    }

    pub fn trackable(&self) -> &TrackableId {
        &self.trackable
    }

    /// 当前位姿；来源已释放或对象不再存在时返回 None
    pub fn pose(&self) -> Option<Pose> {
        self.source.upgrade()?.pose_of(&self.trackable)
    }

    pub fn position(&self) -> Option<Vec3> {
        self.pose().map(|p| p.position)
    }
}

impl fmt::Debug for TransformRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRef")
            .field("trackable", &self.trackable)
            .field("position", &self.position())
            .finish()
    }
}

/// 平台锚点能力（XREAL / ARCore 等实现；测试用 SimulatedAdapter）
#[async_trait]
pub trait AnchorAdapter: Send + Sync {
    /// 平台 AR 子系统是否就绪；不就绪时整批重定位无法进行
    fn is_available(&self) -> bool {
        true
    }

    /// 估计在给定位姿创建锚点的质量
    async fn quality_estimate(&self, pose: &Pose) -> AnchorQuality;

    /// 在给定位姿创建并持久化锚点，返回句柄
    async fn create_anchor(&self, pose: &Pose) -> Result<AnchorHandle, String>;

    /// 按句柄加载持久化锚点，返回本会话的 TrackableId
    async fn load_anchor(&self, handle: &AnchorHandle) -> Result<TrackableId, String>;

    async fn poll_tracking_state(&self, trackable: &TrackableId) -> TrackingState;

    async fn erase_anchor(&self, handle: &AnchorHandle) -> Result<(), String>;

    /// 获取可追踪对象的实时变换引用
    fn live_transform(&self, trackable: &TrackableId) -> TransformRef;
}

//! 对外事件：导航 / UI 层唯一可依赖的观察面
//!
//! 所有事件经同一个 broadcast 通道按发送顺序投递；每次状态迁移最多发送一次。

use tokio::sync::broadcast;

use crate::anchor::{TransformRef, Vec3};
use crate::reloc::{RelocState, RelocSummary};
use crate::store::RouteId;

#[derive(Debug, Clone)]
pub enum AnchorEvent {
    /// 单个锚点分类进度
    Progress {
        waypoint_id: String,
        state: RelocState,
        successful: usize,
        timed_out: usize,
        total: usize,
    },
    /// 整批完成（每次 start_batch 恰好一次）
    BatchComplete { rate: f32, summary: RelocSummary },
    /// 后台补救成功：超时锚点重新进入追踪
    LateRecovered {
        waypoint_id: String,
        transform: TransformRef,
    },
    /// 路点未绑定锚点，使用静态备用坐标（审计用）
    FallbackUsed {
        route_id: RouteId,
        waypoint_id: String,
        fallback: Vec3,
    },
    /// 晚到的锚点改变了路点位置
    LateBind {
        waypoint_id: String,
        drift: f32,
        old_position: Vec3,
        new_position: Vec3,
    },
    /// 建图阶段锚点创建结果
    CreationResult { waypoint_id: String, success: bool },
}

/// 事件总线（克隆共享同一发送端）
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AnchorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnchorEvent> {
        self.tx.subscribe()
    }

    /// 无订阅者时静默丢弃
    pub fn emit(&self, event: AnchorEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

//! 路点 → 实时锚点变换表
//!
//! 由重定位协调器写入（初次追踪成功 / 后台补救成功），Binder 只读查询，Recorder 删除锚点时移除。

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{TransformRef, Vec3};

/// 共享变换表（克隆即共享同一份数据）
#[derive(Clone, Default)]
pub struct TransformTable {
    inner: Arc<RwLock<HashMap<String, TransformRef>>>,
}

impl TransformTable {
    pub fn new() -> Self {
        Self::default()
    }

    // 持锁期间不会 panic，中毒时直接取回数据
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TransformRef>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TransformRef>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, waypoint_id: &str) -> Option<TransformRef> {
        self.read().get(waypoint_id).cloned()
    }

    /// 锚点当前位置；无变换或变换暂不可用时返回 None
    pub fn position(&self, waypoint_id: &str) -> Option<Vec3> {
        self.get(waypoint_id).and_then(|t| t.position())
    }

    pub fn insert(&self, waypoint_id: &str, transform: TransformRef) {
        self.write().insert(waypoint_id.to_string(), transform);
    }

    pub fn remove(&self, waypoint_id: &str) -> Option<TransformRef> {
        self.write().remove(waypoint_id)
    }

    pub fn contains(&self, waypoint_id: &str) -> bool {
        self.read().contains_key(waypoint_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

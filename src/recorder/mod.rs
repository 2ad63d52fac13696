//! 建图阶段：在当前位姿创建锚点并写入映射存储
//!
//! 流程：质量检查 → create_anchor → 等待平台稳定 → upsert + flush → CreationResult 事件。
//! 质量不足时在调用 create_anchor 之前即拒绝。

use std::sync::Arc;
use std::time::Duration;

use crate::anchor::{AnchorAdapter, AnchorQuality, Pose, TransformTable};
use crate::config::RecorderSection;
use crate::core::AnchorError;
use crate::events::{AnchorEvent, EventBus};
use crate::store::{AnchorMapping, MappingStore, RouteId};

pub struct AnchorRecorder {
    adapter: Arc<dyn AnchorAdapter>,
    store: Arc<MappingStore>,
    transforms: TransformTable,
    events: EventBus,
    settle_delay: Duration,
}

impl AnchorRecorder {
    pub fn new(
        adapter: Arc<dyn AnchorAdapter>,
        store: Arc<MappingStore>,
        transforms: TransformTable,
        events: EventBus,
        settle_delay: Duration,
    ) -> Self {
        Self {
            adapter,
            store,
            transforms,
            events,
            settle_delay,
        }
    }

    pub fn from_config(
        adapter: Arc<dyn AnchorAdapter>,
        store: Arc<MappingStore>,
        transforms: TransformTable,
        events: EventBus,
        section: &RecorderSection,
    ) -> Self {
        let settle = if section.settle_delay_secs.is_finite() && section.settle_delay_secs > 0.0 {
            Duration::from_secs_f32(section.settle_delay_secs)
        } else {
            Duration::ZERO
        };
        Self::new(adapter, store, transforms, events, settle)
    }

    pub async fn current_quality(&self, pose: &Pose) -> AnchorQuality {
        self.adapter.quality_estimate(pose).await
    }

    /// 在 pose 处创建锚点并保存映射（同一路点覆盖旧映射）；结果总会发出 CreationResult
    pub async fn create_and_save(
        &self,
        waypoint_id: &str,
        route_id: RouteId,
        radius: f32,
        location_name: &str,
        pose: &Pose,
    ) -> bool {
        let success = match self
            .try_create(waypoint_id, route_id, radius, location_name, pose)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(waypoint_id, route_id = %route_id, "Anchor creation failed: {}", e);
                false
            }
        };
        self.events.emit(AnchorEvent::CreationResult {
            waypoint_id: waypoint_id.to_string(),
            success,
        });
        success
    }

    async fn try_create(
        &self,
        waypoint_id: &str,
        route_id: RouteId,
        radius: f32,
        location_name: &str,
        pose: &Pose,
    ) -> Result<(), AnchorError> {
        if waypoint_id.trim().is_empty() {
            return Err(AnchorError::InvalidMapping("empty waypoint id".to_string()));
        }
        if radius.is_nan() || radius <= 0.0 {
            return Err(AnchorError::InvalidMapping(format!(
                "{waypoint_id}: radius must be positive, got {radius}"
            )));
        }
        if !self.adapter.is_available() {
            return Err(AnchorError::AdapterUnavailable);
        }

        let quality = self.adapter.quality_estimate(pose).await;
        if !quality.is_sufficient() {
            tracing::warn!(waypoint_id, ?quality, "Mapping quality too low, scan more surroundings");
            return Err(AnchorError::QualityInsufficient(waypoint_id.to_string()));
        }

        let handle = self
            .adapter
            .create_anchor(pose)
            .await
            .map_err(|e| {
                tracing::warn!(waypoint_id, "Platform rejected anchor creation: {}", e);
                AnchorError::CreateFailed(waypoint_id.to_string())
            })?;

        tokio::time::sleep(self.settle_delay).await;

        self.store
            .upsert(
                route_id,
                AnchorMapping {
                    waypoint_id: waypoint_id.to_string(),
                    anchor_handle: handle.clone(),
                    radius,
                    location_name: location_name.to_string(),
                },
            )
            .await;
        self.store.flush().await?;
        tracing::info!(waypoint_id, route_id = %route_id, handle = %handle, "Anchor saved");
        Ok(())
    }

    /// 删除路点映射：尽力擦除平台锚点，再从存储和变换表移除；未找到映射时返回 false
    pub async fn erase(&self, waypoint_id: &str, route_id: RouteId) -> bool {
        let Some(mapping) = self.store.find(route_id, waypoint_id).await else {
            tracing::debug!(waypoint_id, route_id = %route_id, "Nothing to erase");
            return false;
        };

        if !mapping.anchor_handle.is_empty() {
            if let Err(e) = self.adapter.erase_anchor(&mapping.anchor_handle).await {
                tracing::warn!(waypoint_id, handle = %mapping.anchor_handle, "Platform erase failed: {}", e);
            }
        }

        self.store.remove(route_id, waypoint_id).await;
        self.transforms.remove(waypoint_id);
        if let Err(e) = self.store.flush().await {
            tracing::error!(waypoint_id, "Mapping flush after erase failed: {}", e);
        }
        tracing::info!(waypoint_id, route_id = %route_id, "Anchor erased");
        true
    }
}

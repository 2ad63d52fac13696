//! 路点绑定：把当前路线的路点绑定到实时锚点变换，或保留勘测坐标作为备用
//!
//! 绑定只读取协调器的变换表；路点位置在初次绑定之后只会经 [`WaypointBinder::on_late_recovery`] 改变。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::route::{Route, Waypoint};
use crate::anchor::{TransformRef, TransformTable, Vec3};
use crate::core::AnchorError;
use crate::events::{AnchorEvent, EventBus};
use crate::store::RouteId;

/// 一次 bind_route 的统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindReport {
    pub bound: usize,
    pub fallback: usize,
}

pub struct WaypointBinder {
    routes: HashMap<RouteId, Route>,
    active: Option<RouteId>,
    transforms: TransformTable,
    events: EventBus,
}

impl WaypointBinder {
    pub fn new(routes: HashMap<RouteId, Route>, transforms: TransformTable, events: EventBus) -> Self {
        Self {
            routes,
            active: None,
            transforms,
            events,
        }
    }

    /// 设为当前路线并逐个查询变换表：找到则绑定；没有可用变换（未找到或来源已释放）时发出 FallbackUsed
    pub fn bind_route(&mut self, route_id: RouteId) -> Result<BindReport, AnchorError> {
        let route = self
            .routes
            .get_mut(&route_id)
            .ok_or_else(|| AnchorError::InvalidRoute(route_id.to_string()))?;
        self.active = Some(route_id);

        let mut report = BindReport::default();
        for wp in route.waypoints.iter_mut() {
            wp.bound_transform = self.transforms.get(&wp.waypoint_id);
            if !wp.is_using_fallback() {
                report.bound += 1;
            } else {
                report.fallback += 1;
                tracing::warn!(
                    route_id = %route_id,
                    waypoint_id = %wp.waypoint_id,
                    "Waypoint using fallback position ({:.2}, {:.2}, {:.2})",
                    wp.fallback_position.x,
                    wp.fallback_position.y,
                    wp.fallback_position.z
                );
                self.events.emit(AnchorEvent::FallbackUsed {
                    route_id,
                    waypoint_id: wp.waypoint_id.clone(),
                    fallback: wp.fallback_position,
                });
            }
        }
        tracing::info!(
            route_id = %route_id,
            bound = report.bound,
            fallback = report.fallback,
            "Route bound to anchors"
        );
        Ok(report)
    }

    /// 晚到锚点：重新绑定并返回漂移距离；不在当前路线或变换不可用时返回 None
    pub fn on_late_recovery(&mut self, waypoint_id: &str, transform: TransformRef) -> Option<f32> {
        let route_id = self.active?;
        let wp = self.routes.get_mut(&route_id)?.get_mut(waypoint_id)?;
        let Some(new_position) = transform.position() else {
            tracing::warn!(waypoint_id, "Late recovered transform unavailable, keeping current position");
            return None;
        };

        let old_position = wp.effective_position();
        let drift = (new_position - old_position).norm();
        wp.bound_transform = Some(transform);
        tracing::info!(waypoint_id, drift, "Waypoint re-bound after late recovery");
        self.events.emit(AnchorEvent::LateBind {
            waypoint_id: waypoint_id.to_string(),
            drift,
            old_position,
            new_position,
        });
        Some(drift)
    }

    /// 当前路线中该路点是否仍使用备用坐标；未知路点返回 false
    pub fn is_using_fallback(&self, waypoint_id: &str) -> bool {
        self.active_route()
            .and_then(|r| r.get(waypoint_id))
            .is_some_and(Waypoint::is_using_fallback)
    }

    /// 当前路线中尚未绑定变换的路点数（降级导航指示）
    pub fn fallback_count(&self) -> usize {
        self.active_route().map_or(0, |r| {
            r.waypoints.iter().filter(|w| w.is_using_fallback()).count()
        })
    }

    pub fn active_route(&self) -> Option<&Route> {
        self.routes.get(&self.active?)
    }

    pub fn active_route_id(&self) -> Option<RouteId> {
        self.active
    }

    pub fn effective_position(&self, waypoint_id: &str) -> Option<Vec3> {
        self.active_route()?
            .get(waypoint_id)
            .map(Waypoint::effective_position)
    }
}

/// 监听协调器事件：批次完成后绑定路线，后台恢复后重新绑定单个路点
pub fn spawn_listener(
    binder: Arc<RwLock<WaypointBinder>>,
    route_id: RouteId,
    mut rx: broadcast::Receiver<AnchorEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                ev = rx.recv() => ev,
            };
            match event {
                Ok(AnchorEvent::BatchComplete { .. }) => {
                    if let Err(e) = binder.write().await.bind_route(route_id) {
                        tracing::error!("Route binding failed: {}", e);
                    }
                }
                Ok(AnchorEvent::LateRecovered {
                    waypoint_id,
                    transform,
                }) => {
                    binder
                        .write()
                        .await
                        .on_late_recovery(&waypoint_id, transform);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // 丢了事件：按变换表整体重绑一次
                    tracing::warn!(skipped = n, "Binder lagged behind events, rebinding route");
                    if let Err(e) = binder.write().await.bind_route(route_id) {
                        tracing::error!("Route binding failed: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Binder listener stopped");
    })
}

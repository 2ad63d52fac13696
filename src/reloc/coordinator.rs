//! 重定位协调器：加载 → 轮询 → 分类 → 汇总
//!
//! 每个锚点一个独立任务（并发数受 Semaphore 限制）；计数器与结果表只在协调器的锁内修改，
//! 任务在持锁后先检查自己的 CancellationToken，stop() 之后不会再有任何写入。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use super::reanchor::reanchor_loop;
use super::types::{RelocCounters, RelocResult, RelocSettings, RelocState, RelocSummary};
use crate::anchor::{AnchorAdapter, TrackableId, TrackingState, TransformRef, TransformTable, Vec3};
use crate::core::{AnchorError, RelocSupervisor};
use crate::events::{AnchorEvent, EventBus};
use crate::store::AnchorMapping;

/// 批次内部状态（单写者：只在 Shared::state 锁内修改）
#[derive(Default)]
pub(super) struct BatchState {
    pub(super) counters: RelocCounters,
    pub(super) results: HashMap<String, RelocResult>,
    /// waypoint_id → 本会话 TrackableId（后台补救轮询用）
    pub(super) trackables: HashMap<String, TrackableId>,
    /// 最近一次完整批次的映射（重试用）
    last_mappings: Vec<AnchorMapping>,
    is_relocalized: bool,
    pub(super) supervisor: RelocSupervisor,
}

impl BatchState {
    fn summary(&self) -> RelocSummary {
        RelocSummary {
            total: self.counters.total,
            successful: self.counters.successful,
            timed_out: self.counters.timed_out,
            failed: self.counters.failed,
            rate: self.counters.rate(),
            degraded: self.degraded(),
        }
    }

    /// 非 Tracking 的路点（按批次顺序）
    fn degraded(&self) -> Vec<String> {
        self.last_mappings
            .iter()
            .filter(|m| {
                self.results
                    .get(&m.waypoint_id)
                    .map_or(true, |r| r.state != RelocState::Tracking)
            })
            .map(|m| m.waypoint_id.clone())
            .collect()
    }

    /// 批次 token 仍有效且尚未全部分类；stop() 之后不再视为进行中
    fn in_progress(&self) -> bool {
        !self.is_relocalized
            && self.counters.processed < self.counters.total
            && self.supervisor.batch_active()
    }
}

pub(super) struct Shared {
    pub(super) adapter: Arc<dyn AnchorAdapter>,
    pub(super) settings: RelocSettings,
    pub(super) events: EventBus,
    transforms: TransformTable,
    load_permits: Arc<Semaphore>,
    pub(super) state: Mutex<BatchState>,
}

/// 重定位协调器（克隆共享同一份状态）
#[derive(Clone)]
pub struct RelocalizationCoordinator {
    shared: Arc<Shared>,
}

impl RelocalizationCoordinator {
    pub fn new(
        adapter: Arc<dyn AnchorAdapter>,
        settings: RelocSettings,
        events: EventBus,
        transforms: TransformTable,
    ) -> Self {
        let load_permits = Arc::new(Semaphore::new(settings.max_concurrent_loads.max(1)));
        Self {
            shared: Arc::new(Shared {
                adapter,
                settings,
                events,
                transforms,
                load_permits,
                state: Mutex::new(BatchState::default()),
            }),
        }
    }

    /// 开始一个完整批次：重置计数器与结果，为每个映射发起加载 + 轮询任务
    ///
    /// 空批次立即以 100% 完成，不触碰适配器。适配器不可用时返回 AdapterUnavailable，状态不变。
    pub async fn start_batch(&self, mut mappings: Vec<AnchorMapping>) -> Result<(), AnchorError> {
        dedupe(&mut mappings);
        let total = mappings.len();

        if total > 0 && !self.shared.adapter.is_available() {
            tracing::error!(total, "Anchor adapter unavailable, relocalization aborted");
            return Err(AnchorError::AdapterUnavailable);
        }

        let mut guard = self.shared.state.lock().await;
        let st = &mut *guard;
        st.supervisor.cancel_all();
        let token = st.supervisor.next_batch();
        st.counters = RelocCounters::new(total);
        st.results.clear();
        st.trackables.clear();
        st.is_relocalized = false;
        for m in &mappings {
            self.shared.transforms.remove(&m.waypoint_id);
        }
        st.last_mappings = mappings.clone();

        if total == 0 {
            tracing::warn!("No saved anchors, relocalization trivially complete");
            st.is_relocalized = true;
            self.shared.events.emit(AnchorEvent::BatchComplete {
                rate: 1.0,
                summary: st.summary(),
            });
            return Ok(());
        }

        tracing::info!(total, "Relocalization batch started");
        self.shared.dispatch(st, mappings, token);
        Ok(())
    }

    /// 重试所有未进入追踪的锚点（超时、加载失败、被 stop() 中断的 Pending）；total 保持原批次大小
    ///
    /// 没有可重试项、或批次仍在进行时为 no-op。
    pub async fn retry_failed(&self) -> Result<(), AnchorError> {
        let mut guard = self.shared.state.lock().await;
        let st = &mut *guard;

        if st.in_progress() {
            tracing::warn!(
                processed = st.counters.processed,
                total = st.counters.total,
                "Retry ignored: batch still in progress"
            );
            return Ok(());
        }

        let failed: Vec<AnchorMapping> = st
            .last_mappings
            .iter()
            .filter(|m| {
                st.results
                    .get(&m.waypoint_id)
                    .map_or(true, |r| r.state != RelocState::Tracking)
            })
            .cloned()
            .collect();
        if failed.is_empty() {
            tracing::debug!("Retry skipped: no failed anchors");
            return Ok(());
        }

        if !self.shared.adapter.is_available() {
            tracing::error!("Anchor adapter unavailable, retry aborted");
            return Err(AnchorError::AdapterUnavailable);
        }

        let reset = st.counters.timed_out + st.counters.failed;
        st.counters.processed = st.counters.processed.saturating_sub(reset);
        st.counters.timed_out = 0;
        st.counters.failed = 0;
        st.is_relocalized = false;
        st.supervisor.stop_reanchor();
        let token = st.supervisor.next_batch();

        tracing::info!(count = failed.len(), "Retrying failed anchors");
        self.shared.dispatch(st, failed, token);
        Ok(())
    }

    /// 取消所有进行中的轮询与后台补救循环；空闲时调用无副作用
    pub async fn stop(&self) {
        let mut st = self.shared.state.lock().await;
        st.supervisor.cancel_all();
        tracing::debug!("Relocalization stopped");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnchorEvent> {
        self.shared.events.subscribe()
    }

    /// 路点对应的实时锚点变换（未追踪时为 None）
    pub fn transform_for(&self, waypoint_id: &str) -> Option<TransformRef> {
        self.shared.transforms.get(waypoint_id)
    }

    pub fn anchor_position(&self, waypoint_id: &str) -> Option<Vec3> {
        self.shared.transforms.position(waypoint_id)
    }

    pub fn transforms(&self) -> TransformTable {
        self.shared.transforms.clone()
    }

    #[cfg(test)]
    pub(crate) async fn counters(&self) -> RelocCounters {
        self.shared.state.lock().await.counters
    }

    #[cfg(test)]
    pub(crate) async fn result(&self, waypoint_id: &str) -> Option<RelocResult> {
        self.shared.state.lock().await.results.get(waypoint_id).cloned()
    }

    #[cfg(test)]
    pub(crate) async fn is_relocalized(&self) -> bool {
        self.shared.state.lock().await.is_relocalized
    }

    #[cfg(test)]
    pub(crate) async fn reanchor_running(&self) -> bool {
        self.shared.state.lock().await.supervisor.reanchor_running()
    }

    #[cfg(test)]
    pub(crate) async fn summary(&self) -> RelocSummary {
        self.shared.state.lock().await.summary()
    }

    /// 对单个路点执行一次后台补救判定；只有 TimedOut 的条目会被修改
    #[cfg(test)]
    pub(crate) async fn late_recover(&self, waypoint_id: &str) -> bool {
        let mut st = self.shared.state.lock().await;
        self.shared.apply_late_recovery(&mut st, waypoint_id).is_some()
    }
}

impl Shared {
    /// 为每个映射派发任务；已在追踪中的路点跳过
    fn dispatch(
        self: &Arc<Self>,
        st: &mut BatchState,
        mappings: Vec<AnchorMapping>,
        token: CancellationToken,
    ) {
        for mapping in mappings {
            let already_tracking = st
                .results
                .get(&mapping.waypoint_id)
                .is_some_and(|r| r.state == RelocState::Tracking);
            if already_tracking {
                tracing::debug!(waypoint_id = %mapping.waypoint_id, "Already tracking, skipped");
                continue;
            }
            let shared = Arc::clone(self);
            let token = token.clone();
            tokio::spawn(async move {
                shared.relocalize_one(mapping, token).await;
            });
        }
    }

    /// 单个锚点：加载 → 有界轮询 → 分类
    async fn relocalize_one(self: Arc<Self>, mapping: AnchorMapping, token: CancellationToken) {
        let waypoint_id = mapping.waypoint_id.as_str();

        if mapping.anchor_handle.is_empty() {
            tracing::warn!(waypoint_id, "Mapping has no anchor handle");
            self.classify(&token, waypoint_id, RelocState::LoadFailed, 0.0, None)
                .await;
            return;
        }

        let loaded = {
            let permit = tokio::select! {
                _ = token.cancelled() => return,
                p = Arc::clone(&self.load_permits).acquire_owned() => p,
            };
            let Ok(_permit) = permit else { return };
            tokio::select! {
                _ = token.cancelled() => return,
                r = self.adapter.load_anchor(&mapping.anchor_handle) => r,
            }
        };

        let trackable = match loaded {
            Ok(trackable) => trackable,
            Err(e) => {
                tracing::warn!(waypoint_id, handle = %mapping.anchor_handle, "Anchor load failed: {}", e);
                self.classify(&token, waypoint_id, RelocState::LoadFailed, 0.0, None)
                    .await;
                return;
            }
        };

        if !self.mark_pending(&token, waypoint_id, &trackable).await {
            return;
        }
        tracing::debug!(waypoint_id, %trackable, "Anchor load requested");

        let timeout = self.settings.tracking_timeout;
        let interval = self.settings.poll_interval;
        let mut elapsed = std::time::Duration::ZERO;

        while elapsed < timeout {
            let state = tokio::select! {
                _ = token.cancelled() => return,
                s = self.adapter.poll_tracking_state(&trackable) => s,
            };
            if state == TrackingState::Tracking {
                let transform = self.adapter.live_transform(&trackable);
                tracing::info!(waypoint_id, elapsed = elapsed.as_secs_f32(), "Anchor relocalized");
                self.classify(
                    &token,
                    waypoint_id,
                    RelocState::Tracking,
                    elapsed.as_secs_f32(),
                    Some(transform),
                )
                .await;
                return;
            }
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            elapsed += interval;
        }

        tracing::warn!(waypoint_id, "Anchor tracking timed out");
        self.classify(
            &token,
            waypoint_id,
            RelocState::TimedOut,
            timeout.as_secs_f32(),
            None,
        )
        .await;
    }

    async fn mark_pending(
        &self,
        token: &CancellationToken,
        waypoint_id: &str,
        trackable: &TrackableId,
    ) -> bool {
        let mut st = self.state.lock().await;
        if token.is_cancelled() {
            return false;
        }
        st.trackables
            .insert(waypoint_id.to_string(), trackable.clone());
        st.results.insert(
            waypoint_id.to_string(),
            RelocResult {
                waypoint_id: waypoint_id.to_string(),
                state: RelocState::Pending,
                elapsed: 0.0,
            },
        );
        self.events.emit(AnchorEvent::Progress {
            waypoint_id: waypoint_id.to_string(),
            state: RelocState::Pending,
            successful: st.counters.successful,
            timed_out: st.counters.timed_out,
            total: st.counters.total,
        });
        true
    }

    /// 记录终态：计数 +1、发进度事件；processed 达到 total 时完成批次
    async fn classify(
        self: &Arc<Self>,
        token: &CancellationToken,
        waypoint_id: &str,
        state: RelocState,
        elapsed: f32,
        transform: Option<TransformRef>,
    ) {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        if token.is_cancelled() {
            return;
        }
        if st.counters.processed >= st.counters.total {
            tracing::warn!(waypoint_id, "Classification after batch completion ignored");
            return;
        }

        if let Some(transform) = transform {
            self.transforms.insert(waypoint_id, transform);
        }
        st.results.insert(
            waypoint_id.to_string(),
            RelocResult {
                waypoint_id: waypoint_id.to_string(),
                state,
                elapsed,
            },
        );
        match state {
            RelocState::Tracking => st.counters.successful += 1,
            RelocState::TimedOut => st.counters.timed_out += 1,
            RelocState::LoadFailed => st.counters.failed += 1,
            RelocState::Pending => return,
        }
        st.counters.processed += 1;
        debug_assert!(st.counters.is_consistent());

        self.events.emit(AnchorEvent::Progress {
            waypoint_id: waypoint_id.to_string(),
            state,
            successful: st.counters.successful,
            timed_out: st.counters.timed_out,
            total: st.counters.total,
        });

        if st.counters.is_complete() {
            self.complete(st);
        }
    }

    fn complete(self: &Arc<Self>, st: &mut BatchState) {
        st.is_relocalized = true;
        let summary = st.summary();
        tracing::info!(
            successful = summary.successful,
            timed_out = summary.timed_out,
            failed = summary.failed,
            total = summary.total,
            "Relocalization complete, success rate {:.0}%",
            summary.rate * 100.0
        );
        let start_background = summary.timed_out > 0;
        self.events.emit(AnchorEvent::BatchComplete {
            rate: summary.rate,
            summary,
        });

        if start_background {
            let (generation, token) = st.supervisor.start_reanchor();
            let shared = Arc::clone(self);
            tokio::spawn(reanchor_loop(shared, generation, token));
        }
    }

    /// TimedOut → Tracking；其他状态不做任何修改
    pub(super) fn apply_late_recovery(
        &self,
        st: &mut BatchState,
        waypoint_id: &str,
    ) -> Option<TransformRef> {
        let trackable = st.trackables.get(waypoint_id)?.clone();
        let result = st.results.get_mut(waypoint_id)?;
        if result.state != RelocState::TimedOut {
            return None;
        }
        result.state = RelocState::Tracking;
        st.counters.timed_out -= 1;
        st.counters.successful += 1;
        debug_assert!(st.counters.is_consistent());

        let transform = self.adapter.live_transform(&trackable);
        self.transforms.insert(waypoint_id, transform.clone());
        tracing::info!(waypoint_id, "Anchor recovered in background");
        self.events.emit(AnchorEvent::LateRecovered {
            waypoint_id: waypoint_id.to_string(),
            transform: transform.clone(),
        });
        Some(transform)
    }
}

/// 同一批次内重复的 waypoint_id 只保留第一条
fn dedupe(mappings: &mut Vec<AnchorMapping>) {
    let mut seen = HashSet::new();
    mappings.retain(|m| {
        let fresh = seen.insert(m.waypoint_id.clone());
        if !fresh {
            tracing::warn!(waypoint_id = %m.waypoint_id, "Duplicate waypoint in batch dropped");
        }
        fresh
    });
}

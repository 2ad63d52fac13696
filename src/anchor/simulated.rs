//! 模拟锚点适配器（用于测试与无硬件环境，无需 AR 设备）
//!
//! 每个句柄绑定一个脚本化行为：若干时间后开始追踪 / 永不追踪 / 加载失败。
//! 创建锚点总是成功（除非显式设置失败），句柄为随机 UUID。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{
    AnchorAdapter, AnchorHandle, AnchorQuality, Pose, PoseSource, TrackableId, TrackingState,
    TransformRef,
};

/// 单个模拟锚点的脚本行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedAnchor {
    /// 加载后经过指定时长开始追踪
    TracksAfter(Duration),
    /// 加载成功但永不追踪
    NeverTracks,
    /// 句柄无法解析
    LoadFails,
}

#[derive(Debug, Clone)]
struct SimEntry {
    pose: Pose,
    behavior: SimulatedAnchor,
}

#[derive(Default)]
struct SimWorld {
    anchors: Mutex<HashMap<AnchorHandle, SimEntry>>,
    /// trackable → (句柄, 加载时刻)
    trackables: Mutex<HashMap<TrackableId, (AnchorHandle, Instant)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl PoseSource for SimWorld {
    fn pose_of(&self, trackable: &TrackableId) -> Option<Pose> {
        let handle = lock(&self.trackables).get(trackable).map(|(h, _)| h.clone())?;
        lock(&self.anchors).get(&handle).map(|e| e.pose)
    }
}

/// 模拟适配器；调用计数供测试断言「未触碰适配器」
pub struct SimulatedAdapter {
    world: Arc<SimWorld>,
    available: AtomicBool,
    quality: Mutex<AnchorQuality>,
    fail_create: AtomicBool,
    next_trackable: AtomicUsize,
    load_calls: AtomicUsize,
    create_calls: AtomicUsize,
    erase_calls: AtomicUsize,
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self {
            world: Arc::new(SimWorld::default()),
            available: AtomicBool::new(true),
            quality: Mutex::new(AnchorQuality::Good),
            fail_create: AtomicBool::new(false),
            next_trackable: AtomicUsize::new(0),
            load_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            erase_calls: AtomicUsize::new(0),
        }
    }

    /// 注册一个已持久化的锚点
    pub fn with_anchor(self, handle: &str, pose: Pose, behavior: SimulatedAnchor) -> Self {
        self.insert_anchor(handle, pose, behavior);
        self
    }

    pub fn insert_anchor(&self, handle: &str, pose: Pose, behavior: SimulatedAnchor) {
        lock(&self.world.anchors).insert(AnchorHandle::new(handle), SimEntry { pose, behavior });
    }

    /// 修改已注册锚点的行为（例如让超时锚点之后恢复追踪）
    pub fn set_behavior(&self, handle: &str, behavior: SimulatedAnchor) {
        if let Some(entry) = lock(&self.world.anchors).get_mut(&AnchorHandle::new(handle)) {
            entry.behavior = behavior;
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_quality(&self, quality: AnchorQuality) {
        *lock(&self.quality) = quality;
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, handle: &str) -> bool {
        lock(&self.world.anchors).contains_key(&AnchorHandle::new(handle))
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn erase_calls(&self) -> usize {
        self.erase_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnchorAdapter for SimulatedAdapter {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn quality_estimate(&self, _pose: &Pose) -> AnchorQuality {
        *lock(&self.quality)
    }

    async fn create_anchor(&self, pose: &Pose) -> Result<AnchorHandle, String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err("simulated anchor save failure".to_string());
        }
        let handle = AnchorHandle::new(uuid::Uuid::new_v4().to_string());
        lock(&self.world.anchors).insert(
            handle.clone(),
            SimEntry {
                pose: *pose,
                behavior: SimulatedAnchor::TracksAfter(Duration::ZERO),
            },
        );
        Ok(handle)
    }

    async fn load_anchor(&self, handle: &AnchorHandle) -> Result<TrackableId, String> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = lock(&self.world.anchors).get(handle).map(|e| e.behavior);
        match behavior {
            None => Err(format!("unknown anchor handle {}", handle)),
            Some(SimulatedAnchor::LoadFails) => Err(format!("cannot resolve anchor {}", handle)),
            Some(_) => {
                let n = self.next_trackable.fetch_add(1, Ordering::SeqCst);
                let id = TrackableId(format!("trackable-{}", n));
                lock(&self.world.trackables).insert(id.clone(), (handle.clone(), Instant::now()));
                Ok(id)
            }
        }
    }

    async fn poll_tracking_state(&self, trackable: &TrackableId) -> TrackingState {
        let Some((handle, loaded_at)) = lock(&self.world.trackables).get(trackable).cloned() else {
            return TrackingState::NotTracking;
        };
        let behavior = lock(&self.world.anchors).get(&handle).map(|e| e.behavior);
        match behavior {
            Some(SimulatedAnchor::TracksAfter(after)) if loaded_at.elapsed() >= after => {
                TrackingState::Tracking
            }
            _ => TrackingState::NotTracking,
        }
    }

    async fn erase_anchor(&self, handle: &AnchorHandle) -> Result<(), String> {
        self.erase_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.world.anchors).remove(handle) {
            Some(_) => Ok(()),
            None => Err(format!("unknown anchor handle {}", handle)),
        }
    }

    fn live_transform(&self, trackable: &TrackableId) -> TransformRef {
        let world: Arc<dyn PoseSource> = self.world.clone();
        let source: Weak<dyn PoseSource> = Arc::downgrade(&world);
        TransformRef::new(trackable.clone(), source)
    }
}

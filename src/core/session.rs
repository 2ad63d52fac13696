//! 锚点会话：把存储、协调器、绑定器、建图器围绕同一个适配器和事件总线装配起来
//!
//! 每个进程 / 实验会话显式构造一个实例，不使用全局单例。

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::anchor::{AnchorAdapter, TransformTable};
use crate::config::AppConfig;
use crate::core::{AnchorError, RecoveryAction, RecoveryEngine};
use crate::events::{AnchorEvent, EventBus};
use crate::navigation::{load_routes, spawn_listener, WaypointBinder};
use crate::recorder::AnchorRecorder;
use crate::reloc::{RelocSettings, RelocSummary, RelocalizationCoordinator};
use crate::store::{valid_default_radius, MappingStore, RouteId};

pub struct AnchorSession {
    events: EventBus,
    store: Arc<MappingStore>,
    coordinator: RelocalizationCoordinator,
    binder: Arc<RwLock<WaypointBinder>>,
    recorder: AnchorRecorder,
    recovery: RecoveryEngine,
    min_success_rate: f32,
    root: CancellationToken,
    listener: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl AnchorSession {
    /// 按配置装配会话；路线文件读取失败时返回错误
    pub async fn new(
        config: &AppConfig,
        adapter: Arc<dyn AnchorAdapter>,
    ) -> Result<Self, AnchorError> {
        let events = EventBus::new(config.relocalization.event_capacity);
        let transforms = TransformTable::new();
        let default_radius = valid_default_radius(config.recorder.default_radius);
        let store = Arc::new(
            MappingStore::new(config.app.mapping_path()).with_default_radius(default_radius),
        );
        let routes = load_routes(config.app.routes_file.as_deref(), default_radius).await?;

        let coordinator = RelocalizationCoordinator::new(
            Arc::clone(&adapter),
            RelocSettings::from_config(&config.relocalization),
            events.clone(),
            transforms.clone(),
        );
        let binder = Arc::new(RwLock::new(WaypointBinder::new(
            routes,
            transforms.clone(),
            events.clone(),
        )));
        let recorder = AnchorRecorder::from_config(
            adapter,
            Arc::clone(&store),
            transforms,
            events.clone(),
            &config.recorder,
        );

        Ok(Self {
            events,
            store,
            coordinator,
            binder,
            recorder,
            recovery: RecoveryEngine::new(),
            min_success_rate: config.relocalization.min_success_rate,
            root: CancellationToken::new(),
            listener: Mutex::new(None),
        })
    }

    /// 读取映射文件并为指定路线开始重定位；批次完成后绑定器自动绑定该路线
    pub async fn relocalize(&self, route_id: RouteId) -> Result<(), AnchorError> {
        if self.store.snapshot().await.is_none() {
            self.store.load().await;
        }

        // 先订阅再开始批次，避免漏掉空批次的 BatchComplete
        {
            let mut listener = self.listener.lock().await;
            if let Some((token, _)) = listener.take() {
                token.cancel();
            }
            let token = self.root.child_token();
            let handle = spawn_listener(
                Arc::clone(&self.binder),
                route_id,
                self.events.subscribe(),
                token.clone(),
            );
            *listener = Some((token, handle));
        }

        let mappings = self.store.mappings_for(route_id).await;
        tracing::info!(route_id = %route_id, anchors = mappings.len(), "Starting relocalization");
        self.coordinator.start_batch(mappings).await
    }

    /// 取消轮询、后台补救与绑定监听
    pub async fn stop(&self) {
        self.coordinator.stop().await;
        if let Some((token, handle)) = self.listener.lock().await.take() {
            token.cancel();
            let _ = handle.await;
        }
        tracing::info!("Anchor session stopped");
    }

    pub fn advise(&self, summary: &RelocSummary) -> RecoveryAction {
        self.recovery.advise_summary(summary, self.min_success_rate)
    }

    pub fn advise_error(&self, err: &AnchorError) -> RecoveryAction {
        self.recovery.advise(err)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnchorEvent> {
        self.events.subscribe()
    }

    pub fn coordinator(&self) -> &RelocalizationCoordinator {
        &self.coordinator
    }

    pub fn recorder(&self) -> &AnchorRecorder {
        &self.recorder
    }

    pub fn binder(&self) -> Arc<RwLock<WaypointBinder>> {
        Arc::clone(&self.binder)
    }

    pub fn store(&self) -> Arc<MappingStore> {
        Arc::clone(&self.store)
    }
}

impl Drop for AnchorSession {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

//! ARNav Anchors - 空间锚点重定位与路点绑定引擎
//!
//! 模块划分：
//! - **anchor**: 平台锚点能力抽象（适配器、位姿、实时变换引用）与模拟实现
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复建议、取消监管、会话装配
//! - **events**: 对外事件总线（进度 / 批次完成 / 后台恢复 / 备用坐标 / 建图结果）
//! - **navigation**: 路线、路点推进与锚点绑定
//! - **observability**: tracing 日志初始化
//! - **recorder**: 建图阶段的锚点创建与保存
//! - **reloc**: 重定位协调器与后台补救循环
//! - **store**: 路点 → 锚点句柄映射的持久化

pub mod anchor;
pub mod config;
pub mod core;
pub mod events;
pub mod navigation;
pub mod observability;
pub mod recorder;
pub mod reloc;
pub mod store;

pub use crate::core::{AnchorError, AnchorSession, RecoveryAction};
pub use events::{AnchorEvent, EventBus};
pub use store::RouteId;

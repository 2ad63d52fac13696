//! 核心层：错误与恢复、取消监管、会话装配

pub mod error;
pub mod recovery;
pub mod session;
pub mod supervisor;

pub use error::{AnchorError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use session::AnchorSession;
pub use supervisor::RelocSupervisor;

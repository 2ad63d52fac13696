//! 重定位：批次协调器、后台补救循环、结果类型

pub mod coordinator;
mod reanchor;
pub mod types;

pub use coordinator::RelocalizationCoordinator;
pub use types::{RelocCounters, RelocResult, RelocSettings, RelocState, RelocSummary};

#[cfg(test)]
mod tests;

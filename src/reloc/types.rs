//! 重定位结果、计数器与批次摘要

use std::time::Duration;

use serde::Serialize;

use crate::config::RelocalizationSection;

/// 单个锚点的重定位状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelocState {
    Pending,
    Tracking,
    TimedOut,
    LoadFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelocResult {
    pub waypoint_id: String,
    pub state: RelocState,
    /// 进入当前状态时已轮询的时长（秒）
    pub elapsed: f32,
}

/// 批次计数器；processed 始终等于 successful + timed_out + failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelocCounters {
    pub total: usize,
    pub successful: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub processed: usize,
}

impl RelocCounters {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.processed == self.successful + self.timed_out + self.failed
            && self.processed <= self.total
    }

    pub fn is_complete(&self) -> bool {
        self.processed == self.total
    }

    /// 成功率；空批次按 100% 计
    pub fn rate(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.successful as f32 / self.total as f32
        }
    }
}

/// 批次完成时对外暴露的摘要
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RelocSummary {
    pub total: usize,
    pub successful: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub rate: f32,
    /// 未进入追踪、将使用备用坐标的路点
    pub degraded: Vec<String>,
}

impl RelocSummary {
    pub fn is_complete_success(&self) -> bool {
        self.degraded.is_empty() && self.successful == self.total
    }
}

/// 轮询 / 超时 / 后台间隔等运行参数
#[derive(Debug, Clone)]
pub struct RelocSettings {
    pub tracking_timeout: Duration,
    pub poll_interval: Duration,
    pub reanchor_interval: Duration,
    pub max_concurrent_loads: usize,
}

const MIN_INTERVAL: Duration = Duration::from_millis(10);

impl Default for RelocSettings {
    fn default() -> Self {
        Self {
            tracking_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            reanchor_interval: Duration::from_secs(5),
            max_concurrent_loads: 8,
        }
    }
}

impl RelocSettings {
    pub fn from_config(section: &RelocalizationSection) -> Self {
        Self {
            tracking_timeout: secs(section.tracking_timeout_secs, Duration::ZERO),
            poll_interval: secs(section.poll_interval_secs, MIN_INTERVAL),
            reanchor_interval: secs(section.reanchor_interval_secs, MIN_INTERVAL),
            max_concurrent_loads: section.max_concurrent_loads.max(1),
        }
    }
}

fn secs(value: f32, min: Duration) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f32(value).max(min)
    } else {
        min
    }
}

//! 后台补救循环：周期性重新轮询超时锚点
//!
//! 只要还有 TimedOut 条目就一直运行（单次失败不会让循环退出），直到全部恢复或被 stop() 取消。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::coordinator::Shared;
use super::types::RelocState;
use crate::anchor::{TrackableId, TrackingState};

pub(super) async fn reanchor_loop(shared: Arc<Shared>, generation: u64, token: CancellationToken) {
    let interval = shared.settings.reanchor_interval;
    tracing::info!(interval_secs = interval.as_secs_f32(), "Background re-anchoring started");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("Background re-anchoring cancelled");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let pending: Vec<(String, TrackableId)> = {
            let st = shared.state.lock().await;
            if token.is_cancelled() {
                return;
            }
            st.results
                .values()
                .filter(|r| r.state == RelocState::TimedOut)
                .filter_map(|r| {
                    st.trackables
                        .get(&r.waypoint_id)
                        .map(|t| (r.waypoint_id.clone(), t.clone()))
                })
                .collect()
        };

        for (waypoint_id, trackable) in &pending {
            let state = tokio::select! {
                _ = token.cancelled() => return,
                s = shared.adapter.poll_tracking_state(trackable) => s,
            };
            if state != TrackingState::Tracking {
                continue;
            }
            let mut st = shared.state.lock().await;
            if token.is_cancelled() {
                return;
            }
            shared.apply_late_recovery(&mut st, waypoint_id);
        }

        let mut st = shared.state.lock().await;
        if token.is_cancelled() {
            return;
        }
        let remaining = st
            .results
            .values()
            .filter(|r| r.state == RelocState::TimedOut)
            .count();
        if remaining == 0 {
            st.supervisor.reanchor_finished(generation);
            tracing::info!("Background re-anchoring finished, all anchors recovered");
            return;
        }
        tracing::debug!(remaining, "Background re-anchoring sweep done");
    }
}

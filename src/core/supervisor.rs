//! 重定位监管：批次与后台补救循环的取消令牌
//!
//! 持有根 CancellationToken；每个批次、每个后台循环各拿一个子 token，stop() 时统一取消。
//! 新批次开始前先取消上一批次的 token，保证不会有遗留轮询任务继续修改计数器。

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct RelocSupervisor {
    root: CancellationToken,
    batch: CancellationToken,
    reanchor: Option<(u64, CancellationToken)>,
    reanchor_generation: u64,
}

impl RelocSupervisor {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let batch = root.child_token();
        Self {
            root,
            batch,
            reanchor: None,
            reanchor_generation: 0,
        }
    }

    /// 取消当前批次并换一个新的批次 token
    pub fn next_batch(&mut self) -> CancellationToken {
        self.batch.cancel();
        self.batch = self.root.child_token();
        self.batch.clone()
    }

    /// 当前批次 token 是否仍有效（stop() 或新批次之后为 false）
    pub fn batch_active(&self) -> bool {
        !self.batch.is_cancelled()
    }

    /// 启动后台循环：先停掉旧循环，返回 (代号, token)
    pub fn start_reanchor(&mut self) -> (u64, CancellationToken) {
        self.stop_reanchor();
        self.reanchor_generation += 1;
        let token = self.root.child_token();
        self.reanchor = Some((self.reanchor_generation, token.clone()));
        (self.reanchor_generation, token)
    }

    pub fn stop_reanchor(&mut self) {
        if let Some((_, token)) = self.reanchor.take() {
            token.cancel();
        }
    }

    pub fn reanchor_running(&self) -> bool {
        self.reanchor.as_ref().is_some_and(|(_, t)| !t.is_cancelled())
    }

    /// 后台循环自行结束时调用；只清理属于自己那一代的 token
    pub fn reanchor_finished(&mut self, generation: u64) {
        if self.reanchor.as_ref().is_some_and(|(g, _)| *g == generation) {
            self.reanchor = None;
        }
    }

    /// 取消一切进行中的轮询与后台循环
    pub fn cancel_all(&mut self) {
        self.batch.cancel();
        self.stop_reanchor();
    }
}

impl Default for RelocSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

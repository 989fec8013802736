// 传输协调器
//
// 每个本地文件对应一个传输，维护 file_id -> {进度, 状态} 的映射：
// - register：Pending -> Active（立即启动传输，对调用方是原子的）
// - 进度回调：Active 内更新百分比
// - 完成回调：Active -> Completed
// - unregister：Active -> Cancelled（调用取消句柄），终态下为空操作
//
// 这是唯一允许启动/取消传输的组件；协调器销毁时取消所有进行中的传输。
// 状态更新在传输闸门内完成，hooks 在闸门释放后调用

use super::error::UploadResult;
use super::events::UploadHooks;
use super::file::FileId;
use super::simulator::{Deferred, TransferDriver, TransferHandle};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// 传输状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// 已登记，尚未启动
    Pending,
    /// 传输中
    Active,
    /// 已完成
    Completed,
    /// 已取消
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Cancelled)
    }
}

/// 单个文件的传输状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferState {
    /// 对应的文件ID
    pub file_id: FileId,
    /// 进度百分比 [0, 100]
    pub progress_percent: u8,
    /// 状态
    pub status: TransferStatus,
}

impl TransferState {
    fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            progress_percent: 0,
            status: TransferStatus::Pending,
        }
    }

    pub fn completed(&self) -> bool {
        self.status == TransferStatus::Completed
    }

    pub fn cancelled(&self) -> bool {
        self.status == TransferStatus::Cancelled
    }

    pub fn is_active(&self) -> bool {
        self.status == TransferStatus::Active
    }
}

/// 协调器内部条目
struct TransferEntry {
    state: TransferState,
    /// 每次登记分配新的代号，旧传输的迟到回调据此丢弃
    generation: u64,
    handle: Option<TransferHandle>,
}

type TransferTable = DashMap<FileId, TransferEntry>;

/// 传输协调器
pub struct TransferCoordinator {
    driver: Arc<dyn TransferDriver>,
    transfers: Arc<TransferTable>,
    hooks: Arc<dyn UploadHooks>,
    next_generation: AtomicU64,
    /// 有传输进入终态时唤醒 wait_idle
    idle: Arc<Notify>,
}

impl TransferCoordinator {
    pub fn new(driver: Arc<dyn TransferDriver>, hooks: Arc<dyn UploadHooks>) -> Self {
        Self {
            driver,
            transfers: Arc::new(DashMap::new()),
            hooks,
            next_generation: AtomicU64::new(1),
            idle: Arc::new(Notify::new()),
        }
    }

    /// 登记并立即启动传输
    ///
    /// 已存在同一 ID 时先取消旧传输，新传输从 0 开始，不复用任何状态
    pub fn register(&self, file_id: FileId, total_bytes: u64) -> UploadResult<()> {
        if self.transfers.contains_key(&file_id) {
            warn!("文件已有传输，取消后重新登记: file_id={}", file_id);
            self.unregister(&file_id);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut state = TransferState::new(file_id.clone());
        state.status = TransferStatus::Active;
        self.transfers.insert(
            file_id.clone(),
            TransferEntry {
                state,
                generation,
                handle: None,
            },
        );

        let on_progress = {
            let table = Arc::downgrade(&self.transfers);
            let hooks = self.hooks.clone();
            let file_id = file_id.clone();
            Box::new(move |percent: u8| -> Option<Deferred> {
                if !apply_progress(&table, &file_id, generation, percent) {
                    return None;
                }
                let hooks = hooks.clone();
                let file_id = file_id.clone();
                Some(Box::new(move || hooks.on_progress(&file_id, percent)))
            })
        };

        let on_complete = {
            let table = Arc::downgrade(&self.transfers);
            let hooks = self.hooks.clone();
            let idle = self.idle.clone();
            let file_id = file_id.clone();
            Box::new(move || -> Option<Deferred> {
                if !apply_completion(&table, &file_id, generation) {
                    idle.notify_waiters();
                    return None;
                }
                Some(Box::new(move || {
                    info!("传输完成: file_id={}", file_id);
                    hooks.on_transfer_complete(&file_id);
                    idle.notify_waiters();
                }))
            })
        };

        match self
            .driver
            .start(&file_id, total_bytes, on_progress, on_complete)
        {
            Ok(handle) => {
                let attached = match self.transfers.get_mut(&file_id) {
                    Some(mut entry) if entry.generation == generation => {
                        entry.handle = Some(handle.clone());
                        true
                    }
                    _ => false,
                };
                if !attached {
                    // 启动期间已被注销
                    handle.cancel();
                }
                info!(
                    "传输已登记: file_id={}, total_bytes={}, generation={}",
                    file_id, total_bytes, generation
                );
                Ok(())
            }
            Err(e) => {
                self.transfers
                    .remove_if(&file_id, |_, entry| entry.generation == generation);
                warn!("启动传输失败: file_id={}, 错误: {}", file_id, e);
                Err(e)
            }
        }
    }

    /// 注销传输
    ///
    /// 进行中的传输会被取消并返回 Cancelled 状态；未登记时返回 None。
    /// 返回后该文件不会再有任何进度/完成回调
    pub fn unregister(&self, file_id: &FileId) -> Option<TransferState> {
        let (_, entry) = self.transfers.remove(file_id)?;
        let mut state = entry.state;

        if let Some(handle) = entry.handle {
            handle.cancel();
        }

        if !state.status.is_terminal() {
            state.status = TransferStatus::Cancelled;
            info!(
                "传输已取消: file_id={}, progress={}%",
                file_id, state.progress_percent
            );
            self.hooks.on_transfer_cancelled(file_id);
        } else {
            debug!("注销已结束的传输: file_id={}, status={:?}", file_id, state.status);
        }

        self.idle.notify_waiters();
        Some(state)
    }

    /// 注销所有传输，返回各自的最终状态
    pub fn clear(&self) -> Vec<TransferState> {
        let ids: Vec<FileId> = self.transfers.iter().map(|e| e.key().clone()).collect();
        let states: Vec<TransferState> = ids.iter().filter_map(|id| self.unregister(id)).collect();
        if !states.is_empty() {
            info!("已清空 {} 个传输", states.len());
        }
        states
    }

    pub fn state(&self, file_id: &FileId) -> Option<TransferState> {
        self.transfers.get(file_id).map(|entry| entry.state.clone())
    }

    /// 所有传输状态的快照
    pub fn states(&self) -> HashMap<FileId, TransferState> {
        self.transfers
            .iter()
            .map(|entry| (entry.key().clone(), entry.state.clone()))
            .collect()
    }

    pub fn contains(&self, file_id: &FileId) -> bool {
        self.transfers.contains_key(file_id)
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// 进行中的传输数
    pub fn active_count(&self) -> usize {
        self.transfers
            .iter()
            .filter(|entry| entry.state.is_active())
            .count()
    }

    /// 等待直到没有进行中的传输
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for TransferCoordinator {
    fn drop(&mut self) {
        let handles: Vec<TransferHandle> = self
            .transfers
            .iter()
            .filter_map(|entry| entry.handle.clone())
            .collect();
        let cancelled = handles.iter().filter(|handle| handle.cancel()).count();
        if cancelled > 0 {
            info!("协调器销毁，已取消 {} 个进行中的传输", cancelled);
        }
    }
}

fn apply_progress(table: &Weak<TransferTable>, file_id: &FileId, generation: u64, percent: u8) -> bool {
    let Some(table) = table.upgrade() else {
        return false;
    };
    let Some(mut entry) = table.get_mut(file_id) else {
        return false;
    };
    if entry.generation != generation || !entry.state.is_active() {
        return false;
    }
    if percent > entry.state.progress_percent {
        entry.state.progress_percent = percent.min(100);
    }
    debug!("传输进度: file_id={}, progress={}%", file_id, percent);
    true
}

fn apply_completion(table: &Weak<TransferTable>, file_id: &FileId, generation: u64) -> bool {
    let Some(table) = table.upgrade() else {
        return false;
    };
    let Some(mut entry) = table.get_mut(file_id) else {
        return false;
    };
    if entry.generation != generation || !entry.state.is_active() {
        return false;
    }
    entry.state.progress_percent = 100;
    entry.state.status = TransferStatus::Completed;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;
    use crate::uploader::error::UploadError;
    use crate::uploader::events::{BroadcastHooks, NoopHooks, UploadEvent};
    use crate::uploader::simulator::SimulatedTransfer;
    use std::time::Duration;

    fn coordinator_with(hooks: Arc<dyn UploadHooks>) -> TransferCoordinator {
        let driver = SimulatedTransfer::new(SimulatorConfig {
            seed: Some(11),
            ..SimulatorConfig::default()
        });
        TransferCoordinator::new(Arc::new(driver), hooks)
    }

    fn coordinator() -> TransferCoordinator {
        coordinator_with(Arc::new(NoopHooks))
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_runs_to_completion() {
        let coordinator = coordinator();
        let id = FileId::from("a.pdf");
        coordinator.register(id.clone(), 102400).unwrap();

        let state = coordinator.state(&id).unwrap();
        assert_eq!(state.status, TransferStatus::Active);
        assert_eq!(state.progress_percent, 0);

        coordinator.wait_idle().await;

        let state = coordinator.state(&id).unwrap();
        assert!(state.completed());
        assert_eq!(state.progress_percent, 100);
        assert_eq!(coordinator.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_zero_bytes_fails() {
        let coordinator = coordinator();
        let id = FileId::from("empty");
        assert_eq!(
            coordinator.register(id.clone(), 0).unwrap_err(),
            UploadError::InvalidTotalSize
        );
        assert!(!coordinator.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_cancels() {
        let hooks = Arc::new(BroadcastHooks::new(1024));
        let mut rx = hooks.subscribe();
        let coordinator = coordinator_with(hooks.clone());
        let id = FileId::from("big.bin");
        coordinator.register(id.clone(), 5 * 1024 * 1024).unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        let state = coordinator.unregister(&id).unwrap();
        assert!(state.cancelled());
        assert!(state.progress_percent < 100);
        assert!(!coordinator.contains(&id));

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events.last(),
            Some(&UploadEvent::Cancelled { file_id: id.clone() })
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
        assert!(coordinator.state(&id).is_none());

        // 再次注销是空操作
        assert!(coordinator.unregister(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_completed_is_noop_transition() {
        let coordinator = coordinator();
        let id = FileId::from("small");
        coordinator.register(id.clone(), 10).unwrap();
        coordinator.wait_idle().await;

        let state = coordinator.unregister(&id).unwrap();
        assert!(state.completed());
        assert!(!state.cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregister_gets_fresh_state() {
        let coordinator = coordinator();
        let id = FileId::from("again");
        coordinator.register(id.clone(), 100).unwrap();
        coordinator.wait_idle().await;
        assert!(coordinator.state(&id).unwrap().completed());

        coordinator.unregister(&id);
        coordinator.register(id.clone(), 5 * 1024 * 1024).unwrap();
        let state = coordinator.state(&id).unwrap();
        assert_eq!(state.progress_percent, 0);
        assert!(state.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_everything() {
        let coordinator = coordinator();
        for i in 0..4 {
            coordinator
                .register(FileId::from(format!("f{}", i)), 4 * 1024 * 1024)
                .unwrap();
        }
        assert_eq!(coordinator.active_count(), 4);

        let states = coordinator.clear();
        assert_eq!(states.len(), 4);
        assert!(states.iter().all(|s| s.cancelled()));
        assert!(coordinator.is_empty());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(coordinator.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_outstanding() {
        let hooks = Arc::new(BroadcastHooks::new(1024));
        let mut rx = hooks.subscribe();
        {
            let coordinator = coordinator_with(hooks.clone());
            coordinator.register(FileId::from("x"), 4 * 1024 * 1024).unwrap();
        }
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events_monotonic_per_file() {
        let hooks = Arc::new(BroadcastHooks::new(4096));
        let mut rx = hooks.subscribe();
        let coordinator = coordinator_with(hooks.clone());
        let ids: Vec<FileId> = (0..3).map(|i| FileId::from(format!("f{}", i))).collect();
        for id in &ids {
            coordinator.register(id.clone(), 3 * 1024 * 1024).unwrap();
        }
        coordinator.wait_idle().await;

        let mut per_file: HashMap<FileId, Vec<u8>> = HashMap::new();
        let mut completions: HashMap<FileId, usize> = HashMap::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                UploadEvent::Progress { file_id, progress } => {
                    assert!(!completions.contains_key(&file_id));
                    per_file.entry(file_id).or_default().push(progress);
                }
                UploadEvent::Completed { file_id } => {
                    *completions.entry(file_id).or_default() += 1;
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }

        for id in &ids {
            let progress = &per_file[id];
            assert!(progress.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(progress.last(), Some(&100));
            assert_eq!(completions[id], 1);
        }
    }
}

// 上传会话
//
// 组合根：准入校验 -> 文件注册表 -> 传输协调器，
// 对外提供合并视图（文件 × 传输状态）和最近一次的拒绝原因

use super::admission::{admit, AdmissionResult, Rejection};
use super::classifier::{is_pdf, FileCategory};
use super::coordinator::{TransferCoordinator, TransferState};
use super::error::UploadResult;
use super::events::UploadHooks;
use super::file::{CandidateFile, FileId, FileOrigin, FileRecord};
use super::registry::FileRegistry;
use super::simulator::{SimulatedTransfer, TransferDriver};
use crate::config::{AppConfig, UploadConfig};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// 文件的传输视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferView {
    /// 本地文件，由协调器跟踪
    Tracked(TransferState),
    /// 远程文件，视为已完成
    PreCompleted,
}

/// 合并视图中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileView {
    pub file: FileRecord,
    pub transfer: TransferView,
}

impl FileView {
    pub fn progress(&self) -> u8 {
        match &self.transfer {
            TransferView::Tracked(state) => state.progress_percent,
            TransferView::PreCompleted => 100,
        }
    }

    pub fn is_completed(&self) -> bool {
        match &self.transfer {
            TransferView::Tracked(state) => state.completed(),
            TransferView::PreCompleted => true,
        }
    }

    pub fn category(&self) -> FileCategory {
        self.file.category()
    }
}

/// 上传会话
pub struct UploadSession {
    config: UploadConfig,
    registry: RwLock<FileRegistry>,
    coordinator: TransferCoordinator,
    last_rejections: Mutex<Vec<Rejection>>,
    hooks: Arc<dyn UploadHooks>,
}

impl UploadSession {
    /// 使用指定的传输驱动创建会话
    pub fn new(
        config: UploadConfig,
        driver: Arc<dyn TransferDriver>,
        hooks: Arc<dyn UploadHooks>,
    ) -> Self {
        info!(
            "创建上传会话: max_files={}, max_size_bytes={}",
            config.max_files, config.max_size_bytes
        );
        Self {
            config,
            registry: RwLock::new(FileRegistry::new()),
            coordinator: TransferCoordinator::new(driver, hooks.clone()),
            last_rejections: Mutex::new(Vec::new()),
            hooks,
        }
    }

    /// 使用模拟传输创建会话
    pub fn from_config(config: &AppConfig, hooks: Arc<dyn UploadHooks>) -> Self {
        let driver = Arc::new(SimulatedTransfer::new(config.simulator.clone()));
        Self::new(config.upload.clone(), driver, hooks)
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// 提交一批候选文件
    ///
    /// 通过的本地文件同时写入注册表并启动传输，远程文件只写入注册表。
    /// 返回前注册表已经更新，随后的 view() 一定能看到新文件。
    /// 启动传输失败时回滚本批的全部改动
    pub fn submit(&self, candidates: Vec<CandidateFile>) -> UploadResult<AdmissionResult> {
        let total = candidates.len();
        let mut registry = self.registry.write();
        let result = admit(candidates, registry.files(), &self.config);

        let records: Vec<FileRecord> = result
            .admitted
            .iter()
            .cloned()
            .map(FileRecord::from_candidate)
            .collect();
        registry.add(records.iter().cloned());

        let mut started: Vec<&FileId> = Vec::new();
        let mut failure = None;
        for record in records.iter().filter(|r| r.is_local()) {
            if let Err(e) = self.coordinator.register(record.id.clone(), record.size) {
                failure = Some(e);
                break;
            }
            started.push(&record.id);
        }

        if let Some(e) = failure {
            warn!("启动传输失败，回滚本批 {} 个文件: {}", records.len(), e);
            for record in &records {
                registry.remove(&record.id);
            }
            // 取消传输要拿传输闸门，先释放注册表锁
            drop(registry);
            for id in started {
                self.coordinator.unregister(id);
            }
            return Err(e);
        }
        drop(registry);

        info!(
            "提交候选文件: total={}, admitted={}, rejected={}",
            total,
            result.admitted.len(),
            result.rejected.len()
        );

        *self.last_rejections.lock() = result.rejected.clone();

        if !records.is_empty() {
            self.hooks.on_admitted(&records);
        }
        if !result.rejected.is_empty() {
            for rejection in &result.rejected {
                warn!("拒绝文件: {}", rejection.message());
            }
            self.hooks.on_rejected(&result.rejected);
        }

        Ok(result)
    }

    /// 删除文件并取消其传输（不存在时为空操作）
    pub fn remove(&self, id: &FileId) -> Option<FileRecord> {
        let removed = self.registry.write().remove(id);
        self.coordinator.unregister(id);
        if let Some(record) = &removed {
            info!("已删除文件: id={}, name={}", record.id, record.name);
        }
        removed
    }

    /// 清空全部文件并取消所有传输，返回被清除的文件数
    pub fn clear_all(&self) -> usize {
        let removed = self.registry.write().clear();
        let cancelled = self
            .coordinator
            .clear()
            .iter()
            .filter(|state| state.cancelled())
            .count();
        self.last_rejections.lock().clear();
        info!("已清空会话: files={}, cancelled={}", removed.len(), cancelled);
        removed.len()
    }

    /// 合并视图（保持注册表顺序）
    pub fn view(&self) -> Vec<FileView> {
        let registry = self.registry.read();
        let mut states = self.coordinator.states();
        registry
            .files()
            .iter()
            .map(|file| FileView {
                file: file.clone(),
                transfer: match states.remove(&file.id) {
                    Some(state) => TransferView::Tracked(state),
                    None => TransferView::PreCompleted,
                },
            })
            .collect()
    }

    /// 单个文件的视图
    pub fn file(&self, id: &FileId) -> Option<FileView> {
        let registry = self.registry.read();
        let file = registry.get(id)?.clone();
        let transfer = match self.coordinator.state(id) {
            Some(state) => TransferView::Tracked(state),
            None => TransferView::PreCompleted,
        };
        Some(FileView { file, transfer })
    }

    /// 最近一次提交的拒绝原因
    pub fn last_rejections(&self) -> Vec<Rejection> {
        self.last_rejections.lock().clone()
    }

    /// PDF 预览地址
    ///
    /// 只有 PDF（媒体类型含 pdf 或扩展名为 .pdf）可预览，
    /// .doc/.docx 等其他文档类型始终返回 None。
    /// 远程文件直接返回 URL；本地文件需传输完成后才返回由句柄派生的地址
    pub fn preview_url(&self, id: &FileId) -> Option<String> {
        let view = self.file(id)?;
        if !is_pdf(&view.file.media_type, &view.file.name) {
            return None;
        }
        match &view.file.origin {
            FileOrigin::Remote { url } => Some(url.clone()),
            FileOrigin::Local { handle } if view.is_completed() => Some(handle.to_url()),
            FileOrigin::Local { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// 进行中的传输数
    pub fn active_transfers(&self) -> usize {
        self.coordinator.active_count()
    }

    /// 等待所有传输结束
    pub async fn wait_idle(&self) {
        self.coordinator.wait_idle().await
    }
}

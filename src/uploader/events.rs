//! 上传事件与回调注入点
//!
//! 会话本身不直接做任何界面/全局副作用（提示、跳转），
//! 而是通过 [`UploadHooks`] 把事件交给调用方处理

use super::admission::Rejection;
use super::file::{FileId, FileRecord};
use serde::Serialize;
use tokio::sync::broadcast;

/// 会话回调注入点
///
/// 所有方法都有默认空实现，按需覆盖。
/// 回调在会话内部锁和传输闸门之外执行，可以在回调中再次调用会话方法，
/// 包括删除或清空其他文件
pub trait UploadHooks: Send + Sync {
    /// 一批文件准入成功
    fn on_admitted(&self, _files: &[FileRecord]) {}

    /// 一批候选中有文件被拒绝
    fn on_rejected(&self, _rejections: &[Rejection]) {}

    /// 传输进度变化
    fn on_progress(&self, _file_id: &FileId, _percent: u8) {}

    /// 传输完成
    fn on_transfer_complete(&self, _file_id: &FileId) {}

    /// 进行中的传输被取消
    fn on_transfer_cancelled(&self, _file_id: &FileId) {}
}

/// 不做任何事的回调
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl UploadHooks for NoopHooks {}

/// 上传事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 文件准入
    Admitted {
        file_id: FileId,
        name: String,
        size: u64,
        is_local: bool,
    },
    /// 候选文件被拒绝
    Rejected { name: String, message: String },
    /// 进度更新
    Progress { file_id: FileId, progress: u8 },
    /// 传输完成
    Completed { file_id: FileId },
    /// 传输取消
    Cancelled { file_id: FileId },
}

impl UploadEvent {
    /// 获取文件 ID（拒绝事件没有 ID）
    pub fn file_id(&self) -> Option<&FileId> {
        match self {
            UploadEvent::Admitted { file_id, .. } => Some(file_id),
            UploadEvent::Rejected { .. } => None,
            UploadEvent::Progress { file_id, .. } => Some(file_id),
            UploadEvent::Completed { file_id } => Some(file_id),
            UploadEvent::Cancelled { file_id } => Some(file_id),
        }
    }

    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            UploadEvent::Admitted { .. } => "admitted",
            UploadEvent::Rejected { .. } => "rejected",
            UploadEvent::Progress { .. } => "progress",
            UploadEvent::Completed { .. } => "completed",
            UploadEvent::Cancelled { .. } => "cancelled",
        }
    }
}

/// 默认广播缓冲区大小
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// 把回调转成广播事件
///
/// 没有订阅者时事件直接丢弃
#[derive(Debug, Clone)]
pub struct BroadcastHooks {
    sender: broadcast::Sender<UploadEvent>,
}

impl BroadcastHooks {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: UploadEvent) {
        // 没有接收者时 send 返回错误，属于正常情况
        let _ = self.sender.send(event);
    }
}

impl Default for BroadcastHooks {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl UploadHooks for BroadcastHooks {
    fn on_admitted(&self, files: &[FileRecord]) {
        for file in files {
            self.publish(UploadEvent::Admitted {
                file_id: file.id.clone(),
                name: file.name.clone(),
                size: file.size,
                is_local: file.is_local(),
            });
        }
    }

    fn on_rejected(&self, rejections: &[Rejection]) {
        for rejection in rejections {
            self.publish(UploadEvent::Rejected {
                name: rejection.candidate.name.clone(),
                message: rejection.reason.to_string(),
            });
        }
    }

    fn on_progress(&self, file_id: &FileId, percent: u8) {
        self.publish(UploadEvent::Progress {
            file_id: file_id.clone(),
            progress: percent,
        });
    }

    fn on_transfer_complete(&self, file_id: &FileId) {
        self.publish(UploadEvent::Completed {
            file_id: file_id.clone(),
        });
    }

    fn on_transfer_cancelled(&self, file_id: &FileId) {
        self.publish(UploadEvent::Cancelled {
            file_id: file_id.clone(),
        });
    }
}

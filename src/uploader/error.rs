// 上传核心错误类型

/// 上传核心错误
///
/// 校验失败（容量、大小、重复）不属于错误，见 [`RejectReason`](super::admission::RejectReason)
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// 传输总字节数为 0，进度百分比无意义（调用方缺陷）
    #[error("无法为 0 字节文件创建传输")]
    InvalidTotalSize,
    /// 当前线程不在 tokio 运行时中，无法调度传输步骤
    #[error("没有可用的 tokio 运行时，无法启动传输")]
    NoRuntime,
}

pub type UploadResult<T> = std::result::Result<T, UploadError>;

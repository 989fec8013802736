// Document Uploader Rust Library
// 文档上传编排核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 上传核心模块
pub mod uploader;

// 导出常用类型
pub use config::{AppConfig, LogConfig, SimulatorConfig, UploadConfig};
pub use uploader::{
    AdmissionResult, BroadcastHooks, CandidateFile, FileId, FileRecord, FileView, RejectReason,
    TransferStatus, UploadError, UploadEvent, UploadHooks, UploadSession,
};

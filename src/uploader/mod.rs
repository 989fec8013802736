// 上传核心模块
//
// - 文件分类与准入校验（数量、大小、重复）
// - 有序文件注册表
// - 可取消的传输模拟器（与真实分片上传相同的接口）
// - 传输协调器：每个本地文件一个传输，删除/清空时取消
// - 上传会话：组合以上组件，对外提供合并视图

pub mod admission;
pub mod classifier;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod file;
pub mod registry;
pub mod session;
pub mod simulator;

pub use admission::{admit, AdmissionResult, RejectReason, Rejection};
pub use classifier::{classify, format_bytes, is_pdf, FileCategory};
pub use coordinator::{TransferCoordinator, TransferState, TransferStatus};
pub use error::{UploadError, UploadResult};
pub use events::{BroadcastHooks, NoopHooks, UploadEvent, UploadHooks};
pub use file::{CandidateFile, FileId, FileOrigin, FileRecord, LocalHandle};
pub use registry::FileRegistry;
pub use session::{FileView, TransferView, UploadSession};
pub use simulator::{
    CompleteCallback, Deferred, ProgressCallback, SimulatedTransfer, TransferDriver,
    TransferHandle,
};

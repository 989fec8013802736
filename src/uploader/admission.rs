// 文件准入校验
//
// 按提交顺序逐个检查候选文件：
// 1. 容量（已有 + 本批已准入 >= max_files）
// 2. 单文件大小
// 3. 重复（同名同大小）
// 4. 空的本地文件
//
// 本批先准入的文件会占用后续候选的容量，不做任何重排

use super::classifier::format_bytes;
use super::file::{CandidateFile, FileRecord};
use crate::config::UploadConfig;
use serde::Serialize;

/// 拒绝原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// 已达到文件数量上限
    #[error("最多只能上传 {max_files} 个文件")]
    CapacityExceeded { max_files: usize },
    /// 文件超过大小上限
    #[error("文件大小 {} 超过上限 {}", human(.size), human(.max_size))]
    FileTooLarge { size: u64, max_size: u64 },
    /// 同名同大小文件已存在
    #[error("文件已存在")]
    Duplicate,
    /// 本地文件为空，无法传输
    #[error("文件为空")]
    EmptyFile,
}

fn human(bytes: &u64) -> String {
    format_bytes(*bytes, 2)
}

/// 一条拒绝记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub candidate: CandidateFile,
    pub reason: RejectReason,
}

impl Rejection {
    /// 展示给用户的文字
    pub fn message(&self) -> String {
        format!("\"{}\": {}", self.candidate.name, self.reason)
    }
}

/// 一次准入的结果（不持久化）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionResult {
    /// 通过的候选文件（保持提交顺序）
    pub admitted: Vec<CandidateFile>,
    /// 被拒绝的候选文件及原因（保持提交顺序）
    pub rejected: Vec<Rejection>,
}

impl AdmissionResult {
    pub fn is_fully_admitted(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        self.rejected.iter().map(Rejection::message).collect()
    }
}

/// 对一批候选文件做准入判断
///
/// 纯函数：不修改注册表，只返回通过和拒绝两个列表
pub fn admit(
    candidates: Vec<CandidateFile>,
    current: &[FileRecord],
    config: &UploadConfig,
) -> AdmissionResult {
    let mut result = AdmissionResult {
        admitted: Vec::with_capacity(candidates.len()),
        rejected: Vec::new(),
    };

    for candidate in candidates {
        match check(&candidate, current, &result.admitted, config) {
            Some(reason) => result.rejected.push(Rejection { candidate, reason }),
            None => result.admitted.push(candidate),
        }
    }

    result
}

fn check(
    candidate: &CandidateFile,
    current: &[FileRecord],
    admitted: &[CandidateFile],
    config: &UploadConfig,
) -> Option<RejectReason> {
    if current.len() + admitted.len() >= config.max_files {
        return Some(RejectReason::CapacityExceeded {
            max_files: config.max_files,
        });
    }

    if candidate.size > config.max_size_bytes {
        return Some(RejectReason::FileTooLarge {
            size: candidate.size,
            max_size: config.max_size_bytes,
        });
    }

    let duplicate = current
        .iter()
        .any(|record| candidate.same_file(&record.name, record.size))
        || admitted
            .iter()
            .any(|other| candidate.same_file(&other.name, other.size));
    if duplicate {
        return Some(RejectReason::Duplicate);
    }

    if candidate.size == 0 && candidate.origin.is_local() {
        return Some(RejectReason::EmptyFile);
    }

    None
}

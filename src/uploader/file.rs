// 文件记录定义
//
// 本地选择的文件与已存在的远程文件统一为 FileOrigin 标签变体，在准入时一次性确定

use super::classifier::{classify, FileCategory};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// 文件ID（会话内唯一且稳定）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// 生成新的随机ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FileId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 本地文件句柄
///
/// 由文件选择方持有和释放，上传核心只读取，不负责清理
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalHandle {
    path: PathBuf,
}

impl LocalHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 由本地路径生成可解析的 file:// URL（逐段百分号编码）
    pub fn to_url(&self) -> String {
        let raw = self.path.to_string_lossy().replace('\\', "/");
        let encoded: Vec<String> = raw
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        let joined = encoded.join("/");
        if joined.starts_with('/') {
            format!("file://{}", joined)
        } else {
            format!("file:///{}", joined)
        }
    }
}

/// 文件来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "lowercase")]
pub enum FileOrigin {
    /// 用户本地选择，需要传输
    Local { handle: LocalHandle },
    /// 已存在于远端，视为已传输完成
    Remote { url: String },
}

impl FileOrigin {
    pub fn is_local(&self) -> bool {
        matches!(self, FileOrigin::Local { .. })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, FileOrigin::Remote { .. })
    }
}

/// 待准入的候选文件（文件选择/拖放方每次操作提交一批）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFile {
    /// 文件名
    pub name: String,
    /// 文件大小（字节）
    pub size: u64,
    /// 媒体类型（MIME）
    pub media_type: String,
    /// 来源
    pub origin: FileOrigin,
}

impl CandidateFile {
    /// 创建本地候选文件
    pub fn local(
        name: impl Into<String>,
        size: u64,
        media_type: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            media_type: media_type.into(),
            origin: FileOrigin::Local {
                handle: LocalHandle::new(path),
            },
        }
    }

    /// 创建远程（已存在）候选文件
    pub fn remote(
        name: impl Into<String>,
        size: u64,
        media_type: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            media_type: media_type.into(),
            origin: FileOrigin::Remote { url: url.into() },
        }
    }

    /// 名称和大小都相同即视为同一文件
    pub fn same_file(&self, name: &str, size: u64) -> bool {
        self.name == name && self.size == size
    }
}

/// 已准入的文件记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// 文件ID
    pub id: FileId,
    /// 文件名
    pub name: String,
    /// 文件大小
    pub size: u64,
    /// 媒体类型
    pub media_type: String,
    /// 来源
    pub origin: FileOrigin,
    /// 准入时间 (Unix timestamp)
    pub added_at: i64,
}

impl FileRecord {
    /// 由候选文件创建记录，分配新ID
    pub fn from_candidate(candidate: CandidateFile) -> Self {
        Self::with_id(FileId::generate(), candidate)
    }

    pub fn with_id(id: FileId, candidate: CandidateFile) -> Self {
        Self {
            id,
            name: candidate.name,
            size: candidate.size,
            media_type: candidate.media_type,
            origin: candidate.origin,
            added_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn category(&self) -> FileCategory {
        classify(&self.media_type, &self.name)
    }

    pub fn is_local(&self) -> bool {
        self.origin.is_local()
    }

    /// 可解析的地址：远程文件直接返回 URL，本地文件由句柄派生
    pub fn resolve_url(&self) -> String {
        match &self.origin {
            FileOrigin::Local { handle } => handle.to_url(),
            FileOrigin::Remote { url } => url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_unique() {
        let a = FileId::generate();
        let b = FileId::generate();
        assert_ne!(a, b);
        assert_eq!(FileId::from("example-123").as_str(), "example-123");
    }

    #[test]
    fn test_record_from_candidate() {
        let candidate = CandidateFile::local("a.pdf", 102400, "application/pdf", "/tmp/a.pdf");
        let record = FileRecord::from_candidate(candidate);

        assert_eq!(record.name, "a.pdf");
        assert_eq!(record.size, 102400);
        assert!(record.is_local());
        assert_eq!(record.category(), FileCategory::Document);
        assert!(record.added_at > 0);
    }

    #[test]
    fn test_resolve_url() {
        let remote = FileRecord::from_candidate(CandidateFile::remote(
            "intro.zip",
            252873,
            "application/zip",
            "https://example.com/intro.zip",
        ));
        assert_eq!(remote.resolve_url(), "https://example.com/intro.zip");

        let local = FileRecord::from_candidate(CandidateFile::local(
            "my doc.pdf",
            10,
            "application/pdf",
            "/home/user/my doc.pdf",
        ));
        assert_eq!(local.resolve_url(), "file:///home/user/my%20doc.pdf");
    }

    #[test]
    fn test_same_file() {
        let candidate = CandidateFile::local("a.pdf", 10, "application/pdf", "/a.pdf");
        assert!(candidate.same_file("a.pdf", 10));
        assert!(!candidate.same_file("a.pdf", 11));
        assert!(!candidate.same_file("b.pdf", 10));
    }
}

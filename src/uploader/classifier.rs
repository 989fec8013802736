// 文件分类
//
// 按媒体类型和文件名后缀把文件归入展示类别，规则按顺序匹配，先命中者优先

use serde::{Deserialize, Serialize};

/// 文件展示类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    /// 文档（pdf / word）
    Document,
    /// 压缩包
    Archive,
    /// 表格
    Spreadsheet,
    /// 视频
    Video,
    /// 音频
    Audio,
    /// 图片
    Image,
    /// 其他
    Other,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Document => "document",
            FileCategory::Archive => "archive",
            FileCategory::Spreadsheet => "spreadsheet",
            FileCategory::Video => "video",
            FileCategory::Audio => "audio",
            FileCategory::Image => "image",
            FileCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for FileCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条分类规则：媒体类型子串 + 文件名后缀
struct Rule {
    category: FileCategory,
    type_contains: &'static [&'static str],
    type_prefix: &'static [&'static str],
    name_suffix: &'static [&'static str],
}

impl Rule {
    fn matches(&self, media_type: &str, name: &str) -> bool {
        self.type_contains.iter().any(|s| media_type.contains(s))
            || self.type_prefix.iter().any(|s| media_type.starts_with(s))
            || self.name_suffix.iter().any(|s| name.ends_with(s))
    }
}

/// 规则表，顺序即优先级
const RULES: &[Rule] = &[
    Rule {
        category: FileCategory::Document,
        type_contains: &["pdf", "word"],
        type_prefix: &[],
        name_suffix: &[".pdf", ".doc", ".docx"],
    },
    Rule {
        category: FileCategory::Archive,
        type_contains: &["zip", "archive"],
        type_prefix: &[],
        name_suffix: &[".zip", ".rar"],
    },
    Rule {
        category: FileCategory::Spreadsheet,
        type_contains: &["excel"],
        type_prefix: &[],
        name_suffix: &[".xls", ".xlsx"],
    },
    Rule {
        category: FileCategory::Video,
        type_contains: &["video/"],
        type_prefix: &[],
        name_suffix: &[],
    },
    Rule {
        category: FileCategory::Audio,
        type_contains: &["audio/"],
        type_prefix: &[],
        name_suffix: &[],
    },
    Rule {
        category: FileCategory::Image,
        type_contains: &[],
        type_prefix: &["image/"],
        name_suffix: &[],
    },
];

/// 根据媒体类型和文件名判断文件类别（大小写不敏感）
///
/// 没有规则命中时返回 [`FileCategory::Other`]
pub fn classify(media_type: &str, name: &str) -> FileCategory {
    let media_type = media_type.to_ascii_lowercase();
    let name = name.to_ascii_lowercase();

    RULES
        .iter()
        .find(|rule| rule.matches(&media_type, &name))
        .map(|rule| rule.category)
        .unwrap_or(FileCategory::Other)
}

/// 是否可以交给 PDF 查看器预览
pub fn is_pdf(media_type: &str, name: &str) -> bool {
    media_type.to_ascii_lowercase().contains("pdf") || name.to_ascii_lowercase().ends_with(".pdf")
}

const SIZE_UNITS: [&str; 7] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB"];

/// 格式化字节数（1024 进制），末尾多余的 0 会被去掉
///
/// ```
/// use document_uploader_rust::uploader::format_bytes;
/// assert_eq!(format_bytes(102400, 2), "100 KB");
/// assert_eq!(format_bytes(252873, 2), "246.95 KB");
/// ```
pub fn format_bytes(bytes: u64, decimals: usize) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let mut text = format!("{:.*}", decimals, value);
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    format!("{} {}", text, SIZE_UNITS[unit])
}

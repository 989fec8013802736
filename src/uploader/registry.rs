// 文件注册表
//
// 已准入文件的唯一数据源，保持插入顺序，不做排序

use super::file::{FileId, FileRecord};

/// 已准入文件的有序集合
///
/// ID 的唯一性由准入流程保证，注册表只做追加/删除
#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    files: Vec<FileRecord>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一批文件（保持顺序）
    pub fn add(&mut self, files: impl IntoIterator<Item = FileRecord>) {
        for file in files {
            debug_assert!(
                !self.contains(&file.id),
                "重复的文件ID: {}",
                file.id
            );
            self.files.push(file);
        }
    }

    /// 按ID删除，不存在时为空操作
    pub fn remove(&mut self, id: &FileId) -> Option<FileRecord> {
        let index = self.files.iter().position(|f| &f.id == id)?;
        Some(self.files.remove(index))
    }

    /// 清空全部文件，返回被清除的记录
    pub fn clear(&mut self) -> Vec<FileRecord> {
        std::mem::take(&mut self.files)
    }

    /// 当前文件的有序快照
    pub fn snapshot(&self) -> Vec<FileRecord> {
        self.files.clone()
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn get(&self, id: &FileId) -> Option<&FileRecord> {
        self.files.iter().find(|f| &f.id == id)
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

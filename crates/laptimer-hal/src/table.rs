//! 文件/记录表
//!
//! 内存中的 `file_id -> record_id -> words` 映射，带总记录数上限。
//! 测试替身与主机持久化存储共用这一份语义：
//!
//! - 新记录在总数达到上限时写入失败；覆盖已有记录总是允许
//! - 覆盖写入时记录长度取新旧长度的较大值
//! - 删除不存在的文件/记录返回 `false`

use crate::flash::{FileId, RecordId};
use std::collections::BTreeMap;

type Records = BTreeMap<RecordId, Vec<u32>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(
    any(feature = "serde", feature = "file-store"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct RecordTable {
    files: BTreeMap<FileId, Records>,
    total_records: usize,
    record_capacity: usize,
}

impl RecordTable {
    pub fn new(record_capacity: usize) -> Self {
        Self {
            files: BTreeMap::new(),
            total_records: 0,
            record_capacity,
        }
    }

    pub fn total_records(&self) -> usize {
        self.total_records
    }

    pub fn record_capacity(&self) -> usize {
        self.record_capacity
    }

    /// 写入记录，超出容量时返回 `false` 且不修改表
    pub fn write(&mut self, file_id: FileId, record_id: RecordId, data: &[u32]) -> bool {
        let exists = self
            .files
            .get(&file_id)
            .is_some_and(|records| records.contains_key(&record_id));
        if !exists {
            if self.total_records >= self.record_capacity {
                return false;
            }
            self.total_records += 1;
        }

        let record = self
            .files
            .entry(file_id)
            .or_default()
            .entry(record_id)
            .or_default();
        if record.len() < data.len() {
            record.resize(data.len(), 0);
        }
        record[..data.len()].copy_from_slice(data);
        true
    }

    pub fn read(&self, file_id: FileId, record_id: RecordId) -> Option<&[u32]> {
        self.files
            .get(&file_id)
            .and_then(|records| records.get(&record_id))
            .map(Vec::as_slice)
    }

    pub fn delete_file(&mut self, file_id: FileId) -> bool {
        match self.files.remove(&file_id) {
            Some(records) => {
                self.total_records -= records.len();
                true
            },
            None => false,
        }
    }

    pub fn delete_record(&mut self, file_id: FileId, record_id: RecordId) -> bool {
        let Some(records) = self.files.get_mut(&file_id) else {
            return false;
        };
        if records.remove(&record_id).is_none() {
            return false;
        }
        self.total_records -= 1;
        if records.is_empty() {
            self.files.remove(&file_id);
        }
        true
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.total_records = 0;
    }

    pub fn for_each(&self, visitor: &mut dyn FnMut(FileId, RecordId, &[u32])) {
        for (file_id, records) in &self.files {
            for (record_id, data) in records {
                visitor(*file_id, *record_id, data);
            }
        }
    }
}

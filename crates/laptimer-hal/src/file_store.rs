//! 主机持久化 Flash 存储
//!
//! 把 [`RecordTable`] 以 JSON 形式保存在单个文件中，每次修改后整体落盘
//! （先写临时文件再 rename）。修改先作用于副本，落盘成功后才替换内存中的表，
//! 落盘失败时内存与磁盘保持一致。同一文件只允许一个进程打开：打开时对
//! `<path>.lock` 加排他文件锁，锁随 [`FileFlashStore`] drop 释放。

use crate::flash::{FileId, FlashStore, FlashStoreDelegate, RecordId};
use crate::table::RecordTable;
use crate::HalError;
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct FileFlashStore {
    path: PathBuf,
    table: RecordTable,
    delegate: Option<Arc<dyn FlashStoreDelegate>>,
    lock: File,
}

impl FileFlashStore {
    /// 打开（或创建）存储文件
    ///
    /// 已存在的文件沿用其中记录的容量；`record_capacity` 只用于新建。
    pub fn open(path: impl AsRef<Path>, record_capacity: usize) -> Result<Self, HalError> {
        let path = path.as_ref().to_path_buf();
        let lock_path = lock_path_for(&path);

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(&lock_path)?;
        if !lock.try_lock_exclusive()? {
            return Err(HalError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("flash store {} is locked by another process", path.display()),
            )));
        }

        let table = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| HalError::Serialization(e.to_string()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => RecordTable::new(record_capacity),
            Err(e) => return Err(e.into()),
        };
        info!(
            path = %path.display(),
            records = table.total_records(),
            capacity = table.record_capacity(),
            "Flash store opened"
        );

        Ok(Self {
            path,
            table,
            delegate: None,
            lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn total_records(&self) -> usize {
        self.table.total_records()
    }

    fn persist(&self, table: &RecordTable) -> Result<(), HalError> {
        let bytes =
            serde_json::to_vec(table).map_err(|e| HalError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        debug!(records = table.total_records(), "Flash store persisted");
        Ok(())
    }

    /// 在副本上修改并落盘；未修改或落盘失败时返回 `false`，内存中的表不变
    fn commit(&mut self, change: impl FnOnce(&mut RecordTable) -> bool) -> bool {
        let mut next = self.table.clone();
        if !change(&mut next) {
            return false;
        }
        match self.persist(&next) {
            Ok(()) => {
                self.table = next;
                true
            },
            Err(e) => {
                error!(path = %self.path.display(), "Failed to persist flash store: {}", e);
                false
            },
        }
    }

    fn notify(&self, f: impl FnOnce(&dyn FlashStoreDelegate)) {
        if let Some(delegate) = &self.delegate {
            f(delegate.as_ref());
        }
    }
}

impl Drop for FileFlashStore {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock);
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

impl FlashStore for FileFlashStore {
    fn set_delegate(&mut self, delegate: Arc<dyn FlashStoreDelegate>) {
        self.delegate = Some(delegate);
    }

    fn initialize(&mut self) -> Result<(), HalError> {
        self.notify(|d| d.on_initialized(true));
        Ok(())
    }

    fn collect_garbage(&mut self) -> Result<(), HalError> {
        // 记录表没有墓碑，回收只需确认数据已落盘
        let success = self.commit(|_| true);
        self.notify(|d| d.on_garbage_collected(success));
        Ok(())
    }

    fn delete_all_files(&mut self) -> Result<(), HalError> {
        let success = self.commit(|table| {
            table.clear();
            true
        });
        self.notify(|d| d.on_all_files_deleted(success));
        Ok(())
    }

    fn delete_file(&mut self, file_id: FileId) -> Result<(), HalError> {
        let success = self.commit(|table| table.delete_file(file_id));
        self.notify(|d| d.on_file_deleted(success, file_id));
        Ok(())
    }

    fn delete_record(&mut self, file_id: FileId, record_id: RecordId) -> Result<(), HalError> {
        let success = self.commit(|table| table.delete_record(file_id, record_id));
        self.notify(|d| d.on_record_deleted(success, file_id, record_id));
        Ok(())
    }

    fn read_record(
        &self,
        file_id: FileId,
        record_id: RecordId,
        data: &mut [u32],
    ) -> Result<usize, HalError> {
        let record = self
            .table
            .read(file_id, record_id)
            .ok_or(HalError::NotFound { file_id, record_id })?;
        let words = data.len().min(record.len());
        data[..words].copy_from_slice(&record[..words]);
        Ok(words)
    }

    fn write_record(
        &mut self,
        file_id: FileId,
        record_id: RecordId,
        data: &[u32],
    ) -> Result<(), HalError> {
        let success = self.commit(|table| table.write(file_id, record_id, data));
        self.notify(|d| d.on_record_written(success, file_id, record_id));
        Ok(())
    }

    fn iterate_records(
        &self,
        visitor: &mut dyn FnMut(FileId, RecordId, &[u32]),
    ) -> Result<(), HalError> {
        self.table.for_each(visitor);
        Ok(())
    }
}

//! ARIES-style write-ahead log (spec.md §4.3), grounded on the teacher's
//! `transaction::log_aries::LogManager`: append-only record stream with a
//! checkpoint pointer at offset 0, analysis/redo/undo recovery.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::buffer_pool::{BufferPool, FileId, PageKey};
use crate::engine_err;
use crate::error::{EngineResult, ErrorKind};
use crate::txn::{Transaction, TransactionId};

const NO_CHECKPOINT: u64 = 0;
const HEADER_LEN: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordType {
    Abort,
    Commit,
    Update,
    Start,
    Checkpoint,
}

impl RecordType {
    fn from_u8(value: u8) -> EngineResult<Self> {
        Ok(match value {
            0 => RecordType::Abort,
            1 => RecordType::Commit,
            2 => RecordType::Update,
            3 => RecordType::Start,
            4 => RecordType::Checkpoint,
            other => return Err(engine_err!(ErrorKind::Unexpected, "invalid log record type {}", other)),
        })
    }
}

enum Record {
    Start { tx: TransactionId },
    Commit { tx: TransactionId },
    Abort { tx: TransactionId },
    Update { tx: TransactionId, page: PageKey, before: Vec<u8>, after: Vec<u8> },
    Checkpoint { active: Vec<TransactionId> },
}

pub struct LogManager {
    file: File,
    current_offset: u64,
    total_records: usize,
}

impl LogManager {
    pub fn new<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let size = file.metadata()?.len();
        let mut mgr = Self { file, current_offset: size, total_records: 0 };
        if size == 0 {
            mgr.reset_file()?;
        }
        Ok(mgr)
    }

    pub fn records_count(&self) -> usize {
        self.total_records
    }

    pub fn reset(&mut self) -> EngineResult<()> {
        self.reset_file()
    }

    fn reset_file(&mut self) -> EngineResult<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.write_u64(NO_CHECKPOINT)?;
        self.current_offset = self.file.stream_position()?;
        self.total_records = 0;
        Ok(())
    }

    fn pre_append(&mut self) -> EngineResult<()> {
        self.total_records += 1;
        if self.file.metadata()?.len() == 0 {
            self.reset_file()?;
        }
        self.file.seek(SeekFrom::Start(self.current_offset))?;
        Ok(())
    }

    // --- primitive encode/decode -------------------------------------

    fn write_u8(&mut self, v: u8) -> EngineResult<()> {
        self.file.write_all(&[v])?;
        Ok(())
    }

    fn write_u32(&mut self, v: u32) -> EngineResult<()> {
        self.file.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_u64(&mut self, v: u64) -> EngineResult<()> {
        self.file.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> EngineResult<()> {
        self.write_u64(data.len() as u64)?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn write_page_key(&mut self, key: PageKey) -> EngineResult<()> {
        self.write_u32(key.file.0)?;
        self.write_u32(key.page_id)
    }

    fn read_u8(&mut self) -> EngineResult<u8> {
        let mut buf = [0u8; 1];
        self.file.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u32(&mut self) -> EngineResult<u32> {
        let mut buf = [0u8; 4];
        self.file.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> EngineResult<u64> {
        let mut buf = [0u8; 8];
        self.file.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_bytes(&mut self) -> EngineResult<Vec<u8>> {
        let len = self.read_u64()? as usize;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_page_key(&mut self) -> EngineResult<PageKey> {
        let file = self.read_u32()?;
        let page_id = self.read_u32()?;
        Ok(PageKey { file: FileId(file), page_id })
    }

    fn read_record(&mut self) -> EngineResult<Record> {
        let record_type = RecordType::from_u8(self.read_u8()?)?;
        Ok(match record_type {
            RecordType::Start => Record::Start { tx: self.read_u32()? },
            RecordType::Commit => Record::Commit { tx: self.read_u32()? },
            RecordType::Abort => Record::Abort { tx: self.read_u32()? },
            RecordType::Update => {
                let tx = self.read_u32()?;
                let page = self.read_page_key()?;
                let before = self.read_bytes()?;
                let after = self.read_bytes()?;
                Record::Update { tx, page, before, after }
            }
            RecordType::Checkpoint => {
                let count = self.read_u32()?;
                let active = (0..count).map(|_| self.read_u32()).collect::<EngineResult<Vec<_>>>()?;
                Record::Checkpoint { active }
            }
        })
    }

    fn scan_from(&mut self, start: u64, end: u64) -> EngineResult<Vec<Record>> {
        self.file.seek(SeekFrom::Start(start))?;
        let mut records = Vec::new();
        while self.file.stream_position()? < end {
            records.push(self.read_record()?);
        }
        Ok(records)
    }

    // --- public record API --------------------------------------------

    pub fn log_start(&mut self, tx: &Transaction) -> EngineResult<()> {
        self.pre_append()?;
        self.write_u8(RecordType::Start as u8)?;
        self.write_u32(tx.id())?;
        self.current_offset = self.file.stream_position()?;
        Ok(())
    }

    pub fn log_update(&mut self, tx: &Transaction, page: PageKey, before: &[u8], after: &[u8]) -> EngineResult<()> {
        self.pre_append()?;
        self.write_u8(RecordType::Update as u8)?;
        self.write_u32(tx.id())?;
        self.write_page_key(page)?;
        self.write_bytes(before)?;
        self.write_bytes(after)?;
        self.current_offset = self.file.stream_position()?;
        Ok(())
    }

    pub fn log_commit(&mut self, tx: &Transaction) -> EngineResult<()> {
        self.pre_append()?;
        self.write_u8(RecordType::Commit as u8)?;
        self.write_u32(tx.id())?;
        self.current_offset = self.file.stream_position()?;
        self.file.flush()?;
        Ok(())
    }

    /// Roll `tx` back in-place: undo every update it made, in reverse
    /// chronological order, then append an ABORT record.
    pub fn log_abort(&mut self, tx: &Transaction, buffer_pool: &BufferPool) -> EngineResult<()> {
        self.rollback(tx, buffer_pool)?;

        self.pre_append()?;
        self.write_u8(RecordType::Abort as u8)?;
        self.write_u32(tx.id())?;
        self.current_offset = self.file.stream_position()?;
        Ok(())
    }

    fn rollback(&mut self, tx: &Transaction, buffer_pool: &BufferPool) -> EngineResult<()> {
        let last_checkpoint = self.checkpoint_pointer()?;
        let start = if last_checkpoint == NO_CHECKPOINT { HEADER_LEN } else { last_checkpoint };

        let records = self.scan_from(start, self.current_offset)?;
        for record in records.into_iter().rev() {
            if let Record::Update { tx: rtx, page, before, .. } = record {
                if rtx == tx.id() {
                    buffer_pool.force_write_page(page, &before)?;
                }
            }
        }
        Ok(())
    }

    pub fn log_checkpoint(&mut self, active: &[TransactionId]) -> EngineResult<()> {
        self.pre_append()?;
        let checkpoint_start = self.file.stream_position()?;

        self.write_u8(RecordType::Checkpoint as u8)?;
        self.write_u32(active.len() as u32)?;
        for tx in active {
            self.write_u32(*tx)?;
        }
        self.current_offset = self.file.stream_position()?;

        self.file.seek(SeekFrom::Start(0))?;
        self.write_u64(checkpoint_start)?;
        self.file.seek(SeekFrom::Start(self.current_offset))?;
        Ok(())
    }

    fn checkpoint_pointer(&mut self) -> EngineResult<u64> {
        self.file.seek(SeekFrom::Start(0))?;
        self.read_u64()
    }

    /// Analysis, redo, and undo (spec.md §4.3 Design Notes): reinstall every
    /// logged after-image in order, then undo the updates of any
    /// transaction that never committed, in reverse order.
    pub fn recover(&mut self, buffer_pool: &BufferPool) -> EngineResult<()> {
        let last_checkpoint = self.checkpoint_pointer()?;
        let (start, mut incomplete) = if last_checkpoint == NO_CHECKPOINT {
            (HEADER_LEN, HashSet::new())
        } else {
            self.file.seek(SeekFrom::Start(last_checkpoint))?;
            match self.read_record()? {
                Record::Checkpoint { active } => (self.file.stream_position()?, active.into_iter().collect::<HashSet<_>>()),
                _ => return Err(engine_err!(ErrorKind::Unexpected, "checkpoint pointer did not reference a checkpoint record")),
            }
        };

        let end = self.current_offset;
        let records = self.scan_from(start, end)?;

        // Analysis: which transactions never reached COMMIT or ABORT.
        for record in &records {
            match record {
                Record::Start { tx } => {
                    incomplete.insert(*tx);
                }
                Record::Commit { tx } | Record::Abort { tx } => {
                    incomplete.remove(tx);
                }
                _ => {}
            }
        }

        // Redo: repeat history by reinstalling every after-image in order.
        for record in &records {
            if let Record::Update { page, after, .. } = record {
                buffer_pool.force_write_page(*page, after)?;
            }
        }

        // Undo: roll back incomplete transactions' updates, latest-first.
        for record in records.iter().rev() {
            if let Record::Update { tx, page, before, .. } = record {
                if incomplete.contains(tx) {
                    buffer_pool.force_write_page(*page, before)?;
                }
            }
        }

        if !incomplete.is_empty() {
            debug!("recovery rolled back {} incomplete transaction(s)", incomplete.len());
        }

        self.reset_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::FileId as BPFileId;
    use crate::txn::Transaction;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;
    use tempfile::NamedTempFile;

    struct MemFile {
        pages: StdMutex<HashMap<u32, Vec<u8>>>,
    }

    impl MemFile {
        fn new() -> Arc<Self> {
            Arc::new(Self { pages: StdMutex::new(HashMap::new()) })
        }
    }

    impl crate::buffer_pool::PageFile for MemFile {
        fn read_page(&self, page_id: u32) -> EngineResult<Vec<u8>> {
            Ok(self.pages.lock().unwrap().get(&page_id).cloned().unwrap_or_else(|| vec![0u8; 4096]))
        }

        fn write_page(&self, page_id: u32, data: &[u8]) -> EngineResult<()> {
            self.pages.lock().unwrap().insert(page_id, data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn start_commit_round_trip_leaves_empty_log() {
        let tmp = NamedTempFile::new().unwrap();
        let mut log = LogManager::new(tmp.path()).unwrap();

        let tx = Transaction::begin_detached();
        log.log_start(&tx).unwrap();
        log.log_commit(&tx).unwrap();
        assert_eq!(log.records_count(), 2);
    }

    #[test]
    fn abort_rolls_back_update_via_before_image() {
        let tmp = NamedTempFile::new().unwrap();
        let mut log = LogManager::new(tmp.path()).unwrap();
        let pool = BufferPool::new(8);
        let file = MemFile::new();
        pool.register_file(BPFileId(0), Arc::clone(&file) as Arc<dyn crate::buffer_pool::PageFile>);

        let key = PageKey { file: BPFileId(0), page_id: 1 };
        let before = vec![0u8; 4096];
        let mut after = before.clone();
        after[0] = 0xAB;
        file.pages.lock().unwrap().insert(1, after.clone());

        let tx = Transaction::begin_detached();
        log.log_start(&tx).unwrap();
        log.log_update(&tx, key, &before, &after).unwrap();
        log.log_abort(&tx, &pool).unwrap();

        assert_eq!(file.pages.lock().unwrap().get(&1).unwrap()[0], 0);
    }

    #[test]
    fn recover_redoes_committed_and_undoes_incomplete() {
        let tmp = NamedTempFile::new().unwrap();
        let pool = BufferPool::new(8);
        let file = MemFile::new();
        pool.register_file(BPFileId(0), Arc::clone(&file) as Arc<dyn crate::buffer_pool::PageFile>);

        let committed_key = PageKey { file: BPFileId(0), page_id: 1 };
        let incomplete_key = PageKey { file: BPFileId(0), page_id: 2 };
        let zero = vec![0u8; 4096];
        let mut committed_after = zero.clone();
        committed_after[0] = 1;
        let mut incomplete_after = zero.clone();
        incomplete_after[0] = 2;

        {
            let mut log = LogManager::new(tmp.path()).unwrap();
            let committed_tx = Transaction::begin_detached();
            log.log_start(&committed_tx).unwrap();
            log.log_update(&committed_tx, committed_key, &zero, &committed_after).unwrap();
            log.log_commit(&committed_tx).unwrap();

            let incomplete_tx = Transaction::begin_detached();
            log.log_start(&incomplete_tx).unwrap();
            log.log_update(&incomplete_tx, incomplete_key, &zero, &incomplete_after).unwrap();
            // crash: no commit/abort record written
        }

        let mut log = LogManager::new(tmp.path()).unwrap();
        log.recover(&pool).unwrap();

        assert_eq!(file.pages.lock().unwrap().get(&1).unwrap()[0], 1);
        assert_eq!(file.pages.lock().unwrap().get(&2).unwrap()[0], 0);
    }
}

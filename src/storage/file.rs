//! Physical page file (spec.md §4.4, layer A), grounded on the teacher's
//! `io::SmallFile`: a plain OS file addressed by fixed-size page slots,
//! growing on demand, fed into the buffer pool via the `PageFile` trait.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::buffer_pool::{PageFile, PAGE_SIZE};
use crate::error::EngineResult;

pub struct PhysicalFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl PhysicalFile {
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> EngineResult<u64> {
        Ok(self.file.lock().unwrap().metadata()?.len())
    }

    pub fn page_count(&self) -> EngineResult<u64> {
        Ok(self.size()? / PAGE_SIZE as u64)
    }

    pub fn sync(&self) -> EngineResult<()> {
        self.file.lock().unwrap().sync_all()?;
        Ok(())
    }

    pub fn truncate(&self, pages: u64) -> EngineResult<()> {
        self.file.lock().unwrap().set_len(pages * PAGE_SIZE as u64)?;
        Ok(())
    }
}

impl PageFile for PhysicalFile {
    fn read_page(&self, page_id: u32) -> EngineResult<Vec<u8>> {
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.file.lock().unwrap();
        let len = file.metadata()?.len();

        let mut buf = vec![0u8; PAGE_SIZE];
        if offset >= len {
            // Never-written page: the buffer pool's "fresh page" contract
            // is an all-zero body.
            return Ok(buf);
        }

        file.seek(SeekFrom::Start(offset))?;
        let readable = ((len - offset) as usize).min(PAGE_SIZE);
        file.read_exact(&mut buf[..readable])?;
        Ok(buf)
    }

    fn write_page(&self, page_id: u32, data: &[u8]) -> EngineResult<()> {
        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn reading_an_unwritten_page_returns_zeros() {
        let tmp = NamedTempFile::new().unwrap();
        let file = PhysicalFile::open(tmp.path()).unwrap();
        let page = file.read_page(3).unwrap();
        assert_eq!(page.len(), PAGE_SIZE);
        assert!(page.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_then_read_round_trips() {
        let tmp = NamedTempFile::new().unwrap();
        let file = PhysicalFile::open(tmp.path()).unwrap();
        let mut data = vec![0u8; PAGE_SIZE];
        data[10] = 0x7F;
        file.write_page(2, &data).unwrap();
        assert_eq!(file.read_page(2).unwrap(), data);
    }

    #[test]
    fn page_count_tracks_growth() {
        let tmp = NamedTempFile::new().unwrap();
        let file = PhysicalFile::open(tmp.path()).unwrap();
        assert_eq!(file.page_count().unwrap(), 0);
        file.write_page(0, &vec![1u8; PAGE_SIZE]).unwrap();
        assert_eq!(file.page_count().unwrap(), 1);
    }
}

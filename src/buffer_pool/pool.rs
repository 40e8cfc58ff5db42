//! The buffer pool (spec.md §4.1): `fix`/`unfix`/`refix`/`touch`/
//! `discardable`, LRU-with-priority eviction, and asynchronous flush with
//! bounded retry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use crossbeam::channel::{bounded, Receiver, Sender};

use super::page::{FileId, FixMode, FixOptions, Page, PageKey, Priority, PAGE_SIZE};
use crate::engine_err;
use crate::error::{EngineResult, ErrorKind};

/// A page-backed file the buffer pool can read from and write to. Composite
/// files (spec.md §4.4) register one `PageFile` per sub-file.
pub trait PageFile: Send + Sync {
    fn read_page(&self, page_id: u32) -> EngineResult<Vec<u8>>;
    fn write_page(&self, page_id: u32, data: &[u8]) -> EngineResult<()>;
}

struct FlushJob {
    key: PageKey,
    data: Vec<u8>,
}

pub struct BufferPool {
    capacity: usize,
    pages: RwLock<HashMap<PageKey, Arc<Page>>>,
    files: RwLock<HashMap<FileId, Arc<dyn PageFile>>>,
    clock: AtomicU64,
    flush_tx: Sender<FlushJob>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

/// A pin on a page. Cloning transfers another pin (increments `ref_count`);
/// dropping releases one, matching the universal invariant in spec.md §8:
/// `ref_count(p) == 0` once every clone is gone.
pub struct Memory {
    page: Arc<Page>,
    mode: FixMode,
    discardable: bool,
}

impl Memory {
    pub fn key(&self) -> PageKey {
        self.page.key
    }

    pub fn mode(&self) -> FixMode {
        self.mode
    }

    /// Read the page body (or scratch, if a discardable write is pending and
    /// hasn't been touched yet).
    pub fn read(&self) -> Vec<u8> {
        let state = self.page.state.lock().unwrap();
        state.scratch.clone().unwrap_or_else(|| state.body.clone())
    }

    /// Apply `f` to the mutable contents. For a `Discardable` fix, the first
    /// write lazily allocates scratch (copy-on-write) and all writes land
    /// there until `touch()` promotes them.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> EngineResult<R> {
        if self.mode == FixMode::ReadOnly {
            return Err(engine_err!(
                ErrorKind::Unexpected,
                "write attempted on a page fixed ReadOnly"
            ));
        }
        let mut state = self.page.state.lock().unwrap();
        if self.discardable {
            if state.scratch.is_none() {
                state.scratch = Some(state.body.clone());
            }
            let buf = state.scratch.as_mut().unwrap();
            Ok(f(buf))
        } else {
            Ok(f(&mut state.body))
        }
    }

    /// Promote scratch into the canonical body, making prior writes
    /// undiscardable (spec.md §3.2).
    pub fn touch(&self, dirty: bool) {
        let mut state = self.page.state.lock().unwrap();
        if let Some(scratch) = state.scratch.take() {
            state.body = scratch;
        }
        state.dirty = state.dirty || dirty;
    }

    /// Upgrade subsequent writes to copy-on-write, if not already.
    pub fn discardable(&mut self) {
        self.discardable = true;
        self.page.state.lock().unwrap().discardable = true;
    }
}

impl Clone for Memory {
    fn clone(&self) -> Self {
        self.page.state.lock().unwrap().ref_count += 1;
        Self {
            page: Arc::clone(&self.page),
            mode: self.mode,
            discardable: self.discardable,
        }
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        // A bare drop (no explicit `unfix`) behaves like `unfix(dirty:
        // false)`: release the pin and discard any scratch.
        let mut state = self.page.state.lock().unwrap();
        state.ref_count -= 1;
        if self.discardable {
            state.scratch = None;
        }
    }
}

impl BufferPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (flush_tx, flush_rx) = bounded::<FlushJob>(1024);

        let pool = Arc::new(Self {
            capacity,
            pages: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            flush_tx,
            flusher: Mutex::new(None),
        });

        let handle = Self::spawn_flusher(Arc::clone(&pool), flush_rx);
        *pool.flusher.lock().unwrap() = Some(handle);

        pool
    }

    fn spawn_flusher(pool: Arc<BufferPool>, rx: Receiver<FlushJob>) -> JoinHandle<()> {
        std::thread::spawn(move || {
            for job in rx.iter() {
                let mut attempt = 0;
                loop {
                    match pool.flush_page(job.key, &job.data) {
                        Ok(()) => {
                            if let Some(page) = pool.pages.read().unwrap().get(&job.key) {
                                page.state.lock().unwrap().dirty = false;
                            }
                            break;
                        }
                        Err(e) => {
                            attempt += 1;
                            log::debug!("async flush of {} failed (attempt {}): {}", job.key, attempt, e);
                            if attempt >= 3 {
                                break;
                            }
                            std::thread::sleep(std::time::Duration::from_millis(10 * attempt));
                        }
                    }
                }
            }
        })
    }

    pub fn page_size() -> usize {
        PAGE_SIZE
    }

    pub fn register_file(&self, file_id: FileId, file: Arc<dyn PageFile>) {
        self.files.write().unwrap().insert(file_id, file);
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Fetch, pin, and optionally create a page.
    pub fn fix(&self, file: FileId, page_id: u32, mode: FixMode, opts: FixOptions) -> EngineResult<Memory> {
        let key = PageKey { file, page_id };

        {
            let pages = self.pages.read().unwrap();
            if let Some(page) = pages.get(&key) {
                let mut state = page.state.lock().unwrap();
                if let Some(err) = &state.failed {
                    let msg = err.clone();
                    return Err(engine_err!(ErrorKind::Unexpected, "page {} previously failed to flush: {}", key, msg));
                }
                state.ref_count += 1;
                state.last_used = self.tick();
                if mode != FixMode::ReadOnly {
                    state.writable = true;
                }
                if opts.discardable {
                    state.discardable = true;
                }
                drop(state);
                return Ok(Memory {
                    page: Arc::clone(page),
                    mode,
                    discardable: opts.discardable,
                });
            }
        }

        // Not cached: make room, then load (or allocate fresh).
        self.ensure_capacity()?;

        let body = match mode {
            FixMode::Allocate => vec![0u8; PAGE_SIZE],
            _ => self.read_from_disk(file, page_id)?,
        };

        let priority = Priority::Middle;
        let page = Arc::new(Page::new(key, body, priority, self.tick()));
        {
            let mut state = page.state.lock().unwrap();
            state.ref_count = 1;
            state.writable = mode != FixMode::ReadOnly;
            state.discardable = opts.discardable;
        }

        self.pages.write().unwrap().insert(key, Arc::clone(&page));

        Ok(Memory {
            page,
            mode,
            discardable: opts.discardable,
        })
    }

    /// Re-pin the same page in the same mode, except `Allocate` downgrades
    /// to `Write`.
    pub fn refix(&self, memory: &Memory) -> Memory {
        memory.page.state.lock().unwrap().ref_count += 1;
        let mode = match memory.mode {
            FixMode::Allocate => FixMode::Write,
            other => other,
        };
        Memory {
            page: Arc::clone(&memory.page),
            mode,
            discardable: memory.discardable,
        }
    }

    /// Release a pin, optionally marking the page dirty and scheduling an
    /// asynchronous flush. Consumes the guard so it cannot be unfixed twice.
    pub fn unfix(&self, memory: Memory, dirty: bool, async_flush: bool) -> EngineResult<()> {
        let key = memory.page.key;
        let page = Arc::clone(&memory.page);

        let body_to_flush = {
            let mut state = page.state.lock().unwrap();

            if memory.discardable {
                if dirty {
                    if let Some(scratch) = state.scratch.take() {
                        state.body = scratch;
                    }
                    state.dirty = true;
                } else {
                    state.scratch = None;
                }
            } else if dirty {
                state.dirty = true;
            }

            state.ref_count -= 1;

            if state.dirty {
                Some(state.body.clone())
            } else {
                None
            }
        };

        // `Drop` would otherwise release the pin a second time.
        std::mem::forget(memory);

        if let Some(data) = body_to_flush {
            if async_flush {
                let _ = self.flush_tx.send(FlushJob { key, data });
            } else {
                self.flush_page(key, &data)?;
                page.state.lock().unwrap().dirty = false;
            }
        }

        Ok(())
    }

    fn read_from_disk(&self, file: FileId, page_id: u32) -> EngineResult<Vec<u8>> {
        let files = self.files.read().unwrap();
        let f = files
            .get(&file)
            .ok_or_else(|| engine_err!(ErrorKind::Unexpected, "no file registered for {:?}", file))?;
        f.read_page(page_id)
    }

    fn flush_page(&self, key: PageKey, data: &[u8]) -> EngineResult<()> {
        let files = self.files.read().unwrap();
        let f = files
            .get(&key.file)
            .ok_or_else(|| engine_err!(ErrorKind::Unexpected, "no file registered for {:?}", key.file))?;
        match f.write_page(key.page_id, data) {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Some(page) = self.pages.read().unwrap().get(&key) {
                    page.state.lock().unwrap().failed = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Force-write every dirty page. Idempotent: a second call with no
    /// intervening writes flushes nothing (spec.md §8).
    pub fn flush_all_pages(&self) -> EngineResult<()> {
        let snapshot: Vec<(PageKey, Arc<Page>)> = self
            .pages
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (*k, Arc::clone(v)))
            .collect();

        for (key, page) in snapshot {
            let data = {
                let state = page.state.lock().unwrap();
                if !state.dirty {
                    continue;
                }
                state.body.clone()
            };
            self.flush_page(key, &data)?;
            page.state.lock().unwrap().dirty = false;
        }
        Ok(())
    }

    /// Flush a single page if dirty; a no-op otherwise (spec.md §4.7
    /// `Sequence::persist`).
    pub fn flush_one(&self, key: PageKey) -> EngineResult<()> {
        let page = match self.pages.read().unwrap().get(&key) {
            Some(p) => Arc::clone(p),
            None => return Ok(()),
        };
        let data = {
            let state = page.state.lock().unwrap();
            if !state.dirty {
                return Ok(());
            }
            state.body.clone()
        };
        self.flush_page(key, &data)?;
        page.state.lock().unwrap().dirty = false;
        Ok(())
    }

    pub fn discard_page(&self, key: &PageKey) {
        self.pages.write().unwrap().remove(key);
    }

    /// Force `data` straight to the backing file and drop any cached copy,
    /// bypassing pins and dirty tracking. Used by log recovery (spec.md
    /// §4.3) to install before/after images outside of normal transaction
    /// flow.
    pub fn force_write_page(&self, key: PageKey, data: &[u8]) -> EngineResult<()> {
        self.pages.write().unwrap().remove(&key);
        self.flush_page(key, data)
    }

    pub fn clear(&self) {
        self.pages.write().unwrap().clear();
    }

    fn ensure_capacity(&self) -> EngineResult<()> {
        loop {
            let len = self.pages.read().unwrap().len();
            if len < self.capacity {
                return Ok(());
            }
            if !self.evict_one() {
                return Err(engine_err!(
                    ErrorKind::MemoryExhaust,
                    "buffer pool exhausted: {} pages pinned at capacity {}",
                    len,
                    self.capacity
                ));
            }
        }
    }

    /// Pick an unpinned page ordered by `(priority ascending, last_used
    /// ascending)` and evict it, flushing first if dirty.
    fn evict_one(&self) -> bool {
        let candidate = {
            let pages = self.pages.read().unwrap();
            pages
                .iter()
                .filter_map(|(k, p)| {
                    let state = p.state.lock().unwrap();
                    if state.ref_count == 0 {
                        Some((*k, state.priority, state.last_used, state.dirty, state.body.clone()))
                    } else {
                        None
                    }
                })
                .min_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)))
        };

        match candidate {
            Some((key, _, _, dirty, body)) => {
                if dirty {
                    let _ = self.flush_page(key, &body);
                }
                self.pages.write().unwrap().remove(&key);
                true
            }
            None => false,
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        // Dropping `flush_tx` closes the channel so the flusher thread's
        // `for job in rx.iter()` terminates; join it so no flush is lost.
        if let Some(handle) = self.flusher.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct MemFile {
        pages: StdMutex<HashMap<u32, Vec<u8>>>,
    }

    impl MemFile {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                pages: StdMutex::new(HashMap::new()),
            })
        }
    }

    impl PageFile for MemFile {
        fn read_page(&self, page_id: u32) -> EngineResult<Vec<u8>> {
            Ok(self
                .pages
                .lock()
                .unwrap()
                .get(&page_id)
                .cloned()
                .unwrap_or_else(|| vec![0u8; PAGE_SIZE]))
        }

        fn write_page(&self, page_id: u32, data: &[u8]) -> EngineResult<()> {
            self.pages.lock().unwrap().insert(page_id, data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn fix_unfix_drops_ref_count_to_zero() {
        let pool = BufferPool::new(8);
        let file = MemFile::new();
        pool.register_file(FileId(0), file);

        let mem = pool.fix(FileId(0), 1, FixMode::Write, FixOptions::default()).unwrap();
        let page = Arc::clone(&mem.page);
        assert_eq!(page.state.lock().unwrap().ref_count, 1);
        pool.unfix(mem, false, false).unwrap();
        assert_eq!(page.state.lock().unwrap().ref_count, 0);
    }

    // Scenario 2 (spec.md §8): discardable rollback.
    #[test]
    fn discardable_rollback_restores_prior_body() {
        let pool = BufferPool::new(8);
        let file = MemFile::new();
        pool.register_file(FileId(0), Arc::clone(&file) as Arc<dyn PageFile>);

        let mem = pool
            .fix(
                FileId(0),
                1,
                FixMode::Write,
                FixOptions {
                    discardable: true,
                    ..Default::default()
                },
            )
            .unwrap();
        mem.write(|buf| buf[0] = 0xAA).unwrap();
        pool.unfix(mem, false, false).unwrap();
        pool.discard_page(&PageKey { file: FileId(0), page_id: 1 });

        let mem2 = pool.fix(FileId(0), 1, FixMode::ReadOnly, FixOptions::default()).unwrap();
        assert_eq!(mem2.read()[0], 0);
        pool.unfix(mem2, false, false).unwrap();
    }

    #[test]
    fn touch_promotes_scratch_to_body() {
        let pool = BufferPool::new(8);
        let file = MemFile::new();
        pool.register_file(FileId(0), file);

        let mem = pool
            .fix(
                FileId(0),
                1,
                FixMode::Write,
                FixOptions {
                    discardable: true,
                    ..Default::default()
                },
            )
            .unwrap();
        mem.write(|buf| buf[0] = 0x42).unwrap();
        mem.touch(true);
        assert_eq!(mem.page.state.lock().unwrap().body[0], 0x42);
        pool.unfix(mem, true, false).unwrap();
    }

    #[test]
    fn flush_all_pages_is_idempotent() {
        let pool = BufferPool::new(8);
        let file = MemFile::new();
        pool.register_file(FileId(0), Arc::clone(&file) as Arc<dyn PageFile>);

        let mem = pool.fix(FileId(0), 1, FixMode::Write, FixOptions::default()).unwrap();
        mem.write(|buf| buf[0] = 9).unwrap();
        pool.unfix(mem, true, false).unwrap();

        pool.flush_all_pages().unwrap();
        assert_eq!(file.pages.lock().unwrap().get(&1).unwrap()[0], 9);

        file.pages.lock().unwrap().clear();
        pool.flush_all_pages().unwrap();
        assert!(file.pages.lock().unwrap().is_empty());
    }

    #[test]
    fn exhausted_pool_raises_memory_exhaust() {
        let pool = BufferPool::new(1);
        let file = MemFile::new();
        pool.register_file(FileId(0), file);

        let _held = pool.fix(FileId(0), 1, FixMode::Write, FixOptions::default()).unwrap();
        let err = pool
            .fix(FileId(0), 2, FixMode::Write, FixOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryExhaust);
    }
}

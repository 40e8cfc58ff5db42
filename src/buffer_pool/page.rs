//! Page representation and fix modes (spec.md §3.1, §3.2).

use std::fmt;
use std::sync::Mutex;

pub const PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// Identifies a page uniquely within the buffer pool (one file may be a
/// sub-file of a composite file; the buffer pool doesn't know or care).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub file: FileId,
    pub page_id: u32,
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "file{}:page{}", self.file.0, self.page_id)
    }
}

/// Eviction priority hint. `Low` pages (sequential-scan buffers) are
/// evicted before `Middle`; `High` pages (index roots, header pages) are
/// evicted last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Middle,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Middle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    ReadOnly,
    Write,
    /// Fix a page that does not yet exist on disk; behaves like `Write`
    /// except `refix` downgrades it to plain `Write`.
    Allocate,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FixOptions {
    /// Flush of this page may be skipped under memory pressure (best-effort
    /// durability, e.g. scratch/temp structures).
    pub deterrentable: bool,
    /// Writes go to a copy-on-write scratch buffer until `touch()`.
    pub discardable: bool,
    /// Suppress the page-content latch (caller guarantees exclusivity some
    /// other way, e.g. single-threaded recovery replay).
    pub no_lock: bool,
}

pub(super) struct PageState {
    pub body: Vec<u8>,
    pub scratch: Option<Vec<u8>>,
    pub dirty: bool,
    pub writable: bool,
    pub discardable: bool,
    pub failed: Option<String>,
    pub ref_count: i64,
    pub priority: Priority,
    pub last_used: u64,
}

/// A cached page. Never constructed directly by callers; reached only
/// through a `Memory` guard obtained from `BufferPool::fix`.
pub struct Page {
    pub key: PageKey,
    pub(super) state: Mutex<PageState>,
}

impl Page {
    pub(super) fn new(key: PageKey, body: Vec<u8>, priority: Priority, clock: u64) -> Self {
        Self {
            key,
            state: Mutex::new(PageState {
                body,
                scratch: None,
                dirty: false,
                writable: false,
                discardable: false,
                failed: None,
                ref_count: 0,
                priority,
                last_used: clock,
            }),
        }
    }
}

//! Process-wide singleton wiring the buffer pool, transaction manager, log
//! manager, and catalog together (spec.md Design Notes §9), grounded on the
//! teacher's `common::database::Database`. Unlike the teacher's raw
//! `*mut Database` global, this uses `once_cell::sync::OnceCell` so there is
//! no unsafe code in the wiring itself.
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use once_cell::sync::OnceCell;

use crate::buffer_pool::{BufferPool, FileId};
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::recovery::LogManager;
use crate::storage::PhysicalFile;
use crate::txn::TransactionManager;

/// File id reserved, by convention, for the system catalog's own storage
/// (its id-minting sequence lives at page 0).
const SYSTEM_CATALOG_FILE: FileId = FileId(0);

static DB: OnceCell<Database> = OnceCell::new();

pub struct Database {
    path: PathBuf,
    config: EngineConfig,
    buffer_pool: Arc<BufferPool>,
    catalog: RwLock<Catalog>,
    txn_manager: RwLock<TransactionManager>,
    log_manager: RwLock<LogManager>,
}

impl Database {
    fn new() -> EngineResult<Self> {
        Self::at(PathBuf::from("data").join("default_db"), EngineConfig::default())
    }

    fn at(path: PathBuf, config: EngineConfig) -> EngineResult<Self> {
        if !path.exists() {
            std::fs::create_dir_all(&path)?;
        }
        let log_path = path.join("wal.log");

        let buffer_pool = BufferPool::new(config.buffer_pool_pages());
        let catalog_file = Arc::new(PhysicalFile::open(path.join("catalog.db"))?);
        buffer_pool.register_file(SYSTEM_CATALOG_FILE, catalog_file);
        let catalog = Catalog::new(Arc::clone(&buffer_pool))?;

        Ok(Self {
            catalog: RwLock::new(catalog),
            buffer_pool,
            txn_manager: RwLock::new(TransactionManager::new()),
            log_manager: RwLock::new(LogManager::new(log_path)?),
            config,
            path,
        })
    }

    pub fn global() -> &'static Database {
        DB.get_or_init(|| Database::new().expect("failed to initialize database"))
    }

    /// Used by tests to stand up an isolated instance rooted at a temp
    /// directory. Only valid before `global()` has been called in the
    /// process, since `OnceCell` only accepts its first value.
    pub fn init_at(path: PathBuf, config: EngineConfig) -> EngineResult<&'static Database> {
        let instance = Database::at(path, config)?;
        match DB.set(instance) {
            Ok(()) => Ok(DB.get().unwrap()),
            Err(_) => Ok(DB.get().unwrap()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn get_path(&self) -> PathBuf {
        self.path.clone()
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap()
    }

    pub fn mut_catalog(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write().unwrap()
    }

    pub fn txn_manager(&self) -> RwLockReadGuard<'_, TransactionManager> {
        self.txn_manager.read().unwrap()
    }

    pub fn mut_txn_manager(&self) -> RwLockWriteGuard<'_, TransactionManager> {
        self.txn_manager.write().unwrap()
    }

    pub fn mut_log_manager(&self) -> RwLockWriteGuard<'_, LogManager> {
        self.log_manager.write().unwrap()
    }

    /// Reset in-memory state: clears the buffer pool and transaction
    /// manager, then replays the write-ahead log. Used by tests and by a
    /// cold start after a crash.
    pub fn recover(&self) -> EngineResult<()> {
        self.buffer_pool.clear();
        self.mut_txn_manager().clear();
        self.mut_log_manager().recover(&self.buffer_pool)
    }
}

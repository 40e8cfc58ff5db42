//! Sequence service (spec.md §4.7): a single persisted page holding the
//! current value, bounds, step, cycle flag, and `get_max` flag. Grounded on
//! the teacher's `LogManager`, which writes fixed-layout records straight
//! through a file handle; here the "file" is the buffer pool's `Memory`
//! guard for one page, kept pinned for the sequence's lifetime, so
//! `persist()` is just a targeted flush of that one page.

use std::sync::Arc;

use crate::buffer_pool::{BufferPool, FixMode, FixOptions, Memory, PageKey};
use crate::engine_err;
use crate::error::{EngineResult, ErrorKind};

const VERSION: u8 = 2;
const HEADER_LEN: usize = 34;

/// What `verify` should do when the observed value exceeds the sequence's
/// stored current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyTreatment {
    /// Raise the stored value to match.
    Correct,
    /// Treat it as a corruption and return an error.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceHeader {
    pub current: i64,
    pub min: i64,
    pub max: i64,
    pub step: i64,
    pub cycle: bool,
    pub get_max: bool,
}

impl SequenceHeader {
    fn encode_into(&self, buf: &mut [u8]) {
        buf[0] = VERSION;
        buf[1..9].copy_from_slice(&self.current.to_le_bytes());
        buf[9..17].copy_from_slice(&self.min.to_le_bytes());
        buf[17..25].copy_from_slice(&self.max.to_le_bytes());
        buf[25..33].copy_from_slice(&self.step.to_le_bytes());
        let mut flags = 0u8;
        if self.cycle {
            flags |= 0b01;
        }
        if self.get_max {
            flags |= 0b10;
        }
        buf[33] = flags;
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN || buf[0] != VERSION {
            return None;
        }
        let read_i64 = |range: std::ops::Range<usize>| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[range]);
            i64::from_le_bytes(bytes)
        };
        let flags = buf[33];
        Some(Self {
            current: read_i64(1..9),
            min: read_i64(9..17),
            max: read_i64(17..25),
            step: read_i64(25..33),
            cycle: flags & 0b01 != 0,
            get_max: flags & 0b10 != 0,
        })
    }
}

/// A persisted counter. Holds its page pinned for as long as the sequence
/// is open (spec.md §4.7 "Substantiation": the page is allocated lazily on
/// first use).
pub struct Sequence {
    pool: Arc<BufferPool>,
    key: PageKey,
    memory: Memory,
    header: SequenceHeader,
}

impl Sequence {
    /// Open (creating if necessary) the sequence page at `key`. `defaults`
    /// is used only the first time the page is touched; afterwards the
    /// stored header wins.
    pub fn open(pool: Arc<BufferPool>, key: PageKey, defaults: SequenceHeader) -> EngineResult<Self> {
        let memory = pool.fix(key.file, key.page_id, FixMode::Write, FixOptions::default())?;
        let body = memory.read();
        let header = match SequenceHeader::decode(&body) {
            Some(h) => h,
            None => {
                memory.write(|buf| defaults.encode_into(buf))?;
                memory.touch(true);
                defaults
            }
        };
        Ok(Self { pool, key, memory, header })
    }

    pub fn current(&self) -> i64 {
        self.header.current
    }

    /// Increment by `step`, wrapping to `min` if `cycle` is set and `max` is
    /// exceeded, else raising `IntegerOverflow` and leaving the page
    /// unmodified (spec.md §4.7 Failure model).
    pub fn next(&mut self) -> EngineResult<i64> {
        let mut value = self.header.current + self.header.step;
        if value > self.header.max {
            if self.header.cycle {
                value = self.header.min;
            } else {
                return Err(engine_err!(
                    ErrorKind::IntegerOverflow,
                    "sequence {} exhausted at max {}",
                    self.key,
                    self.header.max
                ));
            }
        }
        self.header.current = value;
        self.write_header()
    }

    /// Reconcile the stored value to at least `value` (used for replay, or
    /// for `get_max` columns fed by an external source of truth).
    pub fn next_reconciled(&mut self, value: i64) -> EngineResult<i64> {
        if value > self.header.current {
            self.header.current = value;
            self.write_header()?;
        }
        Ok(self.header.current)
    }

    /// `value` must not exceed the stored current value; `Correct` raises
    /// the stored value to match instead of failing.
    pub fn verify(&mut self, value: i64, treatment: VerifyTreatment) -> EngineResult<()> {
        if value <= self.header.current {
            return Ok(());
        }
        match treatment {
            VerifyTreatment::Correct => {
                self.header.current = value;
                self.write_header().map(|_| ())
            }
            VerifyTreatment::Strict => Err(engine_err!(
                ErrorKind::Unexpected,
                "sequence {} observed value {} exceeds stored current {}",
                self.key,
                value,
                self.header.current
            )),
        }
    }

    /// Force-write the dirty page (spec.md §4.7: invoked on commit).
    pub fn persist(&self) -> EngineResult<()> {
        self.pool.flush_one(self.key)
    }

    fn write_header(&mut self) -> EngineResult<i64> {
        let header = self.header;
        self.memory.write(|buf| header.encode_into(buf))?;
        self.memory.touch(true);
        Ok(header.current)
    }
}

impl Default for SequenceHeader {
    fn default() -> Self {
        Self {
            current: 0,
            min: 0,
            max: i64::MAX,
            step: 1,
            cycle: false,
            get_max: false,
        }
    }
}

//! Configuration surface (spec §6): parallel worker count, per-driver cache
//! page budgets, and debug flags. The real config subsystem (reading from
//! disk, hot reload, ...) is out of scope; this is the narrow shape the core
//! reads from it.

use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    parallel_threads: usize,
    buffer_pool_pages: usize,
    pub detect_dead_lock: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_threads: num_cpus(),
            buffer_pool_pages: 4096,
            detect_dead_lock: cfg!(debug_assertions),
        }
    }
}

impl EngineConfig {
    pub fn parallel_threads(&self) -> usize {
        self.parallel_threads
    }

    pub fn buffer_pool_pages(&self) -> usize {
        self.buffer_pool_pages
    }

    pub fn with_buffer_pool_pages(mut self, pages: usize) -> Self {
        self.buffer_pool_pages = pages;
        self
    }

    pub fn with_detect_dead_lock(mut self, on: bool) -> Self {
        self.detect_dead_lock = on;
        self
    }

    /// Parse `Utility_ParallelThreadNumber` syntax: a bare integer, or
    /// `CPU - N` meaning "all cores minus N" (floored at 1).
    pub fn parse_parallel_thread_number(raw: &str) -> usize {
        let raw = raw.trim();
        if let Ok(n) = usize::from_str(raw) {
            return n.max(1);
        }

        if let Some(rest) = raw.strip_prefix("CPU") {
            let rest = rest.trim();
            if let Some(n_str) = rest.strip_prefix('-') {
                if let Ok(n) = usize::from_str(n_str.trim()) {
                    return num_cpus().saturating_sub(n).max(1);
                }
            }
            if rest.is_empty() {
                return num_cpus();
            }
        }

        num_cpus()
    }

    pub fn with_parallel_thread_number(mut self, raw: &str) -> Self {
        self.parallel_threads = Self::parse_parallel_thread_number(raw);
        self
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_integer() {
        assert_eq!(EngineConfig::parse_parallel_thread_number("4"), 4);
    }

    #[test]
    fn parses_cpu_minus_n() {
        let expected = num_cpus().saturating_sub(1).max(1);
        assert_eq!(EngineConfig::parse_parallel_thread_number("CPU - 1"), expected);
    }

    #[test]
    fn bare_cpu_means_all_cores() {
        assert_eq!(EngineConfig::parse_parallel_thread_number("CPU"), num_cpus());
    }
}

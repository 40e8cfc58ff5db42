//! Synchronization substrate (spec.md §4.2): a recursive OS mutex and a
//! deadlock-detector-integrated wrapper over it.

mod deadlock;
mod os_mutex;

pub use deadlock::SyncBase;
pub use os_mutex::OsMutex;

#[path = "integretions/lock_deadlock_test.rs"]
mod lock_deadlock_test;

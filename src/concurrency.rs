//! Concurrency control.

pub mod lock;

pub use lock::{LockManager, LockMode};

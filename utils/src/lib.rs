//! Shared infrastructure utilities for Hearth.
//!
//! - **`atomic_write`**: crash-safe file persistence (temp + rename) used by the
//!   file-backed session store.

pub mod atomic_write;

pub use atomic_write::{SyncPolicy, WriteOptions, atomic_write, atomic_write_with_options, recover_bak_file};

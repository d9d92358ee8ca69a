//! Process-local adapters used by the `memory` backend and by tests.

mod kv_store_memory;
mod user_directory_memory;

pub use kv_store_memory::*;
pub use user_directory_memory::*;

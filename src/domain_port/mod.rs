// store

mod kv_store;

pub use kv_store::*;

// collaborators

mod monitoring_sink;
mod user_directory;

pub use monitoring_sink::*;
pub use user_directory::*;

mod auth;
mod session_store;

pub use auth::*;
pub use session_store::*;

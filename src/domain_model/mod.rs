mod monitoring;
mod session;
mod user;

pub use monitoring::*;
pub use session::*;
pub use user::*;

mod monitoring_sink;
mod server;
mod token_monitor;

pub use monitoring_sink::*;
pub use server::*;
pub use token_monitor::*;

//! Process configuration. `parse_settings` loads a TOML file and the
//! `Settings::*_config` helpers turn it into per-component configs.

mod cli;
pub use clap::Parser;
pub use cli::*;

mod settings;
pub use settings::*;

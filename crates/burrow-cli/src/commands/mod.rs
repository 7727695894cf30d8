//! CLI command implementations

mod ping;
mod rsyncd;
mod update_config;

pub use ping::{ping_command, PingArgs};
pub use rsyncd::rsyncd_command;
pub use update_config::update_config_command;

//! CLI command handlers, one per file.

mod capabilities;
mod config;
mod flash;
mod stages;
mod watch;

pub use capabilities::run_capabilities;
pub use config::run_config;
pub use flash::run_flash;
pub use stages::run_stages;
pub use watch::run_watch;

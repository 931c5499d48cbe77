pub mod args;
pub mod config;
pub mod logger;
pub mod tls;

pub use args::{parse, Args, LogFormat};
pub use config::init_config;
pub use logger::init_logging;

pub fn parse_args() -> Result<Args, Box<dyn std::error::Error>> {
    Ok(args::parse())
}

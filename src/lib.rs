pub mod annotation;
pub mod app;
pub mod config;
pub mod errors;
pub mod jit;
pub mod listener;
pub mod registry;
pub mod runtime;
pub mod storage;
pub mod tds;
pub mod utils;

pub use config::tls;
pub use utils::rate_limit;

/// Format chrono::Duration to be more human-friendly.
pub fn format_duration(duration: &chrono::Duration) -> String {
    let milliseconds = format!("{:0>3}", duration.num_milliseconds() % 1000);
    let seconds = format!("{:0>2}", duration.num_seconds() % 60);
    let minutes = format!("{:0>2}", duration.num_minutes() % 60);
    let hours = format!("{:0>2}", duration.num_hours() % 24);
    let days = duration.num_days().to_string();

    format!("{days}d {hours}:{minutes}:{seconds}.{milliseconds}")
}

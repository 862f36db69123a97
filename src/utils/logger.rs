use chrono::Utc;
use log::info;
use std::io::Write;

/// Logger setup shared by the binaries.
pub struct ChatLogger;

impl ChatLogger {
    /// Initializes `env_logger` with the level from `LOG_LEVEL` (default
    /// `info`). `RUST_LOG`, when set, takes precedence. Calling it twice is a
    /// no-op.
    pub fn init() {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&level);
        if let Ok(filters) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filters);
        }
        let result = builder
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{}] [{}] {}",
                    Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                    record.level(),
                    record.args()
                )
            })
            .try_init();
        if result.is_ok() {
            info!("HauHub chat logger initialized ({})", level);
        }
    }
}

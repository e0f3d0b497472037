use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes the global logger exactly once. Safe to call from every
/// test entry point.
pub fn init_log() {
    INIT.call_once(|| {
        env_logger::Builder::from_default_env()
            .format_timestamp_micros()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} - {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("?"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .is_test(true)
            .try_init()
            .ok();
    });
}

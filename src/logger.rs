use env_logger::Builder;
use std::io::Write;

/// Logs to stderr, `info` and up unless `RUST_LOG` says otherwise.
pub fn init_logger() {
    Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args(),
            )
        })
        .init();
}

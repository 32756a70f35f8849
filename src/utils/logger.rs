use env_logger::{Builder, Env, Target};
use std::io::Write;

/// Install the process-wide logger.
///
/// `default_level` applies when `RUST_LOG` is unset, e.g. `"info"` or
/// `"peer_share=debug"`.
pub fn setup_logging(default_level: &str) {
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_level));

    builder
        .target(Target::Stdout)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] [{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        });

    // Tests and embedders may have installed a logger already.
    let _ = builder.try_init();
}

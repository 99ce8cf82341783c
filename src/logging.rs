//! Log output for the binaries
//!
//! The library only uses the `log` macros. Each process installs an
//! `env_logger` whose lines carry the process role, so that the interleaved
//! output of a coordinator and its participants stays readable.
//!
use std::io::Write;

use env_logger::{Builder, Env};

/// Installs the process wide logger. The filter defaults to `info` and can be
/// overridden through `RUST_LOG`. Later calls are no-ops.
pub fn init(role: &str) {
    let role = role.to_string();

    let _ = Builder::from_env(Env::new().filter_or("RUST_LOG", "info"))
        .format(move |buf, record| {
            writeln!(buf, "{} {:5} [{}] {}", buf.timestamp(), record.level(), role, record.args())
        })
        .try_init();
}

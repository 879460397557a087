// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Logging setup.
//!
//! The library only emits `tracing` events.  Binaries and tests call
//! [`init_tracing`] once to send them to stderr.

use tracing_subscriber::EnvFilter;

/// Map a `-v` count to a default filter: warnings, then info, debug,
/// and trace.
pub fn default_filter(verbosity: u64) -> &'static str {
    match verbosity {
        0 => "mandelqueue=warn",
        1 => "mandelqueue=info",
        2 => "mandelqueue=debug",
        _ => "mandelqueue=trace",
    }
}

/// Install a stderr subscriber with thread names.  `RUST_LOG`, if
/// set, overrides the verbosity.  Does nothing if a subscriber is
/// already installed.
pub fn init_tracing(verbosity: u64) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}

//! Terminates the platform once **CTRL+C** or **SIGHUP** is received.
//!
//! Terminating the platform makes the server close its socket, so that a node leaves the cluster
//! gracefully and its peers fall back to loading its keys locally.
use std::sync::Arc;

use tokio::signal::unix::SignalKind;

use crate::platform::Platform;

/// Installs a signal handler for the given platform which awaits either a **CTRL+C** or **SIGHUP**.
///
/// Note that this is automatically called by the [Builder](crate::builder::Builder) unless it is
/// disabled.
pub fn install(platform: Arc<Platform>) {
    crate::spawn!(async move {
        let mut sig_hup = match tokio::signal::unix::signal(SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(error) => {
                log::error!("Cannot install a handler for SIGHUP: {}", error);
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received CTRL-C. Shutting down...");
            },
            _ = sig_hup.recv() => {
                log::info!("Received SIGHUP. Shutting down...");
            }
        }

        platform.terminate();
    });
}

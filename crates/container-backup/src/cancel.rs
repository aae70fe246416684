//! Cancelling a run from a shutdown signal.
//!

use core::sync::atomic::{AtomicBool, Ordering};
use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use tokio::runtime::Builder;
use tracing::{error, warn};

/// Set `flag` when the process receives Ctrl-C, or SIGTERM on unix.
///
/// The handlers are installed before this returns. The returned thread exits once a signal
/// has been received.
pub fn cancel_on_signal(flag: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
    let runtime = Builder::new_current_thread().enable_io().build()?;

    let shutdown = {
        let _guard = runtime.enter();
        Shutdown::listen()?
    };

    thread::Builder::new()
        .name("shutdown-signal".to_string())
        .spawn(move || match runtime.block_on(shutdown.recv()) {
            Ok(signal) => {
                warn!("Received {signal}, restarting stopped containers before exiting");
                flag.store(true, Ordering::SeqCst);
            }
            Err(e) => error!("Failed to wait for shutdown signal: {e}"),
        })
}

#[cfg(unix)]
struct Shutdown {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Shutdown {
    fn listen() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(mut self) -> io::Result<&'static str> {
        tokio::select! {
            _ = self.interrupt.recv() => Ok("SIGINT"),
            _ = self.terminate.recv() => Ok("SIGTERM"),
        }
    }
}

#[cfg(not(unix))]
struct Shutdown;

#[cfg(not(unix))]
impl Shutdown {
    fn listen() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> io::Result<&'static str> {
        tokio::signal::ctrl_c().await?;
        Ok("Ctrl-C")
    }
}

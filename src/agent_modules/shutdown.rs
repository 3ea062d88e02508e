use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// SIGINT and SIGTERM listeners. Creating them replaces the default
/// disposition immediately, so a signal that arrives before anything awaits
/// them is queued rather than killing the process.
#[cfg(unix)]
pub struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    /// Must be called from within a tokio runtime.
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    pub async fn wait(self, shutdown: Arc<AtomicBool>) {
        let Self {
            mut interrupt,
            mut terminate,
        } = self;
        let received = async move {
            tokio::select! {
                r = interrupt.recv() => r,
                r = terminate.recv() => r,
            }
        };
        flag_on_signal(received, &shutdown).await;
    }
}

#[cfg(not(unix))]
pub struct ShutdownSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(not(unix))]
impl ShutdownSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    pub async fn wait(mut self, shutdown: Arc<AtomicBool>) {
        flag_on_signal(self.ctrl_c.recv(), &shutdown).await;
    }
}

/// Sets `shutdown` once `signal` yields. A closed listener (`None`) leaves
/// the flag alone; the agent keeps sampling.
pub async fn flag_on_signal<F>(signal: F, shutdown: &AtomicBool) -> bool
where
    F: Future<Output = Option<()>>,
{
    match signal.await {
        Some(()) => {
            shutdown.store(true, Ordering::SeqCst);
            info!("Program terminated by user, finishing the current cycle.");
            true
        }
        None => {
            error!("Signal listener closed, shutdown requests will no longer be seen.");
            false
        }
    }
}

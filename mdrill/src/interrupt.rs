//! Cooperative interruption.
//!
//! A dedicated listener thread flips a shared flag on SIGINT/SIGTERM; the
//! orchestrator polls the flag between operations and between test cases.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{info, warn};

/// Shared stop flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Start the signal listener thread and return the flag it drives.
    pub fn install() -> std::io::Result<Self> {
        let interrupt = Self::new();
        let flag = interrupt.clone();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        thread::Builder::new()
            .name("mdrill-signals".to_string())
            .spawn(move || {
                if let Err(e) = runtime.block_on(listen(flag)) {
                    warn!("Signal listener stopped: {}", e);
                }
            })?;
        Ok(interrupt)
    }
}

fn record(flag: &Interrupt) {
    if flag.is_set() {
        warn!("Interrupt already requested; waiting for the current step");
    } else {
        info!("Interrupt requested; stopping after the current step");
        flag.set();
    }
}

#[cfg(unix)]
async fn listen(flag: Interrupt) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT detected."),
            _ = sigterm.recv() => info!("SIGTERM detected."),
        }
        record(&flag);
    }
}

#[cfg(not(unix))]
async fn listen(flag: Interrupt) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C detected.");
        record(&flag);
    }
}

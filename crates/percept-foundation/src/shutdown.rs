use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;

/// Installs a Ctrl-C handler and a panic hook, returning a guard the main
/// loop can await on.
pub struct ShutdownHandler {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandler {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub async fn install(self) -> ShutdownGuard {
        let requested = Arc::clone(&self.requested);
        let notify = Arc::clone(&self.notify);

        tokio::spawn(async move {
            if signal::ctrl_c().await.is_err() {
                tracing::error!("Failed to install Ctrl-C handler");
                return;
            }
            tracing::info!("Shutdown requested via Ctrl-C");
            requested.store(true, Ordering::SeqCst);
            notify.notify_waiters();
        });

        let original_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            tracing::error!("PANIC: {}", panic_info);
            eprintln!("Application panicked: {}", panic_info);
            original_panic(panic_info);
        }));

        ShutdownGuard {
            requested: self.requested,
            notify: self.notify,
        }
    }
}

pub struct ShutdownGuard {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownGuard {
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

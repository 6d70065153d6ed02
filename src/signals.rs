//! Graceful-shutdown signal wiring
//!
//! SIGTERM/SIGINT flip a process-wide running flag that loops check
//! between iterations. In-flight synthesis is never interrupted; the
//! flag only stops new work from starting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

pub fn watch_shutdown(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let terminated = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut term) => {
                        term.recv().await;
                    }
                    Err(e) => {
                        warn!("cannot install SIGTERM handler: {e}");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            std::future::pending::<()>().await;
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminated => {}
        }
        warn!("shutdown signal received, finishing current work");
        running.store(false, Ordering::SeqCst);
    });
}

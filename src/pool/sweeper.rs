use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::pool::PoolInner;
use crate::Result;

/// Background thread sweeping the pool every `interval` until stopped or the
/// pool is dropped.
pub(crate) struct Sweeper {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub(crate) fn spawn(pool: Weak<PoolInner>, interval: Duration) -> Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("chronicle-pool-sweeper".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let report = pool.sweep();
                if report.evicted > 0 || report.skipped > 0 {
                    log::debug!(
                        "periodic sweep evicted {} environments, skipped {}",
                        report.evicted,
                        report.skipped
                    );
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("pool sweeper thread panicked");
            }
        }
    }
}

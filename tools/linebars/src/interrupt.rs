use crate::errors::LinebarsError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Builder;

/// Shared stop request; set once, never cleared.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Set `cancel` on the first Ctrl-C. The default SIGINT action would end the process
/// without restoring the cursor, so the display has to be closed by its owner instead.
pub fn cancel_on_ctrl_c(cancel: &CancelFlag) -> Result<(), LinebarsError> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| LinebarsError::Io(e.to_string()))?;
    let cancel = cancel.clone();
    std::thread::Builder::new()
        .name("linebars-ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });
        })
        .map_err(|e| LinebarsError::Io(e.to_string()))?;
    Ok(())
}

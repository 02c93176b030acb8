//! Compiler context: worker sizing, enabled containers and the
//! single-flight guard for compilation runs.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::config::CompilerConfig;
use crate::error::CompileError;

pub struct CompilerContext {
    config: CompilerConfig,
    running: Arc<AtomicBool>,
}

impl CompilerContext {
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn fetch_workers(&self) -> usize {
        self.config.fetch_workers.max(1)
    }

    pub fn compile_workers(&self) -> usize {
        self.config.compile_workers.max(1)
    }

    /// Configured containers in sorted order; empty when unset.
    pub fn enabled_containers(&self) -> BTreeSet<String> {
        self.config.enabled_containers.iter().cloned().collect()
    }

    /// Claim the run slot. `None` while another run is in progress.
    pub fn try_begin(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                flag: Arc::clone(&self.running),
            })
    }

    /// Claim the run slot or report `Busy`.
    pub fn begin(&self) -> Result<RunGuard, CompileError> {
        self.try_begin().ok_or_else(|| {
            warn!("Definition compilation is already running, rejecting the new request");
            CompileError::Busy
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Held for the duration of a run; releases the slot on drop.
#[derive(Debug)]
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

//! Read-only facade handed to stage operations.
//!
//! Stage logic reads histories, state, output files and usage through here
//! and reports progress with `dispatch`. It has no way to append to the
//! history log: completion records are appended by the driver.

use crate::compiler::CompilerSet;
use crate::config::{PipelineConfig, VendorSection};
use crate::events::{EventBus, PipelineEvent};
use crate::files::project_files;
use crate::history::{FileMap, History};
use crate::orchestrator::state::{PipelineState, SharedLedger};
use crate::usage::{TokenUsage, UsageMeter};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct PipelineContext {
    config: Arc<PipelineConfig>,
    compilers: CompilerSet,
    ledger: SharedLedger,
    usage: UsageMeter,
    bus: EventBus,
}

impl PipelineContext {
    pub(crate) fn new(
        config: Arc<PipelineConfig>,
        compilers: CompilerSet,
        ledger: SharedLedger,
        usage: UsageMeter,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            compilers,
            ledger,
            usage,
            bus,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn vendor(&self) -> &VendorSection {
        &self.config.vendor
    }

    pub fn compiler(&self) -> &CompilerSet {
        &self.compilers
    }

    pub fn histories(&self) -> Vec<History> {
        self.ledger.histories()
    }

    pub fn state(&self) -> PipelineState {
        self.ledger.state()
    }

    pub fn files(&self) -> FileMap {
        project_files(&self.ledger.state())
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage.snapshot()
    }

    /// Counters stage logic records its own vendor spend into.
    pub fn usage_meter(&self) -> &UsageMeter {
        &self.usage
    }

    /// Publish a progress event. Never waits for listeners.
    pub fn dispatch(&self, event: PipelineEvent) -> usize {
        self.bus.publish(event)
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }
}

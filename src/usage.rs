//! Token usage accounting.
//!
//! Counters are split by the component that spent them: the facade
//! conversation plus one bucket per stage. They only ever grow.

use crate::history::StageKind;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputUsage {
    pub total: u64,
    pub cached: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputUsage {
    pub total: u64,
    pub reasoning: u64,
    pub accepted_prediction: u64,
    pub rejected_prediction: u64,
}

/// Token counts for one component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentUsage {
    pub total: u64,
    pub input: InputUsage,
    pub output: OutputUsage,
}

impl ComponentUsage {
    /// Usage with only the headline input/output totals filled in.
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            total: input + output,
            input: InputUsage {
                total: input,
                cached: 0,
            },
            output: OutputUsage {
                total: output,
                ..OutputUsage::default()
            },
        }
    }

    fn add(&mut self, other: &ComponentUsage) {
        self.total += other.total;
        self.input.total += other.input.total;
        self.input.cached += other.input.cached;
        self.output.total += other.output.total;
        self.output.reasoning += other.output.reasoning;
        self.output.accepted_prediction += other.output.accepted_prediction;
        self.output.rejected_prediction += other.output.rejected_prediction;
    }
}

/// Which component a usage report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageSource {
    Facade,
    Stage(StageKind),
}

/// Per-component usage summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub facade: ComponentUsage,
    pub analyze: ComponentUsage,
    pub prisma: ComponentUsage,
    pub interface: ComponentUsage,
    pub test: ComponentUsage,
    pub realize: ComponentUsage,
}

impl TokenUsage {
    pub fn component(&self, source: UsageSource) -> &ComponentUsage {
        match source {
            UsageSource::Facade => &self.facade,
            UsageSource::Stage(StageKind::Analyze) => &self.analyze,
            UsageSource::Stage(StageKind::Prisma) => &self.prisma,
            UsageSource::Stage(StageKind::Interface) => &self.interface,
            UsageSource::Stage(StageKind::Test) => &self.test,
            UsageSource::Stage(StageKind::Realize) => &self.realize,
        }
    }

    fn component_mut(&mut self, source: UsageSource) -> &mut ComponentUsage {
        match source {
            UsageSource::Facade => &mut self.facade,
            UsageSource::Stage(StageKind::Analyze) => &mut self.analyze,
            UsageSource::Stage(StageKind::Prisma) => &mut self.prisma,
            UsageSource::Stage(StageKind::Interface) => &mut self.interface,
            UsageSource::Stage(StageKind::Test) => &mut self.test,
            UsageSource::Stage(StageKind::Realize) => &mut self.realize,
        }
    }

    /// Sum over every component.
    pub fn aggregate(&self) -> ComponentUsage {
        let mut sum = ComponentUsage::default();
        for component in [
            &self.facade,
            &self.analyze,
            &self.prisma,
            &self.interface,
            &self.test,
            &self.realize,
        ] {
            sum.add(component);
        }
        sum
    }
}

/// Shared, increment-only usage counters for one pipeline instance.
#[derive(Debug, Clone, Default)]
pub struct UsageMeter(Arc<Mutex<TokenUsage>>);

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TokenUsage> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add `usage` to the counters of `source`.
    pub fn record(&self, source: UsageSource, usage: ComponentUsage) {
        self.lock().component_mut(source).add(&usage);
    }

    pub fn snapshot(&self) -> TokenUsage {
        *self.lock()
    }

    /// A meter starting from the current counters that shares nothing with
    /// this one afterwards.
    pub fn fork(&self) -> Self {
        Self(Arc::new(Mutex::new(self.snapshot())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates_per_component() {
        let meter = UsageMeter::new();
        meter.record(UsageSource::Facade, ComponentUsage::new(10, 5));
        meter.record(UsageSource::Facade, ComponentUsage::new(1, 1));
        meter.record(UsageSource::Stage(StageKind::Prisma), ComponentUsage::new(100, 50));

        let usage = meter.snapshot();
        assert_eq!(usage.facade.total, 17);
        assert_eq!(usage.facade.input.total, 11);
        assert_eq!(usage.component(UsageSource::Stage(StageKind::Prisma)).output.total, 50);
        assert_eq!(usage.analyze, ComponentUsage::default());
    }

    #[test]
    fn test_aggregate_sums_every_component() {
        let meter = UsageMeter::new();
        for stage in StageKind::all() {
            meter.record(UsageSource::Stage(*stage), ComponentUsage::new(2, 3));
        }
        let mut detailed = ComponentUsage::new(1, 1);
        detailed.input.cached = 1;
        detailed.output.reasoning = 1;
        meter.record(UsageSource::Facade, detailed);

        let total = meter.snapshot().aggregate();
        assert_eq!(total.total, 27);
        assert_eq!(total.input.total, 11);
        assert_eq!(total.input.cached, 1);
        assert_eq!(total.output.reasoning, 1);
    }

    #[test]
    fn test_fork_is_independent() {
        let meter = UsageMeter::new();
        meter.record(UsageSource::Facade, ComponentUsage::new(4, 4));
        let fork = meter.fork();
        fork.record(UsageSource::Facade, ComponentUsage::new(1, 0));

        assert_eq!(meter.snapshot().facade.total, 8);
        assert_eq!(fork.snapshot().facade.total, 9);
    }

    #[test]
    fn test_clone_shares_counters() {
        let meter = UsageMeter::new();
        let handle = meter.clone();
        handle.record(UsageSource::Facade, ComponentUsage::new(1, 0));
        assert_eq!(meter.snapshot().facade.total, 1);
    }
}

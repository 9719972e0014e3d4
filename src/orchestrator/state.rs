//! State projection over the history log.
//!
//! `PipelineState` is a last-write-wins fold of the log per stage. The
//! `Ledger` keeps the log and its projection side by side so each append
//! updates only the affected stage, while `PipelineState::replay` remains
//! the reference fold the incremental path must always agree with.

use crate::history::{
    AnalyzeArtifact, CompileOutcome, History, HistoryStore, InterfaceArtifact, PrismaArtifact,
    RealizeArtifact, StageKind, StageRecord, TestArtifact,
};
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Latest artifact per stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineState {
    pub analyze: Option<StageRecord<AnalyzeArtifact>>,
    pub prisma: Option<StageRecord<PrismaArtifact>>,
    pub interface: Option<StageRecord<InterfaceArtifact>>,
    pub test: Option<StageRecord<TestArtifact>>,
    pub realize: Option<StageRecord<RealizeArtifact>>,
}

/// Validity of one stage relative to the current analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Absent,
    /// Step matches the current analysis and compilation (if any) passed.
    UpToDate { step: u32 },
    /// Generated for an older analysis step.
    Outdated { step: u32, analysis_step: u32 },
    /// Current, but the compiler rejected it.
    CompileFailed { step: u32 },
}

impl StageStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, StageStatus::UpToDate { .. })
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Absent => write!(f, "none"),
            StageStatus::UpToDate { step } => write!(f, "up-to-date (step {})", step),
            StageStatus::Outdated {
                step,
                analysis_step,
            } => write!(f, "outdated (step {}, analysis at {})", step, analysis_step),
            StageStatus::CompileFailed { step } => write!(f, "compile failed (step {})", step),
        }
    }
}

/// Furthest point of the dependency chain that is fully valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Idle,
    AnalyzeDone(u32),
    PrismaDone(u32),
    InterfaceDone(u32),
    TestDone(u32),
    RealizeDone(u32),
}

impl PipelineStatus {
    /// The stage the gatekeeper would open next, `None` once realized.
    pub fn next_stage(&self) -> Option<StageKind> {
        match self {
            PipelineStatus::Idle => Some(StageKind::Analyze),
            PipelineStatus::AnalyzeDone(_) => Some(StageKind::Prisma),
            PipelineStatus::PrismaDone(_) => Some(StageKind::Interface),
            PipelineStatus::InterfaceDone(_) => Some(StageKind::Test),
            PipelineStatus::TestDone(_) => Some(StageKind::Realize),
            PipelineStatus::RealizeDone(_) => None,
        }
    }
}

impl PipelineState {
    /// Fold a full log from empty.
    pub fn replay<'a>(histories: impl IntoIterator<Item = &'a History>) -> Self {
        let mut state = Self::default();
        for history in histories {
            state.apply(history);
        }
        state
    }

    /// Fold one record into the projection. Only the record's own stage slot
    /// changes; conversational records leave the projection untouched.
    pub fn apply(&mut self, history: &History) {
        match history {
            History::UserMessage(_) | History::AssistantMessage(_) => {}
            History::Analyze(r) => self.analyze = Some(r.clone()),
            History::Prisma(r) => self.prisma = Some(r.clone()),
            History::Interface(r) => self.interface = Some(r.clone()),
            History::Test(r) => self.test = Some(r.clone()),
            History::Realize(r) => self.realize = Some(r.clone()),
        }
    }

    pub fn is_present(&self, stage: StageKind) -> bool {
        self.step_of(stage).is_some()
    }

    pub fn step_of(&self, stage: StageKind) -> Option<u32> {
        match stage {
            StageKind::Analyze => self.analyze.as_ref().map(|r| r.step),
            StageKind::Prisma => self.prisma.as_ref().map(|r| r.step),
            StageKind::Interface => self.interface.as_ref().map(|r| r.step),
            StageKind::Test => self.test.as_ref().map(|r| r.step),
            StageKind::Realize => self.realize.as_ref().map(|r| r.step),
        }
    }

    /// Compile outcome of a stage; `None` when absent or never compiled.
    pub fn compiled_of(&self, stage: StageKind) -> Option<&CompileOutcome> {
        match stage {
            StageKind::Analyze => None,
            StageKind::Prisma => self.prisma.as_ref().map(|r| &r.artifact.compiled),
            StageKind::Interface => self.interface.as_ref().map(|r| &r.artifact.compiled),
            StageKind::Test => self.test.as_ref().map(|r| &r.artifact.compiled),
            StageKind::Realize => self.realize.as_ref().map(|r| &r.artifact.compiled),
        }
    }

    pub fn analysis_step(&self) -> Option<u32> {
        self.step_of(StageKind::Analyze)
    }

    /// Step the next analysis run will be stamped with.
    pub fn next_analysis_step(&self) -> u32 {
        self.analysis_step().map_or(1, |step| step + 1)
    }

    /// `downstream` is consistent with `upstream` iff their steps match.
    /// Computed on every read so a re-run upstream invalidates immediately.
    pub fn is_consistent(&self, upstream: StageKind, downstream: StageKind) -> bool {
        match (self.step_of(upstream), self.step_of(downstream)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn stage_status(&self, stage: StageKind) -> StageStatus {
        let Some(step) = self.step_of(stage) else {
            return StageStatus::Absent;
        };
        if stage != StageKind::Analyze {
            let analysis_step = self.analysis_step().unwrap_or(0);
            if analysis_step != step {
                return StageStatus::Outdated {
                    step,
                    analysis_step,
                };
            }
        }
        match self.compiled_of(stage) {
            Some(outcome) if !outcome.is_success() => StageStatus::CompileFailed { step },
            _ => StageStatus::UpToDate { step },
        }
    }

    pub fn is_valid(&self, stage: StageKind) -> bool {
        self.stage_status(stage).is_valid()
    }

    pub fn status(&self) -> PipelineStatus {
        let mut status = PipelineStatus::Idle;
        for stage in StageKind::all() {
            let StageStatus::UpToDate { step } = self.stage_status(*stage) else {
                break;
            };
            status = match stage {
                StageKind::Analyze => PipelineStatus::AnalyzeDone(step),
                StageKind::Prisma => PipelineStatus::PrismaDone(step),
                StageKind::Interface => PipelineStatus::InterfaceDone(step),
                StageKind::Test => PipelineStatus::TestDone(step),
                StageKind::Realize => PipelineStatus::RealizeDone(step),
            };
        }
        status
    }
}

/// A history log together with its incrementally maintained projection.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    store: HistoryStore,
    state: PipelineState,
}

impl Ledger {
    pub fn new(histories: Vec<History>) -> Self {
        let state = PipelineState::replay(&histories);
        Self {
            store: HistoryStore::from_entries(histories),
            state,
        }
    }

    pub fn append(&mut self, history: History) -> usize {
        self.state.apply(&history);
        self.store.append(history)
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }
}

/// Shared handle to a ledger. Only the orchestrator appends; every other
/// holder reads.
#[derive(Debug, Clone, Default)]
pub struct SharedLedger(Arc<RwLock<Ledger>>);

impl SharedLedger {
    pub fn new(histories: Vec<History>) -> Self {
        Self(Arc::new(RwLock::new(Ledger::new(histories))))
    }

    // The ledger is never left half-updated by a panic (append is a push
    // plus a slot assignment), so a poisoned lock still guards valid data.
    fn read(&self) -> RwLockReadGuard<'_, Ledger> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Ledger> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(in crate::orchestrator) fn append(&self, history: History) -> usize {
        self.write().append(history)
    }

    pub fn len(&self) -> usize {
        self.read().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn histories(&self) -> Vec<History> {
        self.read().store.entries().to_vec()
    }

    pub fn slice_from(&self, index: usize) -> Vec<History> {
        self.read().store.slice_from(index)
    }

    pub fn state(&self) -> PipelineState {
        self.read().state.clone()
    }

    /// An independent ledger seeded with the current content.
    pub fn deep_copy(&self) -> Self {
        Self(Arc::new(RwLock::new(self.read().clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{
        AssistantMessageHistory, FileMap, StageArtifact, UserInput, UserMessageHistory,
    };
    use chrono::Utc;

    fn analyze(step: u32, reason: &str) -> History {
        let now = Utc::now();
        StageArtifact::Analyze(AnalyzeArtifact {
            reason: reason.to_string(),
            files: FileMap::from([("overview.md".to_string(), reason.to_string())]),
        })
        .into_history(step, now, now)
    }

    fn prisma(step: u32, compiled: CompileOutcome) -> History {
        let now = Utc::now();
        StageArtifact::Prisma(PrismaArtifact {
            reason: "schema".to_string(),
            schemas: FileMap::new(),
            compiled,
        })
        .into_history(step, now, now)
    }

    fn interface(step: u32) -> History {
        let now = Utc::now();
        StageArtifact::Interface(InterfaceArtifact {
            reason: "api".to_string(),
            document: serde_json::json!({ "operations": [] }),
            files: FileMap::new(),
            compiled: CompileOutcome::success(),
        })
        .into_history(step, now, now)
    }

    fn user(text: &str) -> History {
        History::UserMessage(UserMessageHistory::new(UserInput::from(text)))
    }

    fn assistant(text: &str) -> History {
        let now = Utc::now();
        History::AssistantMessage(AssistantMessageHistory {
            id: uuid::Uuid::new_v4(),
            text: text.to_string(),
            created_at: now,
            completed_at: now,
        })
    }

    #[test]
    fn test_empty_log_projects_empty_state() {
        let state = PipelineState::replay(std::iter::empty());
        assert_eq!(state, PipelineState::default());
        assert_eq!(state.status(), PipelineStatus::Idle);
        assert_eq!(state.next_analysis_step(), 1);
    }

    #[test]
    fn test_last_write_wins_per_stage() {
        let log = vec![
            analyze(1, "first"),
            user("again"),
            analyze(2, "second"),
            analyze(3, "third"),
        ];
        let state = PipelineState::replay(&log);
        let latest = state.analyze.as_ref().unwrap();
        assert_eq!(latest.step, 3);
        assert_eq!(latest.artifact.reason, "third");
        assert_eq!(History::Analyze(latest.clone()), log[3]);
    }

    #[test]
    fn test_incremental_ledger_matches_full_replay_at_every_prefix() {
        let log = vec![
            user("build a bbs"),
            analyze(1, "bbs"),
            prisma(1, CompileOutcome::success()),
            assistant("schema ready"),
            interface(1),
            analyze(2, "bbs with votes"),
            prisma(2, CompileOutcome::Failure { reason: "bad relation".into() }),
            prisma(2, CompileOutcome::success()),
        ];

        let mut ledger = Ledger::default();
        for (i, history) in log.iter().enumerate() {
            let len = ledger.append(history.clone());
            assert_eq!(len, i + 1);
            assert_eq!(ledger.state(), &PipelineState::replay(&log[..=i]));
        }
    }

    #[test]
    fn test_conversation_records_do_not_touch_state() {
        let mut state = PipelineState::replay(&[analyze(1, "x")]);
        let before = state.clone();
        state.apply(&user("hi"));
        state.apply(&assistant("hello"));
        assert_eq!(state, before);
    }

    #[test]
    fn test_rerunning_analysis_makes_downstream_stale() {
        let mut state = PipelineState::replay(&[
            analyze(1, "v1"),
            prisma(1, CompileOutcome::success()),
        ]);
        assert!(state.is_valid(StageKind::Prisma));
        assert!(state.is_consistent(StageKind::Analyze, StageKind::Prisma));

        state.apply(&analyze(2, "v2"));
        assert_eq!(
            state.stage_status(StageKind::Prisma),
            StageStatus::Outdated {
                step: 1,
                analysis_step: 2
            }
        );
        assert!(!state.is_consistent(StageKind::Analyze, StageKind::Prisma));
        // The stored artifact is still there and still compiled successfully.
        assert!(state.compiled_of(StageKind::Prisma).unwrap().is_success());
        assert_eq!(state.status(), PipelineStatus::AnalyzeDone(2));
    }

    #[test]
    fn test_compile_failure_status() {
        let state = PipelineState::replay(&[
            analyze(1, "v1"),
            prisma(1, CompileOutcome::Exception { error: "crash".into() }),
        ]);
        assert_eq!(
            state.stage_status(StageKind::Prisma),
            StageStatus::CompileFailed { step: 1 }
        );
        assert_eq!(state.status(), PipelineStatus::AnalyzeDone(1));
    }

    #[test]
    fn test_status_stops_at_first_gap() {
        // Interface exists but prisma is missing: chain stops at analysis.
        let state = PipelineState::replay(&[analyze(1, "v1"), interface(1)]);
        assert_eq!(state.status(), PipelineStatus::AnalyzeDone(1));
        assert_eq!(state.status().next_stage(), Some(StageKind::Prisma));

        let state = PipelineState::replay(&[
            analyze(1, "v1"),
            prisma(1, CompileOutcome::success()),
            interface(1),
        ]);
        assert_eq!(state.status(), PipelineStatus::InterfaceDone(1));
    }

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Absent.to_string(), "none");
        assert_eq!(
            StageStatus::Outdated {
                step: 1,
                analysis_step: 3
            }
            .to_string(),
            "outdated (step 1, analysis at 3)"
        );
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let ledger = SharedLedger::new(vec![analyze(1, "v1")]);
        let copy = ledger.deep_copy();
        copy.append(analyze(2, "v2"));

        assert_eq!(ledger.len(), 1);
        assert_eq!(copy.len(), 2);
        assert_eq!(ledger.state().analysis_step(), Some(1));
        assert_eq!(copy.state().analysis_step(), Some(2));
    }

    #[test]
    fn test_shared_ledger_seeded_state_matches_replay() {
        let log = vec![analyze(1, "v1"), prisma(1, CompileOutcome::success())];
        let ledger = SharedLedger::new(log.clone());
        assert_eq!(ledger.state(), PipelineState::replay(&log));
        assert_eq!(ledger.slice_from(1), vec![log[1].clone()]);
    }
}

//! Storage contract for the future-state synthesis pipeline: record types,
//! the `SynthesisStorage` trait, an in-memory reference backend and a
//! backend-agnostic conformance suite.

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{InMemoryStorage, MemorySnapshot};
pub use record::{
    AgentRunRecord, AgentRunStatus, EdgeChanges, FlowComparisonRecord, FlowStateType, FlowType,
    FutureStateEdgeRecord, FutureStateNodeRecord, FutureStateRecord, FutureStateStatus,
    ImplementationDependencyRecord, ImplementationItemRecord, ImplementationWaveRecord,
    InformationFlowRecord, NodeAction, NodeChanges, ProcessConnectionRecord, ProcessStepRecord,
    SequencingCleared, SessionRecord, SolutionBucket, SolutionCardRecord,
    SolutionDependencyRecord, SolutionStatus,
};
pub use traits::SynthesisStorage;

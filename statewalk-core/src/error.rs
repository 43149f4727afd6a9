use crate::history::ObsId;
use crate::model::{LinkId, PageId, ReqId, StateId};
use statewalk_scanner::ScanError;
use thiserror::Error;

/// Why an incremental extension gave up and asked for a full rebuild.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    /// A clusterability flag changed somewhere in the page classification tree.
    #[error("page clustering changed")]
    ClusterShift,

    /// The link tree of a page no longer fits its abstract page.
    #[error("link tree does not fit page {page}")]
    LinkTreeMismatch { page: PageId },

    /// A new request would regroup the requests sharing its method and path.
    #[error("request grouping changed")]
    RequestSplit,

    /// A request reached a different abstract page from a state it was already seen in.
    #[error("request {request} diverged in state {state}")]
    RequestConflict { request: ReqId, state: StateId },

    /// A link reached a different request or state from a state it was already followed in.
    #[error("link {link} diverged in state {state}")]
    LinkConflict { link: LinkId, state: StateId },

    /// Identical requests produced structurally different pages in one state.
    #[error("page {page} changed shape in state {state}")]
    SignatureConflict { page: PageId, state: StateId },

    /// The link that was followed is not a member of any abstract link.
    #[error("observation {obs} followed an unknown link")]
    UnknownLink { obs: ObsId },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Graph needs a rebuild: {reason}")]
pub struct NeedsRebuild {
    pub reason: RebuildReason,
}

impl From<RebuildReason> for NeedsRebuild {
    fn from(reason: RebuildReason) -> Self {
        NeedsRebuild { reason }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Form target mismatch: expected transition {expected}, got {found}")]
    TransitionMismatch { expected: StateId, found: StateId },

    #[error("State merge disagrees on {what} from state {state}")]
    InconsistentMerge { what: String, state: StateId },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReduceError {
    #[error("No state split point left for observation {at} (conflicts with {witness})")]
    StateSplitExhausted { at: ObsId, witness: ObsId },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Navigation failed: {0}")]
    Navigation(#[from] ScanError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("State reduction failed: {0}")]
    Reduce(#[from] ReduceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

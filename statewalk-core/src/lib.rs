pub mod clusterer;
pub mod config;
pub mod engine;
pub mod error;
pub mod frontier;
pub mod graph;
pub mod history;
pub mod links;
pub mod model;
pub mod reduce;
pub mod report;
pub mod tree;
pub mod vectors;

pub use config::{ClusterConfig, EngineConfig};
pub use engine::{CancelFlag, Engine, Outcome, StopReason};
pub use error::{EngineError, GraphError, NeedsRebuild, RebuildReason, ReduceError};
pub use graph::AppGraph;
pub use history::{History, ObsId, Observation, Via};
pub use model::{LinkId, PageId, ReqId, StateId};
pub use reduce::{Reduction, StateMap, reduce};
pub use report::{ModelReport, to_dot};

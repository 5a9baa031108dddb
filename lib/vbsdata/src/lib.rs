pub use anyhow::Result;

use fnv::FnvHashMap as Map;

pub type Loc = u32;
pub type Cost = f64;
pub type Timestamp = i64;
pub type StationId = u64;
pub type RequestId = u64;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DataError {
  #[error("request {request} references unknown station id {station}")]
  UnknownStation { request: RequestId, station: StationId },
  #[error("station id {0} appears more than once")]
  DuplicateStation(StationId),
  #[error("{table} cost table is {found}x{found}, expected {expected}x{expected}")]
  DimensionMismatch { table: &'static str, found: usize, expected: usize },
  #[error("invalid cost {cost} for arc ({i}, {j})")]
  InvalidCost { i: Loc, j: Loc, cost: Cost },
  #[error("self-cost of station {0} must be zero")]
  NonZeroSelfCost(Loc),
  #[error("arc ({i}, {j}) is out of range for {n} stations")]
  ArcOutOfRange { i: Loc, j: Loc, n: usize },
  #[error("scenario bound [{start}, {end}) is empty")]
  EmptyBound { start: Timestamp, end: Timestamp },
}

pub mod cost;
pub mod instance;
pub mod metrics;
pub mod scenario;
pub mod synthetic;

pub use cost::CostTable;
pub use instance::{Instance, RawRequest, Request, Station};
pub use scenario::Scenario;

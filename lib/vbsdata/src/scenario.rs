use itertools::Itertools;
use crate::*;

/// A labelled subset of the requests, optionally bounded to `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
  pub label: String,
  pub bound: Option<(Timestamp, Timestamp)>,
  /// Origin of the time discretisation: the bound start, else the earliest request.
  pub start: Timestamp,
  /// Sorted by timestamp, then request id.
  pub requests: Vec<Request>,
}

impl Scenario {
  pub fn new(label: impl Into<String>, bound: Option<(Timestamp, Timestamp)>, instance: &Instance) -> std::result::Result<Self, DataError> {
    if let Some((start, end)) = bound {
      if end <= start {
        return Err(DataError::EmptyBound { start, end });
      }
    }
    Ok(Scenario::select(label.into(), bound, instance))
  }

  /// Every request of the instance, discretised from the earliest one.
  pub fn all(label: impl Into<String>, instance: &Instance) -> Self {
    Scenario::select(label.into(), None, instance)
  }

  fn select(label: String, bound: Option<(Timestamp, Timestamp)>, instance: &Instance) -> Self {
    let requests = instance.requests.iter()
      .filter(|r| match bound {
        Some((start, end)) => start <= r.timestamp && r.timestamp < end,
        None => true,
      })
      .copied()
      .sorted_by_key(|r| (r.timestamp, r.id))
      .collect_vec();

    let start = match bound {
      Some((start, _)) => start,
      None => requests.first().map(|r| r.timestamp).unwrap_or(0),
    };

    Scenario { label, bound, start, requests }
  }

  /// `count` consecutive scenarios of length `period`, the first starting at `first_start`.
  /// Scenarios are labelled `{prefix}{k}`.
  pub fn split_by_period(instance: &Instance,
                         first_start: Timestamp,
                         period: Timestamp,
                         count: usize,
                         prefix: &str) -> std::result::Result<Vec<Self>, DataError> {
    (0..count)
      .map(|k| {
        let start = first_start + period * k as Timestamp;
        Scenario::new(format!("{}{}", prefix, k), Some((start, start + period)), instance)
      })
      .collect()
  }

  #[inline]
  pub fn len(&self) -> usize { self.requests.len() }

  #[inline]
  pub fn is_empty(&self) -> bool { self.requests.is_empty() }
}

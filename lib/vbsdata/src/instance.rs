use crate::*;
use crate::Map;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Station {
  pub id: StationId,
  pub x: f64,
  pub y: f64,
}

/// A trip request as delivered by the loaders, referencing stations by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRequest {
  pub id: RequestId,
  pub origin: StationId,
  pub destination: StationId,
  pub timestamp: Timestamp,
}

/// A trip request with origin and destination resolved to station indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Request {
  pub id: RequestId,
  pub origin: Loc,
  pub destination: Loc,
  pub timestamp: Timestamp,
}

impl Request {
  #[inline]
  pub fn od(&self) -> (Loc, Loc) {
    (self.origin, self.destination)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
  pub id: String,
  pub stations: Vec<Station>,
  pub requests: Vec<Request>,
  pub walk: CostTable,
  pub route: CostTable,
}

impl Instance {
  pub fn new(id: impl Into<String>,
             stations: Vec<Station>,
             raw_requests: impl IntoIterator<Item=RawRequest>,
             walk: CostTable,
             route: CostTable) -> std::result::Result<Self, DataError> {
    let n = stations.len();
    for (table, t) in [("walking", &walk), ("routing", &route)] {
      if t.num_stations() != n {
        return Err(DataError::DimensionMismatch { table, found: t.num_stations(), expected: n });
      }
    }

    let mut index: Map<StationId, Loc> = Map::with_capacity_and_hasher(n, Default::default());
    for (k, s) in stations.iter().enumerate() {
      if index.insert(s.id, k as Loc).is_some() {
        return Err(DataError::DuplicateStation(s.id));
      }
    }

    let lookup = |request: RequestId, station: StationId| {
      index.get(&station).copied().ok_or(DataError::UnknownStation { request, station })
    };

    let requests = raw_requests.into_iter()
      .map(|r| Ok(Request {
        id: r.id,
        origin: lookup(r.id, r.origin)?,
        destination: lookup(r.id, r.destination)?,
        timestamp: r.timestamp,
      }))
      .collect::<std::result::Result<Vec<_>, DataError>>()?;

    Ok(Instance { id: id.into(), stations, requests, walk, route })
  }

  #[inline]
  pub fn num_stations(&self) -> usize { self.stations.len() }

  pub fn locs(&self) -> Vec<Loc> {
    (0..self.stations.len() as Loc).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn stations(ids: &[StationId]) -> Vec<Station> {
    ids.iter().map(|&id| Station { id, x: id as f64, y: 0.0 }).collect()
  }

  fn zero_table(n: usize) -> CostTable {
    CostTable::from_fn(n, |_, _| Some(1.0)).unwrap()
  }

  #[test]
  fn resolves_station_ids() -> crate::Result<()> {
    let raw = vec![RawRequest { id: 7, origin: 30, destination: 10, timestamp: 5 }];
    let inst = Instance::new("t", stations(&[10, 20, 30]), raw, zero_table(3), zero_table(3))?;
    assert_eq!(inst.requests[0].od(), (2, 0));
    assert_eq!(inst.locs(), vec![0, 1, 2]);
    Ok(())
  }

  #[test]
  fn rejects_unknown_station() {
    let raw = vec![RawRequest { id: 7, origin: 30, destination: 99, timestamp: 5 }];
    let err = Instance::new("t", stations(&[10, 30]), raw, zero_table(2), zero_table(2)).unwrap_err();
    assert_eq!(err, DataError::UnknownStation { request: 7, station: 99 });
  }

  #[test]
  fn rejects_duplicate_station_and_bad_dimension() {
    let err = Instance::new("t", stations(&[1, 1]), vec![], zero_table(2), zero_table(2)).unwrap_err();
    assert_eq!(err, DataError::DuplicateStation(1));
    let err = Instance::new("t", stations(&[1, 2]), vec![], zero_table(2), zero_table(3)).unwrap_err();
    assert_eq!(err, DataError::DimensionMismatch { table: "routing", found: 3, expected: 2 });
  }
}

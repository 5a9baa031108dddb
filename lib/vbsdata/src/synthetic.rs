//! Seeded random instances for tests and benchmarks.
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use tracing::*;

use crate::*;
use crate::metrics::{cost_table, Euclidean};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticConfig {
  pub num_stations: usize,
  pub num_requests: usize,
  /// Side length of the square stations are drawn from.
  pub extent: f64,
  /// Requests are drawn uniformly from `[0, horizon)`.
  pub horizon: Timestamp,
  /// Distance units per second.
  pub walk_speed: f64,
  pub drive_speed: f64,
}

impl Default for SyntheticConfig {
  fn default() -> Self {
    SyntheticConfig {
      num_stations: 30,
      num_requests: 200,
      extent: 5_000.0,
      horizon: 4 * 3600,
      walk_speed: 1.4,
      drive_speed: 8.0,
    }
  }
}

impl SyntheticConfig {
  #[instrument(level="debug", skip(self))]
  pub fn generate(&self, seed: u64) -> Result<Instance> {
    let mut rng = StdRng::seed_from_u64(seed);
    let stations: Vec<Station> = (0..self.num_stations)
      .map(|k| Station {
        id: 1000 + k as StationId,
        x: rng.gen_range(0.0..self.extent),
        y: rng.gen_range(0.0..self.extent),
      })
      .collect();

    let raw: Vec<RawRequest> = if self.num_stations < 2 {
      Vec::new()
    } else {
      (0..self.num_requests)
        .map(|k| {
          let o = rng.gen_range(0..self.num_stations);
          let mut d = rng.gen_range(0..self.num_stations - 1);
          if d >= o { d += 1; }
          RawRequest {
            id: k as RequestId,
            origin: stations[o].id,
            destination: stations[d].id,
            timestamp: rng.gen_range(0..self.horizon.max(1)),
          }
        })
        .collect()
    };

    let coords: Vec<_> = stations.iter().map(|s| (s.x, s.y)).collect();
    let walk = cost_table(Euclidean(), &coords, 1.0 / self.walk_speed)?;
    let route = cost_table(Euclidean(), &coords, 1.0 / self.drive_speed)?;
    debug!(stations=stations.len(), requests=raw.len(), "generated instance");
    Ok(Instance::new(format!("synthetic-{}", seed), stations, raw, walk, route)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn deterministic() -> crate::Result<()> {
    let cfg = SyntheticConfig { num_stations: 8, num_requests: 20, ..Default::default() };
    let a = cfg.generate(3)?;
    let b = cfg.generate(3)?;
    assert_eq!(a, b);
    assert_eq!(a.requests.len(), 20);
    assert!(a.requests.iter().all(|r| r.origin != r.destination));
    assert!(a.walk.is_symmetric());
    Ok(())
  }

  #[test]
  fn single_station_has_no_requests() -> crate::Result<()> {
    let cfg = SyntheticConfig { num_stations: 1, ..Default::default() };
    assert!(cfg.generate(0)?.requests.is_empty());
    Ok(())
  }
}

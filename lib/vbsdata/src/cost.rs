use ndarray::Array2;
use crate::{Cost, DataError, Loc};

/// Dense station-pair cost lookup.  An unavailable cost is stored as `None` and is never
/// replaced by a numeric sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct CostTable {
  costs: Array2<Option<Cost>>,
}

impl CostTable {
  /// Builds a table from `f(i, j)`; the diagonal is always 0 regardless of `f`.
  pub fn from_fn(n: usize, mut f: impl FnMut(Loc, Loc) -> Option<Cost>) -> Result<Self, DataError> {
    let costs = Array2::from_shape_fn((n, n), |(i, j)| {
      if i == j { Some(0.0) } else { f(i as Loc, j as Loc) }
    });
    let table = CostTable { costs };
    table.validate()?;
    Ok(table)
  }

  /// Builds a table from explicit arcs.  Arcs not listed are unavailable.
  pub fn from_arcs(n: usize, arcs: impl IntoIterator<Item=((Loc, Loc), Cost)>) -> Result<Self, DataError> {
    let mut costs = Array2::from_elem((n, n), None);
    for ((i, j), c) in arcs {
      if i as usize >= n || j as usize >= n {
        return Err(DataError::ArcOutOfRange { i, j, n });
      }
      costs[[i as usize, j as usize]] = Some(c);
    }
    for i in 0..n {
      match costs[[i, i]] {
        Some(c) if c != 0.0 => return Err(DataError::NonZeroSelfCost(i as Loc)),
        _ => costs[[i, i]] = Some(0.0),
      }
    }
    let table = CostTable { costs };
    table.validate()?;
    Ok(table)
  }

  fn validate(&self) -> Result<(), DataError> {
    for ((i, j), c) in self.costs.indexed_iter() {
      if let Some(c) = *c {
        if !c.is_finite() || c < 0.0 {
          return Err(DataError::InvalidCost { i: i as Loc, j: j as Loc, cost: c });
        }
        if i == j && c != 0.0 {
          return Err(DataError::NonZeroSelfCost(i as Loc));
        }
      }
    }
    Ok(())
  }

  #[inline]
  pub fn num_stations(&self) -> usize {
    self.costs.nrows()
  }

  #[inline]
  pub fn get(&self, i: Loc, j: Loc) -> Option<Cost> {
    self.costs[[i as usize, j as usize]]
  }

  /// Cost treating an unavailable arc as infinitely expensive.
  #[inline]
  pub fn get_or_inf(&self, i: Loc, j: Loc) -> Cost {
    self.get(i, j).unwrap_or(Cost::INFINITY)
  }

  pub fn is_symmetric(&self) -> bool {
    let n = self.num_stations();
    (0..n).all(|i| (i + 1..n).all(|j| self.costs[[i, j]] == self.costs[[j, i]]))
  }

  fn off_diagonal(&self) -> impl Iterator<Item=Cost> + '_ {
    self.costs.indexed_iter()
      .filter_map(|((i, j), c)| if i != j { *c } else { None })
  }

  /// Largest available off-diagonal cost, or `None` for fewer than two connected stations.
  pub fn max_cost(&self) -> Option<Cost> {
    self.off_diagonal().fold(None, |acc, c| Some(acc.map_or(c, |a: Cost| a.max(c))))
  }

  /// Smallest available off-diagonal cost.
  pub fn min_cost(&self) -> Option<Cost> {
    self.off_diagonal().fold(None, |acc, c| Some(acc.map_or(c, |a: Cost| a.min(c))))
  }
}

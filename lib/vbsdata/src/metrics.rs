use num_traits::{AsPrimitive, Num};
use crate::{Cost, CostTable, DataError, Loc};

pub trait Metric {
  const SYM: bool = false;

  fn compute<T: Num + AsPrimitive<f64>>(p1: (T, T), p2: (T, T)) -> f64;
}


pub struct Euclidean();

impl Metric for Euclidean {
  const SYM: bool = true;

  fn compute<T: Num + AsPrimitive<f64>>(p1: (T, T), p2: (T, T)) -> f64 {
    let a = p1.0.as_() - p2.0.as_();
    let b = p1.1.as_() - p2.1.as_();
    (a*a + b*b).sqrt()
  }
}

pub struct Manhattan();

impl Metric for Manhattan {
  const SYM: bool = true;

  fn compute<T: Num + AsPrimitive<f64>>(p1: (T, T), p2: (T, T)) -> f64 {
    (p1.0.as_() - p2.0.as_()).abs() + (p1.1.as_() - p2.1.as_()).abs()
  }
}

/// Compute the cost table for the given planar coordinates, multiplying each distance by `scale`
/// (e.g. seconds per unit of distance).
#[inline]
pub fn cost_table<M, T>(metric: M, coords: &[(T, T)], scale: f64) -> Result<CostTable, DataError>
  where
    M: Metric,
    T: Num + AsPrimitive<f64> + Copy,
{
  cost_table_pp(metric, coords, |d| Some(d * scale))
}

/// Like [`cost_table`], but allows a post-processing function to be supplied.  Returning `None`
/// from `func` marks the arc as unavailable.
pub fn cost_table_pp<M, T>(_metric: M, coords: &[(T, T)], func: impl Fn(f64) -> Option<Cost>) -> Result<CostTable, DataError>
  where
    M: Metric,
    T: Num + AsPrimitive<f64> + Copy,
{
  let n = coords.len();
  let mut arcs = Vec::with_capacity(n * n);
  if M::SYM {
    for i in 0..n {
      let p1 = coords[i];
      for j in (i+1)..n {
        if let Some(d) = func(M::compute(p1, coords[j])) {
          arcs.push(((i as Loc, j as Loc), d));
          arcs.push(((j as Loc, i as Loc), d));
        }
      }
    }
  } else {
    for i in 0..n {
      let p1 = coords[i];
      for j in 0..n {
        if i == j { continue; }
        if let Some(d) = func(M::compute(p1, coords[j])) {
          arcs.push(((i as Loc, j as Loc), d));
        }
      }
    }
  }
  CostTable::from_arcs(n, arcs)
}

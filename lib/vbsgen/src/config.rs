use crate::{Cost, Timestamp};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("time window must be positive, got {0}")]
    NonPositiveTimeWindow(Timestamp),
    #[error("routing delay must be non-negative, got {0}")]
    NegativeRoutingDelay(Cost),
    #[error("walking-distance limit must be non-negative, got {0}")]
    NegativeWalkLimit(Cost),
    #[error("maximum cluster diameter must be non-negative, got {0}")]
    NegativeDiameter(Cost),
    #[error("{0} must be a finite number")]
    NonFinite(&'static str),
    #[error("give either a maximum cluster diameter or a cluster count, not both")]
    ClusterModeAmbiguous,
    #[error("one of maximum cluster diameter or cluster count is required")]
    ClusterModeMissing,
    #[error("pooling time window {detour} differs from the demand index time window {index}")]
    TimeWindowMismatch { index: Timestamp, detour: Timestamp },
    #[error("cluster count must be between 1 and {n}, got {count}")]
    ClusterCountOutOfRange { count: usize, n: usize },
}

fn check_finite(name: &'static str, x: Cost) -> Result<(), ConfigError> {
    if x.is_finite() { Ok(()) } else { Err(ConfigError::NonFinite(name)) }
}

fn check_time_window(time_window: Timestamp) -> Result<(), ConfigError> {
    if time_window <= 0 {
        return Err(ConfigError::NonPositiveTimeWindow(time_window));
    }
    Ok(())
}

/// Parameters of the temporal demand index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexParams {
    /// Width of a time bucket in seconds.
    pub time_window: Timestamp,
    /// Maximum walking cost origin -> pickup and dropoff -> destination.  Candidate sets are only
    /// built when this is set.
    pub walk_limit: Option<Cost>,
}

impl IndexParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_time_window(self.time_window)?;
        if let Some(limit) = self.walk_limit {
            check_finite("walk_limit", limit)?;
            if limit < 0.0 {
                return Err(ConfigError::NegativeWalkLimit(limit));
            }
        }
        Ok(())
    }
}

/// Parameters of the pooling enumeration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetourParams {
    /// Extra routing cost a detour through a middle station may add.
    pub routing_delay: Cost,
    /// Must match the demand index's time window.
    pub time_window: Timestamp,
}

impl DetourParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_time_window(self.time_window)?;
        check_finite("routing_delay", self.routing_delay)?;
        if self.routing_delay < 0.0 {
            return Err(ConfigError::NegativeRoutingDelay(self.routing_delay));
        }
        Ok(())
    }
}

/// Exactly one of the two fields must be set.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClusterParams {
    pub max_diameter: Option<Cost>,
    pub num_clusters: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClusterMode {
    Diameter(Cost),
    Count(usize),
}

impl ClusterParams {
    pub fn diameter(d: Cost) -> Self {
        ClusterParams { max_diameter: Some(d), num_clusters: None }
    }

    pub fn count(c: usize) -> Self {
        ClusterParams { max_diameter: None, num_clusters: Some(c) }
    }

    /// Resolves the clustering mode for `n` stations.
    pub fn mode(&self, n: usize) -> Result<ClusterMode, ConfigError> {
        match (self.max_diameter, self.num_clusters) {
            (Some(_), Some(_)) => Err(ConfigError::ClusterModeAmbiguous),
            (None, None) => Err(ConfigError::ClusterModeMissing),
            (Some(d), None) => {
                check_finite("max_diameter", d)?;
                if d < 0.0 { Err(ConfigError::NegativeDiameter(d)) } else { Ok(ClusterMode::Diameter(d)) }
            },
            (None, Some(count)) => {
                if count == 0 || count > n {
                    Err(ConfigError::ClusterCountOutOfRange { count, n })
                } else {
                    Ok(ClusterMode::Count(count))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_params() {
        assert!(IndexParams { time_window: 300, walk_limit: None }.validate().is_ok());
        assert!(IndexParams { time_window: 300, walk_limit: Some(0.0) }.validate().is_ok());
        assert_eq!(
            IndexParams { time_window: 0, walk_limit: None }.validate(),
            Err(ConfigError::NonPositiveTimeWindow(0))
        );
        assert_eq!(
            IndexParams { time_window: 60, walk_limit: Some(-1.0) }.validate(),
            Err(ConfigError::NegativeWalkLimit(-1.0))
        );
        assert_eq!(
            IndexParams { time_window: 60, walk_limit: Some(f64::NAN) }.validate(),
            Err(ConfigError::NonFinite("walk_limit"))
        );
    }

    #[test]
    fn detour_params() {
        assert!(DetourParams { routing_delay: 0.0, time_window: 1 }.validate().is_ok());
        assert_eq!(
            DetourParams { routing_delay: -0.5, time_window: 1 }.validate(),
            Err(ConfigError::NegativeRoutingDelay(-0.5))
        );
        assert_eq!(
            DetourParams { routing_delay: 5.0, time_window: -3 }.validate(),
            Err(ConfigError::NonPositiveTimeWindow(-3))
        );
    }

    #[test]
    fn cluster_mode() {
        assert_eq!(ClusterParams::default().mode(4), Err(ConfigError::ClusterModeMissing));
        assert_eq!(
            ClusterParams { max_diameter: Some(1.0), num_clusters: Some(2) }.mode(4),
            Err(ConfigError::ClusterModeAmbiguous)
        );
        assert_eq!(ClusterParams::count(0).mode(4), Err(ConfigError::ClusterCountOutOfRange { count: 0, n: 4 }));
        assert_eq!(ClusterParams::count(5).mode(4), Err(ConfigError::ClusterCountOutOfRange { count: 5, n: 4 }));
        assert_eq!(ClusterParams::count(4).mode(4), Ok(ClusterMode::Count(4)));
        assert_eq!(ClusterParams::diameter(0.0).mode(4), Ok(ClusterMode::Diameter(0.0)));
        assert_eq!(ClusterParams::diameter(-2.0).mode(4), Err(ConfigError::NegativeDiameter(-2.0)));
    }
}

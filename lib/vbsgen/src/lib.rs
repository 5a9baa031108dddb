use std::path::Path;
use fnv::{FnvHashMap, FnvHashSet};

pub use vbsdata::{Cost, Loc, Timestamp};

pub mod config;
pub mod demand;
pub mod detour;
pub mod cluster;
pub mod warmstart;

pub use config::ConfigError;

pub type Map<K, V> = FnvHashMap<K, V>;
pub type Set<T> = FnvHashSet<T>;

/// Index of a time bucket relative to its scenario's start.
pub type TimeId = u32;
/// Position of a scenario in the slice the demand index was built from.
pub type ScenarioIdx = usize;
/// (origin, destination) station indices.
pub type OdPair = (Loc, Loc);
/// A single (scenario, time bucket) slot.
pub type SlotKey = (ScenarioIdx, TimeId);


mod logging_setup {
    use super::*;
    use tracing_subscriber::{EnvFilter, fmt, registry, prelude::*};
    use tracing_appender::{non_blocking, non_blocking::WorkerGuard};
    use std::fs::OpenOptions;

    fn build_and_set_global_subscriber<P>(logfile: Option<P>, is_test : bool) -> anyhow::Result<Option<WorkerGuard>> where
        P : AsRef<Path>
    {
        let stderr_log = fmt::layer().with_writer(std::io::stderr);
        let env_filter = EnvFilter::from_default_env();
        let r = registry().with(stderr_log).with(env_filter);

        let flush_guard = match logfile {
            Some(p) => {
                let logfile = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(p)?;
                let (writer, guard) = non_blocking::NonBlockingBuilder::default()
                    .lossy(false)
                    .finish(logfile);
                let json = fmt::layer()
                    .json()
                    .with_span_list(true)
                    .with_current_span(false)
                    .with_writer(writer);

                let r = r.with(json);
                if is_test { r.try_init().ok(); }
                else { r.try_init()?; }
                Some(guard)
            },
            None => {
                if is_test { r.try_init().ok(); }
                else { r.try_init()?; }
                None
            }
        };
        return Ok(flush_guard)
    }

    /// Install the global subscriber: stderr output filtered by `RUST_LOG`, plus newline-delimited
    /// JSON in `logfile` if given.  Keep the returned guard alive until exit.
    pub fn init_logging(logfile: Option<impl AsRef<Path>>) -> anyhow::Result<Option<WorkerGuard>> {
        return build_and_set_global_subscriber(logfile, false);
    }

    #[allow(dead_code)]
    pub(crate) fn init_test_logging(logfile: Option<impl AsRef<Path>>) -> Option<WorkerGuard> {
        return build_and_set_global_subscriber(logfile, true).ok().flatten();
    }
}
pub use logging_setup::*;


#[macro_export]
macro_rules! map (
    { $($key:expr => $value:expr),+ } => {
        {
            let mut m = $crate::Map::default();
            $(
                m.insert($key, $value);
            )+
            m
        }
     };
);

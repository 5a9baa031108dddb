use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::path::PathBuf;
use std::io::{self, Write};
use anyhow::Result;
use json::JsonValue;
use structopt::StructOpt;
use tracing::*;

#[derive(Clone, Debug, StructOpt)]
pub struct OutputOptions {
    /// `json` writes every index, `json-summ` only the size counters
    #[structopt(long="format", short="f", default_value="json-summ", possible_values=&OutputFormat::NAMES)]
    pub fmt: OutputFormat,
    #[structopt(long="output", short="o")]
    pub file: Option<PathBuf>,
    /// Newline-delimited JSON log file
    #[structopt(long)]
    pub log: Option<PathBuf>,
}

/// Validates a numeric option against optional inclusive bounds.  NaN is rejected, since it
/// compares false against either bound.
pub fn bounded<T>(minval: Option<T>, maxval: Option<T>) -> impl Fn(String) -> Result<(), String>
    where
        T: FromStr + PartialOrd + Display + Copy,
        T::Err: Display
{
    move |val| {
        let x: T = val.parse().map_err(|e: T::Err| e.to_string())?;
        if x.partial_cmp(&x).is_none() {
            return Err("must be a number".to_string());
        }
        match (minval, maxval) {
            (Some(lo), _) if x < lo => Err(format!("must be at least {}", lo)),
            (_, Some(hi)) if x > hi => Err(format!("must be at most {}", hi)),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum OutputFormat {
    /// Every index, in full.
    Full,
    /// Only the `size_info` counters.
    Summary,
}

impl OutputFormat {
    pub const NAMES: [&'static str; 2] = ["json", "json-summ"];
    const ALL: [OutputFormat; 2] = [OutputFormat::Full, OutputFormat::Summary];

    pub fn name(self) -> &'static str {
        Self::NAMES[self as usize]
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::NAMES.iter()
            .position(|&n| n == s)
            .map(|i| Self::ALL[i])
            .ok_or_else(|| format!("unknown output format {:?}", s))
    }
}

/// A precomputation result: the full JSON document plus counters for the summary.
pub trait Report {
    fn size_info(&self) -> &HashMap<String, isize>;

    fn to_json(&self) -> JsonValue;

    fn render(&self, fmt: OutputFormat) -> JsonValue {
        match fmt {
            OutputFormat::Full => self.to_json(),
            OutputFormat::Summary => self.size_info().clone().into(),
        }
    }
}

pub fn output_report(options: &OutputOptions, report: &impl Report) -> Result<()> {
    let root = report.render(options.fmt);
    match options.file.as_ref() {
        Some(path) => {
            let mut writer = io::BufWriter::new(std::fs::File::create(path)?);
            root.write_pretty(&mut writer, 2)?;
            writer.flush()?;
            info!(path=%path.display(), format=options.fmt.name(), "report written");
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            root.write_pretty(&mut lock, 2)?;
            writeln!(lock)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counts(HashMap<String, isize>);

    impl Report for Counts {
        fn size_info(&self) -> &HashMap<String, isize> { &self.0 }

        fn to_json(&self) -> JsonValue {
            json::object! { counts: self.0.clone(), extra: true }
        }
    }

    #[test]
    fn format_names_round_trip() {
        for name in OutputFormat::NAMES.iter() {
            let fmt: OutputFormat = name.parse().unwrap();
            assert_eq!(fmt.name(), *name);
        }
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn summary_renders_only_counters() {
        let mut m = HashMap::new();
        m.insert("stations".to_string(), 3isize);
        let r = Counts(m);
        let summary = r.render(OutputFormat::Summary);
        assert_eq!(summary["stations"], 3);
        assert!(summary["extra"].is_null());
        let full = r.render(OutputFormat::Full);
        assert_eq!(full["extra"], true);
        assert_eq!(full["counts"]["stations"], 3);
    }

    #[test]
    fn bounded_rejects_out_of_range_and_nan() {
        let v = bounded(Some(0.0f64), Some(10.0));
        assert!(v("5".to_string()).is_ok());
        assert!(v("0".to_string()).is_ok());
        assert!(v("-1".to_string()).is_err());
        assert!(v("10.5".to_string()).is_err());
        assert!(v("NaN".to_string()).is_err());
        assert!(v("abc".to_string()).is_err());

        let n = bounded(Some(1usize), None);
        assert!(n("0".to_string()).is_err());
        assert!(n("1000".to_string()).is_ok());
    }
}

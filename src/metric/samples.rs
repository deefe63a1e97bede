//! Metric sample sets and client-side consolidation.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Consolidation function used when several samples collapse into one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Consolidation {
    #[default]
    Average,
    Max,
    Min,
}

impl Consolidation {
    /// Name as understood by the metric store.
    #[must_use]
    pub const fn store_name(self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Max => "MAX",
            Self::Min => "MIN",
        }
    }

    /// Combines samples, ignoring gaps. All gaps yield a gap.
    #[must_use]
    pub fn combine(self, samples: &[Option<f64>]) -> Option<f64> {
        let mut present = samples.iter().filter_map(|v| *v);
        let first = present.next()?;
        match self {
            Self::Average => {
                let (sum, count) = present.fold((first, 1u32), |(s, n), v| (s + v, n + 1));
                Some(sum / f64::from(count))
            }
            Self::Max => Some(present.fold(first, f64::max)),
            Self::Min => Some(present.fold(first, f64::min)),
        }
    }
}

impl FromStr for Consolidation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "average" | "avg" => Ok(Self::Average),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            other => Err(format!("unknown consolidation function '{other}'")),
        }
    }
}

impl fmt::Display for Consolidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_name())
    }
}

/// Samples of one metric over a time axis.
///
/// `values[i]` covers `[start + i*step, start + (i+1)*step)`; `None` is a gap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSamples {
    /// Actual start, unix seconds.
    pub start: i64,
    /// Actual end, unix seconds.
    pub end: i64,
    /// Actual step in seconds.
    pub step: u64,
    pub values: Vec<Option<f64>>,
}

impl MetricSamples {
    /// Creates a sample set; the end is derived from start, step and length.
    #[must_use]
    pub fn new(start: i64, step: u64, values: Vec<Option<f64>>) -> Self {
        let end = end_of(start, step, values.len());
        Self {
            start,
            end,
            step,
            values,
        }
    }

    /// Merges every `factor` consecutive samples into one.
    #[must_use]
    pub fn consolidate(self, factor: usize, cf: Consolidation) -> Self {
        if factor <= 1 || self.values.is_empty() {
            return self;
        }
        let values: Vec<Option<f64>> = self.values.chunks(factor).map(|c| cf.combine(c)).collect();
        let step = self.step.saturating_mul(factor as u64);
        Self::new(self.start, step, values)
    }

    /// Coarsens the samples until the step is at least `resolution` seconds.
    #[must_use]
    pub fn with_resolution(self, resolution: u64, cf: Consolidation) -> Self {
        if self.step == 0 || resolution <= self.step {
            return self;
        }
        let factor = resolution.div_ceil(self.step);
        self.consolidate(usize::try_from(factor).unwrap_or(usize::MAX), cf)
    }

    /// Coarsens the samples until at most `max_entries` remain.
    #[must_use]
    pub fn limit_entries(self, max_entries: usize, cf: Consolidation) -> Self {
        if max_entries == 0 || self.values.len() <= max_entries {
            return self;
        }
        let factor = self.values.len().div_ceil(max_entries);
        self.consolidate(factor, cf)
    }
}

fn end_of(start: i64, step: u64, len: usize) -> i64 {
    let span = step.saturating_mul(len as u64);
    start.saturating_add(i64::try_from(span).unwrap_or(i64::MAX))
}

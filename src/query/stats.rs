//! Stats entries and their streaming accumulators.

use std::fmt;
use std::str::FromStr;

use crate::catalog::{Column, ColumnType, Row};
use crate::error::TypeMismatchError;
use crate::time::ClockSkew;
use crate::value::Value;

use super::filter::Filter;

/// Aggregate function of a `Stats:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Std,
    SumInv,
    AvgInv,
}

impl StatsFunction {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
            Self::Std => "std",
            Self::SumInv => "suminv",
            Self::AvgInv => "avginv",
        }
    }
}

impl FromStr for StatsFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "count" => Self::Count,
            "sum" => Self::Sum,
            "min" => Self::Min,
            "max" => Self::Max,
            "avg" => Self::Avg,
            "std" => Self::Std,
            "suminv" => Self::SumInv,
            "avginv" => Self::AvgInv,
            other => return Err(format!("unknown stats function '{other}'")),
        })
    }
}

impl fmt::Display for StatsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of the stats stack.
#[derive(Debug, Clone)]
pub enum StatsSpec {
    /// Counts rows matching the predicate.
    Count(Filter),
    /// Folds a numeric column.
    Aggregate {
        column: Column,
        function: StatsFunction,
    },
}

impl StatsSpec {
    /// Creates an aggregate over `column`, checking that it is numeric.
    pub fn aggregate(column: Column, function: StatsFunction) -> Result<Self, TypeMismatchError> {
        if function != StatsFunction::Count && !column.is_aggregatable() {
            return Err(TypeMismatchError::NotAggregatable {
                column: column.name().to_string(),
                column_type: column.column_type().name(),
            });
        }
        Ok(Self::Aggregate { column, function })
    }

    /// Returns true for counting predicates, the only entries that combine.
    #[must_use]
    pub const fn is_predicate(&self) -> bool {
        matches!(self, Self::Count(_))
    }

    /// A fresh accumulator for this entry.
    #[must_use]
    pub const fn accumulator(&self) -> Accumulator<'_> {
        Accumulator {
            spec: self,
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            sum_inv: 0.0,
            min: None,
            max: None,
        }
    }
}

/// Streaming fold of one stats entry; no row is retained.
#[derive(Debug, Clone)]
pub struct Accumulator<'s> {
    spec: &'s StatsSpec,
    count: u64,
    sum: f64,
    sum_sq: f64,
    sum_inv: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator<'_> {
    /// Folds one row that passed the filter tree.
    pub fn update(&mut self, row: &Row<'_>, skew: ClockSkew) {
        match self.spec {
            StatsSpec::Count(filter) => {
                if filter.matches(row, skew) {
                    self.count += 1;
                }
            }
            StatsSpec::Aggregate {
                function: StatsFunction::Count,
                ..
            } => self.count += 1,
            StatsSpec::Aggregate { column, .. } => {
                let value = match column.extract(row) {
                    Value::Time(t) => Value::Time(skew.to_client(t)),
                    v => v,
                };
                if let Some(v) = value.as_f64() {
                    self.count += 1;
                    self.sum += v;
                    self.sum_sq += v * v;
                    self.sum_inv += 1.0 / v;
                    self.min = Some(self.min.map_or(v, |m| m.min(v)));
                    self.max = Some(self.max.map_or(v, |m| m.max(v)));
                }
            }
        }
    }

    /// The aggregate value. Empty aggregates are 0.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn finish(&self) -> Value {
        let (column, function) = match self.spec {
            StatsSpec::Count(_) => return Value::Int(count_value(self.count)),
            StatsSpec::Aggregate { column, function } => (column, *function),
        };
        if function == StatsFunction::Count {
            return Value::Int(count_value(self.count));
        }
        if self.count == 0 {
            return Value::Int(0);
        }

        let n = self.count as f64;
        let result = match function {
            StatsFunction::Count => n,
            StatsFunction::Sum => self.sum,
            StatsFunction::Min => self.min.unwrap_or_default(),
            StatsFunction::Max => self.max.unwrap_or_default(),
            StatsFunction::Avg => self.sum / n,
            StatsFunction::Std => {
                if self.count < 2 {
                    0.0
                } else {
                    ((self.sum_sq - self.sum * self.sum / n) / (n - 1.0)).max(0.0).sqrt()
                }
            }
            StatsFunction::SumInv => self.sum_inv,
            StatsFunction::AvgInv => self.sum_inv / n,
        };

        let integral = matches!(
            function,
            StatsFunction::Sum | StatsFunction::Min | StatsFunction::Max
        ) && matches!(column.column_type(), ColumnType::Int | ColumnType::Time);
        if integral {
            Value::Int(result as i64)
        } else {
            Value::Float(result)
        }
    }
}

fn count_value(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

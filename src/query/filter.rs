//! Filter trees: leaf comparisons type-checked at parse time, combined with
//! AND/OR/NOT.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

use regex::{Regex, RegexBuilder};

use crate::catalog::{Column, ColumnType, Row};
use crate::error::TypeMismatchError;
use crate::time::ClockSkew;
use crate::value::Value;

const REGEX_CACHE_MAX: usize = 1024;

static REGEX_CACHE: OnceLock<RwLock<HashMap<(String, bool), Regex>>> = OnceLock::new();

/// Compiles a pattern, reusing earlier compilations of the same pattern.
fn cached_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, TypeMismatchError> {
    let cache = REGEX_CACHE.get_or_init(|| RwLock::new(HashMap::new()));
    let key = (pattern.to_string(), case_insensitive);

    // A poisoned cache only costs a recompile.
    if let Ok(guard) = cache.read() {
        if let Some(re) = guard.get(&key) {
            return Ok(re.clone());
        }
    }

    let compiled = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| TypeMismatchError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

    if let Ok(mut guard) = cache.write() {
        if guard.len() >= REGEX_CACHE_MAX {
            guard.clear();
        }
        guard.entry(key).or_insert_with(|| compiled.clone());
    }
    Ok(compiled)
}

/// Comparison operator of a `Filter:` or `Stats:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    /// `~`: regex search.
    Matches,
    /// `~~`: case-insensitive regex search.
    MatchesIcase,
    /// `=~`: case-insensitive equality.
    EqualIcase,
    NotMatches,
    NotMatchesIcase,
    NotEqualIcase,
}

impl Operator {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
            Self::Matches => "~",
            Self::MatchesIcase => "~~",
            Self::EqualIcase => "=~",
            Self::NotMatches => "!~",
            Self::NotMatchesIcase => "!~~",
            Self::NotEqualIcase => "!=~",
        }
    }

    /// Returns true for `=`, `!=`, `<`, `>`, `<=`, `>=`.
    #[must_use]
    pub const fn is_ordering(self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::Less
                | Self::Greater
                | Self::LessOrEqual
                | Self::GreaterOrEqual
        )
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal | Self::EqualIcase => ordering == Ordering::Equal,
            Self::NotEqual | Self::NotEqualIcase => ordering != Ordering::Equal,
            Self::Less => ordering == Ordering::Less,
            Self::Greater => ordering == Ordering::Greater,
            Self::LessOrEqual => ordering != Ordering::Greater,
            Self::GreaterOrEqual => ordering != Ordering::Less,
            Self::Matches | Self::MatchesIcase | Self::NotMatches | Self::NotMatchesIcase => false,
        }
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "=" => Self::Equal,
            "!=" => Self::NotEqual,
            "<" => Self::Less,
            ">" => Self::Greater,
            "<=" => Self::LessOrEqual,
            ">=" => Self::GreaterOrEqual,
            "~" => Self::Matches,
            "~~" => Self::MatchesIcase,
            "=~" => Self::EqualIcase,
            "!~" => Self::NotMatches,
            "!~~" => Self::NotMatchesIcase,
            "!=~" => Self::NotEqualIcase,
            other => return Err(format!("unknown operator '{other}'")),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A literal compiled for one column type.
#[derive(Debug, Clone)]
enum Test {
    Int(i64),
    Float(f64),
    /// Unix seconds in the client's clock.
    Time(i64),
    Text(String),
    TextIcase(String),
    Regex { regex: Regex, negate: bool },
    ListEmpty { negate: bool },
    ListContains { element: String, negate: bool },
    ListRegex { regex: Regex, negate: bool },
}

/// A leaf predicate: `<column> <op> <literal>`.
#[derive(Debug, Clone)]
pub struct Comparison {
    column: Column,
    operator: Operator,
    literal: String,
    test: Test,
}

impl Comparison {
    /// Type-checks the literal against the column and compiles it.
    pub fn new(
        column: Column,
        operator: Operator,
        literal: &str,
    ) -> Result<Self, TypeMismatchError> {
        if !column.is_filterable() {
            return Err(TypeMismatchError::NotFilterable {
                column: column.name().to_string(),
            });
        }
        let test = compile(&column, operator, literal)?;
        Ok(Self {
            column,
            operator,
            literal: literal.to_string(),
            test,
        })
    }

    #[must_use]
    pub const fn column(&self) -> &Column {
        &self.column
    }

    #[must_use]
    pub const fn operator(&self) -> Operator {
        self.operator
    }

    #[must_use]
    pub fn literal(&self) -> &str {
        &self.literal
    }

    /// Evaluates the comparison on one row.
    #[must_use]
    pub fn matches(&self, row: &Row<'_>, skew: ClockSkew) -> bool {
        let value = self.column.extract(row);
        let op = self.operator;
        match (&self.test, &value) {
            (Test::Int(lit), Value::Int(v)) => op.accepts(v.cmp(lit)),
            (Test::Float(lit), v) => v
                .as_f64()
                .and_then(|v| v.partial_cmp(lit))
                .is_some_and(|o| op.accepts(o)),
            (Test::Time(lit), Value::Time(t)) => {
                op.accepts(skew.to_client(*t).timestamp().cmp(lit))
            }
            (Test::Text(lit), Value::String(v)) => op.accepts(v.as_str().cmp(lit.as_str())),
            (Test::TextIcase(lit), Value::String(v)) => {
                op.accepts(v.to_lowercase().cmp(lit))
            }
            (Test::Regex { regex, negate }, Value::String(v)) => regex.is_match(v) != *negate,
            (Test::ListEmpty { negate }, Value::List(items)) => items.is_empty() != *negate,
            (Test::ListContains { element, negate }, Value::List(items)) => {
                items.contains(element) != *negate
            }
            (Test::ListRegex { regex, negate }, Value::List(items)) => {
                items.iter().any(|i| regex.is_match(i)) != *negate
            }
            // Tuple lists match against their first member.
            (Test::ListEmpty { negate }, Value::Tuples(items)) => items.is_empty() != *negate,
            (Test::ListContains { element, negate }, Value::Tuples(items)) => {
                items
                    .iter()
                    .any(|t| t.first().and_then(Value::as_str) == Some(element.as_str()))
                    != *negate
            }
            (Test::ListRegex { regex, negate }, Value::Tuples(items)) => {
                items
                    .iter()
                    .any(|t| t.first().and_then(Value::as_str).is_some_and(|s| regex.is_match(s)))
                    != *negate
            }
            _ => false,
        }
    }
}

fn unsupported(column: &Column, operator: Operator) -> TypeMismatchError {
    TypeMismatchError::UnsupportedOperator {
        column: column.name().to_string(),
        column_type: column.column_type().name(),
        operator: operator.symbol().to_string(),
    }
}

fn invalid_literal(column: &Column, expected: &'static str, literal: &str) -> TypeMismatchError {
    TypeMismatchError::InvalidLiteral {
        column: column.name().to_string(),
        expected,
        literal: literal.to_string(),
    }
}

fn compile(column: &Column, op: Operator, literal: &str) -> Result<Test, TypeMismatchError> {
    match column.column_type() {
        ColumnType::Int | ColumnType::Float | ColumnType::Time if !op.is_ordering() => {
            Err(unsupported(column, op))
        }
        ColumnType::Int => literal
            .trim()
            .parse()
            .map(Test::Int)
            .map_err(|_| invalid_literal(column, "integer", literal)),
        ColumnType::Float => literal
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| !v.is_nan())
            .map(Test::Float)
            .ok_or_else(|| invalid_literal(column, "float", literal)),
        ColumnType::Time => literal
            .trim()
            .parse()
            .map(Test::Time)
            .map_err(|_| invalid_literal(column, "unix time", literal)),
        ColumnType::String => Ok(match op {
            Operator::Matches | Operator::NotMatches => Test::Regex {
                regex: cached_regex(literal, false)?,
                negate: op == Operator::NotMatches,
            },
            Operator::MatchesIcase | Operator::NotMatchesIcase => Test::Regex {
                regex: cached_regex(literal, true)?,
                negate: op == Operator::NotMatchesIcase,
            },
            Operator::EqualIcase | Operator::NotEqualIcase => {
                Test::TextIcase(literal.to_lowercase())
            }
            _ => Test::Text(literal.to_string()),
        }),
        ColumnType::List => match op {
            Operator::Equal | Operator::NotEqual if literal.is_empty() => Ok(Test::ListEmpty {
                negate: op == Operator::NotEqual,
            }),
            Operator::Equal | Operator::NotEqual => Err(invalid_literal(column, "empty", literal)),
            Operator::GreaterOrEqual | Operator::Less => Ok(Test::ListContains {
                element: literal.to_string(),
                negate: op == Operator::Less,
            }),
            Operator::Matches | Operator::NotMatches => Ok(Test::ListRegex {
                regex: cached_regex(literal, false)?,
                negate: op == Operator::NotMatches,
            }),
            Operator::MatchesIcase | Operator::NotMatchesIcase => Ok(Test::ListRegex {
                regex: cached_regex(literal, true)?,
                negate: op == Operator::NotMatchesIcase,
            }),
            _ => Err(unsupported(column, op)),
        },
        ColumnType::Blob => Err(TypeMismatchError::NotFilterable {
            column: column.name().to_string(),
        }),
    }
}

/// A filter tree. `And(vec![])` matches every row, `Or(vec![])` none.
#[derive(Debug, Clone)]
pub enum Filter {
    Leaf(Comparison),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// The filter matching every row.
    #[must_use]
    pub const fn all() -> Self {
        Self::And(Vec::new())
    }

    /// Returns true if this filter trivially accepts every row.
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        matches!(self, Self::And(children) if children.is_empty())
    }

    /// Conjunction of `filters`, flattening a single entry.
    #[must_use]
    pub fn and(mut filters: Vec<Self>) -> Self {
        if filters.len() == 1 {
            return filters.remove(0);
        }
        Self::And(filters)
    }

    /// Disjunction of `filters`, flattening a single entry.
    #[must_use]
    pub fn or(mut filters: Vec<Self>) -> Self {
        if filters.len() == 1 {
            return filters.remove(0);
        }
        Self::Or(filters)
    }

    /// Complement of `filter`.
    #[must_use]
    pub fn negate(filter: Self) -> Self {
        match filter {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    /// Evaluates the tree with short-circuit AND/OR.
    #[must_use]
    pub fn matches(&self, row: &Row<'_>, skew: ClockSkew) -> bool {
        match self {
            Self::Leaf(cmp) => cmp.matches(row, skew),
            Self::And(children) => children.iter().all(|f| f.matches(row, skew)),
            Self::Or(children) => children.iter().any(|f| f.matches(row, skew)),
            Self::Not(inner) => !inner.matches(row, skew),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

//! Request parser: `GET <table>` followed by `Keyword: arguments` lines.
//!
//! `Filter:` and `Stats:` lines push onto operand stacks; `And:`, `Or:`,
//! `Negate:` and their `Stats*` counterparts pop and push combinations.
//! Whatever remains on the filter stack is ANDed, whatever remains on the
//! stats stack becomes one output column per entry.

use std::sync::Arc;

use chrono::Utc;

use crate::catalog::{Catalog, Column, Table};
use crate::error::{ParseError, ProtocolError, RequestError};
use crate::time::ClockSkew;

use super::filter::{Comparison, Filter, Operator};
use super::output::{parse_flag, OutputFormat, ResponseHeader, Separators};
use super::stats::{StatsFunction, StatsSpec};
use super::Query;

/// Largest request block accepted, in bytes.
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;
/// Largest request block accepted, in lines.
pub const MAX_REQUEST_LINES: usize = 10_000;

/// Directives that take no arguments and may omit the colon.
const ARGUMENTLESS: [&str; 2] = ["Negate", "StatsNegate"];

/// Connection-level flags of a request, readable even if parsing fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    pub keep_alive: bool,
    pub response_header: ResponseHeader,
}

/// Scans a request for `KeepAlive:` and `ResponseHeader:` without
/// validating anything else, so error replies use the requested framing.
#[must_use]
pub fn prescan<S: AsRef<str>>(lines: &[S]) -> RequestFlags {
    let mut flags = RequestFlags::default();
    for line in lines {
        let Some((keyword, args)) = line.as_ref().split_once(':') else {
            continue;
        };
        match keyword {
            "KeepAlive" => {
                if let Ok(on) = parse_flag(args.trim()) {
                    flags.keep_alive = on;
                }
            }
            "ResponseHeader" => {
                if let Ok(header) = args.trim().parse() {
                    flags.response_header = header;
                }
            }
            _ => {}
        }
    }
    flags
}

/// Parses a request block into a validated query.
///
/// Lines carry no terminators. The first failing line aborts parsing.
pub fn parse_request<S: AsRef<str>>(lines: &[S], catalog: &Catalog) -> Result<Query, ParseError> {
    if lines.len() > MAX_REQUEST_LINES {
        return Err(ParseError::new(
            MAX_REQUEST_LINES + 1,
            "",
            ProtocolError::RequestTooLarge {
                limit: MAX_REQUEST_LINES,
                unit: "lines",
            },
        ));
    }
    let total: usize = lines.iter().map(|l| l.as_ref().len() + 1).sum();
    if total > MAX_REQUEST_BYTES {
        return Err(ParseError::new(
            1,
            "",
            ProtocolError::RequestTooLarge {
                limit: MAX_REQUEST_BYTES,
                unit: "bytes",
            },
        ));
    }

    let Some(first) = lines.first() else {
        return Err(ParseError::new(1, "", ProtocolError::EmptyRequest));
    };
    let first = first.as_ref();
    let table = parse_request_line(first, catalog).map_err(|e| ParseError::new(1, first, e))?;

    let mut builder = QueryBuilder::new(table);
    for (idx, line) in lines.iter().enumerate().skip(1) {
        let line = line.as_ref();
        if line.is_empty() {
            continue;
        }
        builder
            .apply(line)
            .map_err(|reason| ParseError::new(idx + 1, line, reason))?;
    }
    Ok(builder.finish())
}

fn parse_request_line(line: &str, catalog: &Catalog) -> Result<Arc<dyn Table>, ProtocolError> {
    let name = line
        .strip_prefix("GET ")
        .map(str::trim)
        .filter(|n| !n.is_empty() && !n.contains(char::is_whitespace))
        .ok_or(ProtocolError::InvalidRequestLine)?;
    catalog.table(name).ok_or_else(|| ProtocolError::UnknownTable {
        name: name.to_string(),
    })
}

fn invalid(directive: &str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidArgument {
        directive: directive.to_string(),
        reason: reason.into(),
    }
}

fn pop_n<T>(stack: &mut Vec<T>, n: usize, directive: &str) -> Result<Vec<T>, ProtocolError> {
    if n > stack.len() {
        return Err(ProtocolError::StackUnderflow {
            directive: directive.to_string(),
            requested: n,
            available: stack.len(),
        });
    }
    Ok(stack.split_off(stack.len() - n))
}

fn parse_count(directive: &str, args: &str) -> Result<usize, ProtocolError> {
    args.trim().parse().map_err(|_| {
        invalid(
            directive,
            format!("expected a non-negative integer, got '{}'", args.trim()),
        )
    })
}

/// Splits `<column> <op> <literal>`. The literal is everything after the
/// single space following the operator and may be empty or contain spaces.
fn split_predicate(args: &str) -> Option<(&str, &str, &str)> {
    let args = args.trim_start();
    let (column, rest) = args.split_once(' ')?;
    let rest = rest.trim_start();
    let (op, literal) = rest.split_once(' ').unwrap_or((rest, ""));
    (!op.is_empty()).then_some((column, op, literal))
}

struct QueryBuilder {
    query: Query,
    explicit_columns: bool,
    filters: Vec<Filter>,
    stats: Vec<StatsSpec>,
}

impl QueryBuilder {
    fn new(table: Arc<dyn Table>) -> Self {
        Self {
            query: Query::new(table),
            explicit_columns: false,
            filters: Vec::new(),
            stats: Vec::new(),
        }
    }

    fn apply(&mut self, line: &str) -> Result<(), RequestError> {
        let (keyword, args) = match line.split_once(':') {
            // One space after the colon is part of the syntax.
            Some((keyword, args)) => (keyword, args.strip_prefix(' ').unwrap_or(args)),
            None if ARGUMENTLESS.contains(&line.trim_end()) => (line.trim_end(), ""),
            None => {
                return Err(ProtocolError::UnknownDirective {
                    keyword: line.to_string(),
                }
                .into())
            }
        };

        match keyword {
            "Columns" => self.columns(args)?,
            "Filter" => {
                let filter = self.comparison(keyword, args)?;
                self.filters.push(filter);
            }
            "And" | "Or" => {
                let n = parse_count(keyword, args)?;
                let popped = pop_n(&mut self.filters, n, keyword)?;
                self.filters.push(if keyword == "And" {
                    Filter::and(popped)
                } else {
                    Filter::or(popped)
                });
            }
            "Negate" => {
                let mut popped = pop_n(&mut self.filters, 1, keyword)?;
                self.filters.push(Filter::negate(popped.remove(0)));
            }
            "Stats" => {
                let spec = self.stats_entry(args)?;
                self.stats.push(spec);
            }
            "StatsAnd" | "StatsOr" => {
                let n = parse_count(keyword, args)?;
                let popped = self.pop_predicates(n, keyword)?;
                self.stats.push(StatsSpec::Count(if keyword == "StatsAnd" {
                    Filter::and(popped)
                } else {
                    Filter::or(popped)
                }));
            }
            "StatsNegate" => {
                let mut popped = self.pop_predicates(1, keyword)?;
                self.stats.push(StatsSpec::Count(Filter::negate(popped.remove(0))));
            }
            "OutputFormat" => {
                self.query.output.format = args
                    .trim()
                    .parse::<OutputFormat>()
                    .map_err(|e| invalid(keyword, e))?;
            }
            "ColumnHeaders" => {
                self.query.output.column_headers =
                    parse_flag(args.trim()).map_err(|e| invalid(keyword, e))?;
            }
            "ResponseHeader" => {
                self.query.output.response_header = args
                    .trim()
                    .parse::<ResponseHeader>()
                    .map_err(|e| invalid(keyword, e))?;
            }
            "Separators" => {
                self.query.output.separators =
                    Separators::parse(args).map_err(|e| invalid(keyword, e))?;
            }
            "Limit" => self.query.limit = Some(parse_count(keyword, args)?),
            "KeepAlive" => {
                self.query.keep_alive = parse_flag(args.trim()).map_err(|e| invalid(keyword, e))?;
            }
            "Localtime" => {
                let client: i64 = args
                    .trim()
                    .parse()
                    .map_err(|_| invalid(keyword, format!("invalid unix time '{}'", args.trim())))?;
                self.query.skew = ClockSkew::from_client_time(client, Utc::now())
                    .ok_or_else(|| invalid(keyword, "clock offset exceeds one day"))?;
            }
            other => {
                return Err(ProtocolError::UnknownDirective {
                    keyword: other.to_string(),
                }
                .into())
            }
        }
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<Column, ProtocolError> {
        self.query.table.resolve_column(name)
    }

    fn columns(&mut self, args: &str) -> Result<(), RequestError> {
        let columns = args
            .split_whitespace()
            .map(|name| self.resolve(name))
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Err(invalid("Columns", "no columns given").into());
        }
        self.query.columns = columns;
        self.explicit_columns = true;
        Ok(())
    }

    fn comparison(&self, directive: &str, args: &str) -> Result<Filter, RequestError> {
        let (column, op, literal) = split_predicate(args)
            .ok_or_else(|| invalid(directive, "expected <column> <operator> <value>"))?;
        let column = self.resolve(column)?;
        let op: Operator = op.parse().map_err(|e: String| invalid(directive, e))?;
        Ok(Filter::Leaf(Comparison::new(column, op, literal)?))
    }

    fn stats_entry(&self, args: &str) -> Result<StatsSpec, RequestError> {
        let tokens: Vec<&str> = args.split_whitespace().collect();
        if let [a, b] = tokens.as_slice() {
            if let Ok(function) = a.parse::<StatsFunction>() {
                return Ok(StatsSpec::aggregate(self.resolve(b)?, function)?);
            }
            if let Ok(function) = b.parse::<StatsFunction>() {
                return Ok(StatsSpec::aggregate(self.resolve(a)?, function)?);
            }
        }
        Ok(StatsSpec::Count(self.comparison("Stats", args)?))
    }

    fn pop_predicates(&mut self, n: usize, directive: &str) -> Result<Vec<Filter>, ProtocolError> {
        let available = self.stats.iter().rev().take_while(|s| s.is_predicate()).count();
        if n > self.stats.len() {
            return Err(ProtocolError::StackUnderflow {
                directive: directive.to_string(),
                requested: n,
                available: self.stats.len(),
            });
        }
        if n > available {
            return Err(invalid(directive, "only counting predicates can be combined"));
        }
        Ok(pop_n(&mut self.stats, n, directive)?
            .into_iter()
            .filter_map(|s| match s {
                StatsSpec::Count(filter) => Some(filter),
                StatsSpec::Aggregate { .. } => None,
            })
            .collect())
    }

    fn finish(self) -> Query {
        let mut query = self.query;
        if !self.stats.is_empty() && !self.explicit_columns {
            query.columns.clear();
        }
        query.filter = Filter::and(self.filters);
        query.stats = self.stats;
        query
    }
}

//! Output options of a query: format, headers, separators, framing.

use std::str::FromStr;

/// Body encoding of a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
    Python,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "python" | "python3" => Ok(Self::Python),
            other => Err(format!("unknown output format '{other}', expected csv, json or python")),
        }
    }
}

/// Framing of a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResponseHeader {
    /// Body only.
    #[default]
    Off,
    /// 16-byte status and length prefix.
    Fixed16,
}

impl FromStr for ResponseHeader {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "fixed16" => Ok(Self::Fixed16),
            other => Err(format!("unknown response header '{other}', expected off or fixed16")),
        }
    }
}

/// Separator bytes of the CSV format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Separators {
    /// Terminates a row.
    pub dataset: u8,
    /// Between fields.
    pub field: u8,
    /// Between list elements.
    pub list: u8,
    /// Between the members of a tuple.
    pub host_service: u8,
}

impl Default for Separators {
    fn default() -> Self {
        Self {
            dataset: b'\n',
            field: b';',
            list: b',',
            host_service: b'|',
        }
    }
}

impl Separators {
    /// Parses up to four decimal ASCII codes; missing ones keep their default.
    pub fn parse(args: &str) -> Result<Self, String> {
        let codes = args
            .split_whitespace()
            .map(|t| t.parse::<u8>().map_err(|_| format!("invalid separator code '{t}'")))
            .collect::<Result<Vec<u8>, _>>()?;
        if codes.is_empty() || codes.len() > 4 {
            return Err(format!("expected 1 to 4 separator codes, got {}", codes.len()));
        }
        let mut separators = Self::default();
        let slots = [
            &mut separators.dataset,
            &mut separators.field,
            &mut separators.list,
            &mut separators.host_service,
        ];
        for (slot, code) in slots.into_iter().zip(codes) {
            *slot = code;
        }
        Ok(separators)
    }
}

/// Everything that shapes the rendered response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputOptions {
    pub format: OutputFormat,
    /// Emit a header row with the column names.
    pub column_headers: bool,
    pub response_header: ResponseHeader,
    pub separators: Separators,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Csv,
            column_headers: true,
            response_header: ResponseHeader::Off,
            separators: Separators::default(),
        }
    }
}

/// Parses an `on`/`off` flag.
pub(crate) fn parse_flag(arg: &str) -> Result<bool, String> {
    match arg {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected 'on' or 'off', got '{other}'")),
    }
}

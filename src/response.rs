//! Response rendering: CSV, JSON and Python bodies, status framing.

use serde_json::{json, Value as Json};

use crate::engine::ResultSet;
use crate::error::STATUS_OK;
use crate::metric::MetricSamples;
use crate::query::{OutputFormat, OutputOptions, ResponseHeader, Separators};
use crate::value::{Value, UNAVAILABLE_PREFIX};

/// Length of the `fixed16` header.
pub const FIXED16_LEN: usize = 16;

/// Renders the body of a successful response.
#[must_use]
pub fn render_body(result: &ResultSet, options: &OutputOptions) -> Vec<u8> {
    match options.format {
        OutputFormat::Csv => render_csv(result, options),
        OutputFormat::Json | OutputFormat::Python => render_structured(result, options),
    }
}

/// A complete successful response, framed as requested.
#[must_use]
pub fn render_response(result: &ResultSet, options: &OutputOptions) -> Vec<u8> {
    frame(STATUS_OK, render_body(result, options), options.response_header)
}

/// A complete error response.
///
/// Without a response header this is the status line `<code> <message>`.
#[must_use]
pub fn render_error(code: u16, message: &str, header: ResponseHeader) -> Vec<u8> {
    let message = message.replace('\n', " ");
    match header {
        ResponseHeader::Off => format!("{code} {message}\n").into_bytes(),
        ResponseHeader::Fixed16 => frame(code, format!("{message}\n").into_bytes(), header),
    }
}

/// Prefixes `body` with the response header, if any.
#[must_use]
pub fn frame(code: u16, body: Vec<u8>, header: ResponseHeader) -> Vec<u8> {
    match header {
        ResponseHeader::Off => body,
        ResponseHeader::Fixed16 => {
            let mut out = fixed16_header(code, body.len()).into_bytes();
            out.extend_from_slice(&body);
            out
        }
    }
}

/// `"{code:03} {length:>11}\n"`, exactly 16 bytes.
#[must_use]
pub fn fixed16_header(code: u16, length: usize) -> String {
    format!("{code:03} {length:>11}\n")
}

fn render_csv(result: &ResultSet, options: &OutputOptions) -> Vec<u8> {
    let seps = options.separators;
    let mut out = Vec::new();

    if options.column_headers {
        write_csv_row(&mut out, result.columns.iter().map(|c| c.as_bytes().to_vec()), seps);
    }
    for row in &result.rows {
        write_csv_row(&mut out, row.iter().map(|v| csv_cell(v, seps)), seps);
    }
    out
}

fn write_csv_row(out: &mut Vec<u8>, cells: impl Iterator<Item = Vec<u8>>, seps: Separators) {
    for (idx, cell) in cells.enumerate() {
        if idx > 0 {
            out.push(seps.field);
        }
        out.extend_from_slice(&cell);
    }
    out.push(seps.dataset);
}

fn join(parts: impl Iterator<Item = Vec<u8>>, sep: u8) -> Vec<u8> {
    let mut out = Vec::new();
    for (idx, part) in parts.enumerate() {
        if idx > 0 {
            out.push(sep);
        }
        out.extend_from_slice(&part);
    }
    out
}

fn csv_cell(value: &Value, seps: Separators) -> Vec<u8> {
    match value {
        Value::List(items) => join(items.iter().map(|i| i.as_bytes().to_vec()), seps.list),
        Value::Tuples(tuples) => join(
            tuples
                .iter()
                .map(|t| join(t.iter().map(|v| csv_cell(v, seps)), seps.host_service)),
            seps.list,
        ),
        Value::Blob(bytes) => bytes.clone(),
        Value::Unavailable(reason) => unavailable_cell(reason, seps),
        Value::Series(samples) => join(
            series_header(samples)
                .into_iter()
                .map(|v| v.to_string().into_bytes())
                .chain(
                    samples
                        .values
                        .iter()
                        .map(|v| v.map(|v| v.to_string()).unwrap_or_default().into_bytes()),
                ),
            seps.list,
        ),
        other => other.to_string().into_bytes(),
    }
}

/// `ERROR: <reason>`, with separator bytes in the reason blanked out.
fn unavailable_cell(reason: &str, seps: Separators) -> Vec<u8> {
    let mut cell = UNAVAILABLE_PREFIX.as_bytes().to_vec();
    let reserved = [seps.dataset, seps.field, seps.list, seps.host_service, b'\n'];
    cell.extend(
        reason
            .bytes()
            .map(|b| if reserved.contains(&b) { b' ' } else { b }),
    );
    cell
}

fn series_header(samples: &MetricSamples) -> [i64; 3] {
    [
        samples.start,
        samples.end,
        i64::try_from(samples.step).unwrap_or(i64::MAX),
    ]
}

fn json_cell(value: &Value) -> Json {
    match value {
        Value::Int(v) => json!(v),
        Value::Float(v) => json!(v),
        Value::String(v) => json!(v),
        Value::List(items) => json!(items),
        Value::Tuples(tuples) => Json::Array(
            tuples
                .iter()
                .map(|t| Json::Array(t.iter().map(json_cell).collect()))
                .collect(),
        ),
        Value::Time(t) => json!(t.timestamp()),
        Value::Blob(bytes) => json!(String::from_utf8_lossy(bytes)),
        Value::Series(samples) => Json::Array(
            series_header(samples)
                .into_iter()
                .map(|v| json!(v))
                .chain(samples.values.iter().map(|v| json!(v)))
                .collect(),
        ),
        Value::Unavailable(reason) => json!({ "error": reason }),
        Value::Null => Json::Null,
    }
}

/// JSON or Python: one array per row, one row per line.
fn render_structured(result: &ResultSet, options: &OutputOptions) -> Vec<u8> {
    let header = options
        .column_headers
        .then(|| Json::Array(result.columns.iter().map(|c| json!(c)).collect()));
    let rows = header
        .into_iter()
        .chain(
            result
                .rows
                .iter()
                .map(|row| Json::Array(row.iter().map(json_cell).collect())),
        )
        .map(|row| match options.format {
            OutputFormat::Python => python_literal(&row),
            _ => row.to_string(),
        })
        .collect::<Vec<_>>();

    format!("[{}]\n", rows.join(",\n")).into_bytes()
}

fn python_literal(value: &Json) -> String {
    match value {
        Json::Null => "None".to_string(),
        Json::Bool(true) => "True".to_string(),
        Json::Bool(false) => "False".to_string(),
        Json::Array(items) => {
            let items: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", items.join(","))
        }
        Json::Object(map) => {
            let items: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}:{}", Json::String(k.clone()), python_literal(v)))
                .collect();
            format!("{{{}}}", items.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;

    fn result() -> ResultSet {
        ResultSet {
            columns: vec!["name".to_string(), "groups".to_string(), "latency".to_string()],
            rows: vec![
                vec![
                    Value::from("web01"),
                    Value::List(vec!["linux".to_string(), "web".to_string()]),
                    Value::Float(0.5),
                ],
                vec![Value::from("db01"), Value::List(Vec::new()), Value::Null],
            ],
        }
    }

    #[test]
    fn test_csv() {
        let body = render_body(&result(), &OutputOptions::default());
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "name;groups;latency\nweb01;linux,web;0.5\ndb01;;\n"
        );
    }

    #[test]
    fn test_csv_custom_separators_without_headers() {
        let options = OutputOptions {
            column_headers: false,
            separators: Separators::parse("0 9 124 43").unwrap(),
            ..OutputOptions::default()
        };
        let body = render_body(&result(), &options);
        assert_eq!(body, b"web01\tlinux|web\t0.5\0db01\t\t\0".to_vec());
    }

    #[test]
    fn test_csv_tuples() {
        let result = ResultSet {
            columns: vec!["services_with_state".to_string()],
            rows: vec![vec![Value::Tuples(vec![
                vec![Value::from("CPU"), Value::Int(0), Value::Int(1)],
                vec![Value::from("Disk"), Value::Int(2), Value::Int(1)],
            ])]],
        };
        let options = OutputOptions {
            column_headers: false,
            ..OutputOptions::default()
        };
        assert_eq!(render_body(&result, &options), b"CPU|0|1,Disk|2|1\n".to_vec());
    }

    #[test]
    fn test_json() {
        let options = OutputOptions {
            format: OutputFormat::Json,
            ..OutputOptions::default()
        };
        let body = String::from_utf8(render_body(&result(), &options)).unwrap();
        assert_eq!(
            body,
            "[[\"name\",\"groups\",\"latency\"],\n\
             [\"web01\",[\"linux\",\"web\"],0.5],\n\
             [\"db01\",[],null]]\n"
        );
        let parsed: Json = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_python() {
        let options = OutputOptions {
            format: OutputFormat::Python,
            column_headers: false,
            ..OutputOptions::default()
        };
        let body = String::from_utf8(render_body(&result(), &options)).unwrap();
        assert_eq!(body, "[[\"web01\",[\"linux\",\"web\"],0.5],\n[\"db01\",[],None]]\n");
    }

    #[test]
    fn test_empty_json() {
        let options = OutputOptions {
            format: OutputFormat::Json,
            column_headers: false,
            ..OutputOptions::default()
        };
        let empty = ResultSet::default();
        assert_eq!(render_body(&empty, &options), b"[]\n".to_vec());
    }

    #[test]
    fn test_series_and_time() {
        let result = ResultSet {
            columns: vec!["t".to_string(), "m".to_string()],
            rows: vec![vec![
                Value::Time(DateTime::<Utc>::from_timestamp(1000, 0).unwrap()),
                Value::Series(MetricSamples::new(1000, 60, vec![Some(1.5), None])),
            ]],
        };
        let csv = OutputOptions {
            column_headers: false,
            ..OutputOptions::default()
        };
        assert_eq!(render_body(&result, &csv), b"1000;1000,1120,60,1.5,\n".to_vec());

        let json = OutputOptions {
            format: OutputFormat::Json,
            column_headers: false,
            ..OutputOptions::default()
        };
        assert_eq!(
            render_body(&result, &json),
            b"[[1000,[1000,1120,60,1.5,null]]]\n".to_vec()
        );
    }

    #[test]
    fn test_unavailable_cells_differ_from_no_data() {
        let result = ResultSet {
            columns: vec!["name".to_string(), "m".to_string()],
            rows: vec![
                vec![
                    Value::from("web01"),
                    Value::Unavailable("store down; retry, later".to_string()),
                ],
                vec![Value::from("web02"), Value::Null],
            ],
        };
        let csv = OutputOptions {
            column_headers: false,
            ..OutputOptions::default()
        };
        assert_eq!(
            render_body(&result, &csv),
            b"web01;ERROR: store down  retry  later\nweb02;\n".to_vec()
        );

        let json = OutputOptions {
            format: OutputFormat::Json,
            column_headers: false,
            ..OutputOptions::default()
        };
        assert_eq!(
            String::from_utf8(render_body(&result, &json)).unwrap(),
            "[[\"web01\",{\"error\":\"store down; retry, later\"}],\n[\"web02\",null]]\n"
        );

        let python = OutputOptions {
            format: OutputFormat::Python,
            ..json
        };
        assert_eq!(
            String::from_utf8(render_body(&result, &python)).unwrap(),
            "[[\"web01\",{\"error\":\"store down; retry, later\"}],\n[\"web02\",None]]\n"
        );
    }

    #[test]
    fn test_fixed16() {
        let header = fixed16_header(200, 42);
        assert_eq!(header.len(), FIXED16_LEN);
        assert_eq!(header, "200          42\n");

        let options = OutputOptions {
            response_header: ResponseHeader::Fixed16,
            column_headers: false,
            ..OutputOptions::default()
        };
        let out = render_response(&result(), &options);
        let body_len = out.len() - FIXED16_LEN;
        assert_eq!(&out[..FIXED16_LEN], fixed16_header(200, body_len).as_bytes());
    }

    #[test]
    fn test_error_rendering() {
        let plain = render_error(404, "Table 'x' does not exist", ResponseHeader::Off);
        assert_eq!(plain, b"404 Table 'x' does not exist\n".to_vec());

        let framed = render_error(400, "bad\nline", ResponseHeader::Fixed16);
        assert_eq!(&framed[..FIXED16_LEN], b"400           9\n");
        assert_eq!(&framed[FIXED16_LEN..], b"bad line\n");
    }
}

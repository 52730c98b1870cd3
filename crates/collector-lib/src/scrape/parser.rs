//! Text exposition format parser
//!
//! Samples are grouped into one record per metric family and label set.
//! Counters, gauges and untyped samples carry a single field (`counter`,
//! `gauge`, `value`). Summaries and histograms collect `count`, `sum` and one
//! field per quantile or bucket bound.

use crate::models::{MetricKind, MetricRecord};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Content type requested from exposition endpoints
pub const TEXT_FORMAT: &str = "text/plain;version=0.0.4";

#[derive(Debug, Error, PartialEq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

/// Decodes a scraped body into metric records
pub trait ExpositionParser: Send + Sync {
    /// `now` stamps samples that carry no timestamp of their own
    fn parse(&self, body: &[u8], now: DateTime<Utc>) -> Result<Vec<MetricRecord>, ParseError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TextParser;

impl ExpositionParser for TextParser {
    fn parse(&self, body: &[u8], now: DateTime<Utc>) -> Result<Vec<MetricRecord>, ParseError> {
        let text = std::str::from_utf8(body).map_err(|e| ParseError {
            line: 0,
            message: format!("body is not valid UTF-8: {}", e),
        })?;

        let mut families: HashMap<String, MetricKind> = HashMap::new();
        let mut records: Vec<MetricRecord> = Vec::new();
        let mut index: HashMap<(String, BTreeMap<String, String>), usize> = HashMap::new();

        for (n, raw) in text.lines().enumerate() {
            let line_no = n + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(comment) = line.strip_prefix('#') {
                let mut parts = comment.split_whitespace();
                if parts.next() == Some("TYPE") {
                    if let (Some(name), Some(kind)) = (parts.next(), parts.next()) {
                        families.insert(name.to_string(), kind_from_str(kind));
                    }
                }
                continue;
            }

            let sample = parse_sample(line).map_err(|message| ParseError { line: line_no, message })?;
            let (family, kind, role) = classify(&sample.name, &families);

            let mut tags = sample.labels;
            let field = match role {
                SampleRole::Value => kind_field(kind).to_string(),
                SampleRole::Sum => "sum".to_string(),
                SampleRole::Count => "count".to_string(),
                SampleRole::Quantile => match tags.remove("quantile") {
                    Some(q) => q,
                    None => {
                        return Err(ParseError {
                            line: line_no,
                            message: format!("summary sample {} has no quantile label", sample.name),
                        })
                    }
                },
                SampleRole::Bucket => match tags.remove("le") {
                    Some(le) => le,
                    None => {
                        return Err(ParseError {
                            line: line_no,
                            message: format!("histogram sample {} has no le label", sample.name),
                        })
                    }
                },
            };

            let timestamp = match sample.timestamp_ms {
                Some(ms) => Utc.timestamp_millis_opt(ms).single().ok_or_else(|| ParseError {
                    line: line_no,
                    message: format!("timestamp {} out of range", ms),
                })?,
                None => now,
            };

            let key = (family.clone(), tags.clone());
            let slot = match index.get(&key) {
                Some(&i) => i,
                None => {
                    let mut record = MetricRecord::new(family, kind);
                    record.tags = tags;
                    records.push(record);
                    index.insert(key, records.len() - 1);
                    records.len() - 1
                }
            };

            let record = &mut records[slot];
            record.fields.insert(field, sample.value);
            record.timestamp = Some(timestamp);
        }

        Ok(records)
    }
}

fn kind_from_str(kind: &str) -> MetricKind {
    match kind {
        "counter" => MetricKind::Counter,
        "gauge" => MetricKind::Gauge,
        "summary" => MetricKind::Summary,
        "histogram" => MetricKind::Histogram,
        _ => MetricKind::Untyped,
    }
}

fn kind_field(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::Counter => "counter",
        MetricKind::Gauge => "gauge",
        _ => "value",
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SampleRole {
    Value,
    Sum,
    Count,
    Quantile,
    Bucket,
}

/// Family name, kind and role of a sample within its family
fn classify(name: &str, families: &HashMap<String, MetricKind>) -> (String, MetricKind, SampleRole) {
    if let Some(&kind) = families.get(name) {
        let role = match kind {
            MetricKind::Summary => SampleRole::Quantile,
            MetricKind::Histogram => SampleRole::Bucket,
            _ => SampleRole::Value,
        };
        return (name.to_string(), kind, role);
    }

    let suffixes = [
        ("_sum", SampleRole::Sum),
        ("_count", SampleRole::Count),
        ("_bucket", SampleRole::Bucket),
    ];
    for (suffix, role) in suffixes {
        let Some(base) = name.strip_suffix(suffix) else {
            continue;
        };
        match families.get(base) {
            Some(&MetricKind::Histogram) => return (base.to_string(), MetricKind::Histogram, role),
            Some(&MetricKind::Summary) if role != SampleRole::Bucket => {
                return (base.to_string(), MetricKind::Summary, role)
            }
            _ => {}
        }
    }

    (name.to_string(), MetricKind::Untyped, SampleRole::Value)
}

#[derive(Debug, PartialEq)]
struct Sample {
    name: String,
    labels: BTreeMap<String, String>,
    value: f64,
    timestamp_ms: Option<i64>,
}

fn parse_sample(line: &str) -> Result<Sample, String> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or_else(|| format!("sample {:?} has no value", line))?;
    let name = &line[..name_end];
    if name.is_empty() {
        return Err("sample has no metric name".to_string());
    }

    let mut rest = &line[name_end..];
    let mut labels = BTreeMap::new();
    if rest.starts_with('{') {
        let (parsed, remaining) = parse_labels(&rest[1..])?;
        labels = parsed;
        rest = remaining;
    }

    let mut parts = rest.split_whitespace();
    let value = parts
        .next()
        .ok_or_else(|| format!("sample {} has no value", name))
        .and_then(parse_value)?;
    let timestamp_ms = match parts.next() {
        Some(ts) => Some(
            ts.parse::<i64>()
                .map_err(|_| format!("invalid timestamp {:?} for {}", ts, name))?,
        ),
        None => None,
    };
    if let Some(extra) = parts.next() {
        return Err(format!("unexpected token {:?} after sample {}", extra, name));
    }

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

/// Parse `k="v",...}` and return the labels plus the text after `}`
fn parse_labels(input: &str) -> Result<(BTreeMap<String, String>, &str), String> {
    let mut labels = BTreeMap::new();
    let mut chars = input.char_indices().peekable();

    loop {
        while matches!(chars.peek(), Some((_, c)) if c.is_whitespace() || *c == ',') {
            chars.next();
        }

        let start = match chars.peek() {
            Some(&(i, '}')) => return Ok((labels, &input[i + 1..])),
            Some(&(i, _)) => i,
            None => return Err("unterminated label set".to_string()),
        };

        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            end = i + c.len_utf8();
            chars.next();
        }
        let key = input[start..end].to_string();
        if key.is_empty() {
            return Err("empty label name".to_string());
        }

        while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
            chars.next();
        }
        if !matches!(chars.next(), Some((_, '='))) {
            return Err(format!("label {} has no value", key));
        }
        while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
            chars.next();
        }
        if !matches!(chars.next(), Some((_, '"'))) {
            return Err(format!("label {} value is not quoted", key));
        }

        let mut value = String::new();
        loop {
            match chars.next() {
                Some((_, '"')) => break,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, c)) => value.push(c),
                    None => return Err(format!("unterminated value for label {}", key)),
                },
                Some((_, c)) => value.push(c),
                None => return Err(format!("unterminated value for label {}", key)),
            }
        }

        labels.insert(key, value);
    }
}

fn parse_value(raw: &str) -> Result<f64, String> {
    match raw {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => raw.parse::<f64>().map_err(|_| format!("invalid value {:?}", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn parse(text: &str) -> Vec<MetricRecord> {
        TextParser.parse(text.as_bytes(), now()).unwrap()
    }

    #[test]
    fn test_counter_and_gauge() {
        let records = parse(
            "# HELP http_requests_total Total requests\n\
             # TYPE http_requests_total counter\n\
             http_requests_total{method=\"get\",code=\"200\"} 1027\n\
             http_requests_total{method=\"post\",code=\"200\"} 3\n\
             # TYPE temperature gauge\n\
             temperature 21.5\n",
        );

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].kind, MetricKind::Counter);
        assert_eq!(records[0].fields["counter"], 1027.0);
        assert_eq!(records[0].tag("method"), Some("get"));
        assert_eq!(records[2].name, "temperature");
        assert_eq!(records[2].fields["gauge"], 21.5);
        assert_eq!(records[2].timestamp, Some(now()));
    }

    #[test]
    fn test_untyped_and_timestamp() {
        let records = parse("process_up 1 1700000000500\n");
        assert_eq!(records[0].kind, MetricKind::Untyped);
        assert_eq!(records[0].fields["value"], 1.0);
        assert_eq!(
            records[0].timestamp,
            Some(Utc.timestamp_millis_opt(1_700_000_000_500).unwrap())
        );
    }

    #[test]
    fn test_summary_grouping() {
        let records = parse(
            "# TYPE rpc_duration_seconds summary\n\
             rpc_duration_seconds{quantile=\"0.5\"} 0.2\n\
             rpc_duration_seconds{quantile=\"0.99\"} 1.5\n\
             rpc_duration_seconds_sum 120\n\
             rpc_duration_seconds_count 400\n",
        );

        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.kind, MetricKind::Summary);
        assert_eq!(rec.fields["0.5"], 0.2);
        assert_eq!(rec.fields["0.99"], 1.5);
        assert_eq!(rec.fields["sum"], 120.0);
        assert_eq!(rec.fields["count"], 400.0);
        assert!(rec.tags.is_empty());
    }

    #[test]
    fn test_histogram_grouping_by_labels() {
        let records = parse(
            "# TYPE latency histogram\n\
             latency_bucket{path=\"/a\",le=\"0.1\"} 3\n\
             latency_bucket{path=\"/a\",le=\"+Inf\"} 5\n\
             latency_sum{path=\"/a\"} 0.7\n\
             latency_count{path=\"/a\"} 5\n\
             latency_bucket{path=\"/b\",le=\"+Inf\"} 1\n",
        );

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, MetricKind::Histogram);
        assert_eq!(records[0].fields.len(), 4);
        assert_eq!(records[0].fields["+Inf"], 5.0);
        assert_eq!(records[1].tag("path"), Some("/b"));
    }

    #[test]
    fn test_label_escapes() {
        let records = parse("msg{text=\"a \\\"quoted\\\", value\\nline\"} 1\n");
        assert_eq!(records[0].tag("text"), Some("a \"quoted\", value\nline"));
    }

    #[test]
    fn test_special_values() {
        let records = parse("a +Inf\nb -Inf\nc NaN\n");
        assert!(records[0].fields["value"].is_infinite());
        assert!(records[1].fields["value"] < 0.0);
        assert!(records[2].fields["value"].is_nan());
    }

    #[test]
    fn test_malformed_lines() {
        let err = TextParser.parse(b"ok 1\nbroken{a=\"1\" 2\n", now()).unwrap_err();
        assert_eq!(err.line, 2);

        let err = TextParser.parse(b"novalue\n", now()).unwrap_err();
        assert_eq!(err.line, 1);

        assert!(TextParser.parse(b"x abc\n", now()).is_err());
    }
}

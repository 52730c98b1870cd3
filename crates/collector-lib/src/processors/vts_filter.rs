//! nginx VTS filter expansion
//!
//! The VTS module exports filtered counters with the filter encoded into two
//! tags, e.g. `filter="upstream=Bouncer,status=401"` and
//! `filter_name="uri=/login"`. Both are expanded into individual tags and the
//! metric is renamed after the first key of each:
//! `nginx_vts_filter_requests_total` becomes `nginx_upstream_uri_requests_total`.

use super::Processor;
use crate::models::MetricRecord;
use serde::{Deserialize, Serialize};
use tracing::warn;

const FILTER_TAG: &str = "filter";
const FILTER_NAME_TAG: &str = "filter_name";

fn default_tag_delimiter() -> String {
    ",".to_string()
}

fn default_key_value_delimiter() -> String {
    "=".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VtsConversion {
    /// Metric name the conversion applies to
    pub measurement: String,
    #[serde(default = "default_tag_delimiter")]
    pub tag_delimiter: String,
    #[serde(default = "default_key_value_delimiter")]
    pub key_value_delimiter: String,
}

impl VtsConversion {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tag_delimiter: default_tag_delimiter(),
            key_value_delimiter: default_key_value_delimiter(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VtsFilterConfig {
    pub conversions: Vec<VtsConversion>,
}

pub struct VtsFilter {
    config: VtsFilterConfig,
}

impl VtsFilter {
    pub fn new(config: VtsFilterConfig) -> Self {
        Self { config }
    }
}

impl Processor for VtsFilter {
    fn name(&self) -> &'static str {
        "vts_filter"
    }

    fn apply(&self, mut records: Vec<MetricRecord>) -> Vec<MetricRecord> {
        for record in &mut records {
            for conversion in &self.config.conversions {
                if conversion.measurement.is_empty() || record.name != conversion.measurement {
                    continue;
                }
                if let Err(e) = convert(record, conversion) {
                    warn!(metric = %record.name, error = %e, "Could not expand VTS filter tags");
                }
            }
        }
        records
    }
}

/// Expand and rename in place; the record is untouched on error
fn convert(record: &mut MetricRecord, conversion: &VtsConversion) -> Result<(), String> {
    let filter = record
        .tag(FILTER_TAG)
        .ok_or_else(|| format!("{} has no tag {}", record.name, FILTER_TAG))?;
    let filter_tags = unwrap_tags(filter, conversion)?;

    let filter_name = record
        .tag(FILTER_NAME_TAG)
        .ok_or_else(|| format!("{} has no tag {}", record.name, FILTER_NAME_TAG))?;
    let filter_name_tags = unwrap_tags(filter_name, conversion)?;

    let new_name = renamed(&record.name, &filter_tags, &filter_name_tags)?;

    record.tags.remove(FILTER_TAG);
    record.tags.remove(FILTER_NAME_TAG);
    record.tags.extend(filter_tags);
    record.tags.extend(filter_name_tags);
    record.name = new_name;
    Ok(())
}

/// Split `a=x,b=y` into ordered pairs; empty segments are ignored
fn unwrap_tags(raw: &str, conversion: &VtsConversion) -> Result<Vec<(String, String)>, String> {
    raw.split(conversion.tag_delimiter.as_str())
        .filter(|s| !s.is_empty())
        .map(|kv| {
            let parts: Vec<&str> = kv.split(conversion.key_value_delimiter.as_str()).collect();
            match parts.as_slice() {
                [k, v] => Ok((k.to_string(), v.to_string())),
                _ => Err(format!("not a key-value pair: {}", kv)),
            }
        })
        .collect()
}

fn renamed(
    name: &str,
    filter_tags: &[(String, String)],
    filter_name_tags: &[(String, String)],
) -> Result<String, String> {
    let first_filter = filter_tags
        .first()
        .ok_or("unwrapped tag from filter required")?;
    let first_filter_name = filter_name_tags
        .first()
        .ok_or("unwrapped tag from filter_name required")?;

    let mut segments: Vec<&str> = name.split('_').collect();
    if segments.len() < 3 {
        return Err(format!("{} has fewer than 3 segments", name));
    }
    segments[1] = first_filter.0.as_str();
    segments[2] = first_filter_name.0.as_str();
    Ok(segments.join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricKind;

    fn vts_record(filter: &str, filter_name: &str) -> MetricRecord {
        MetricRecord::new("nginx_vts_filter_requests_total", MetricKind::Counter)
            .with_field("counter", 3.0)
            .with_tag(FILTER_TAG, filter)
            .with_tag(FILTER_NAME_TAG, filter_name)
    }

    fn filter() -> VtsFilter {
        VtsFilter::new(VtsFilterConfig {
            conversions: vec![VtsConversion::new("nginx_vts_filter_requests_total")],
        })
    }

    #[test]
    fn test_expands_tags_and_renames() {
        let out = filter().apply(vec![vts_record(
            "upstream=Bouncer,backend=,status=401",
            "uri=/acs/api/v1/auth/login",
        )]);

        let rec = &out[0];
        assert_eq!(rec.name, "nginx_upstream_uri_requests_total");
        assert_eq!(rec.tag("upstream"), Some("Bouncer"));
        assert_eq!(rec.tag("backend"), Some(""));
        assert_eq!(rec.tag("status"), Some("401"));
        assert_eq!(rec.tag("uri"), Some("/acs/api/v1/auth/login"));
        assert!(rec.tag(FILTER_TAG).is_none());
        assert!(rec.tag(FILTER_NAME_TAG).is_none());
    }

    #[test]
    fn test_custom_delimiters() {
        let vts = VtsFilter::new(VtsFilterConfig {
            conversions: vec![VtsConversion {
                measurement: "nginx_vts_filter_requests_total".to_string(),
                tag_delimiter: "::".to_string(),
                key_value_delimiter: ":=".to_string(),
            }],
        });
        let out = vts.apply(vec![vts_record("upstream:=Bouncer::status:=401", "uri:=/login")]);
        assert_eq!(out[0].name, "nginx_upstream_uri_requests_total");
        assert_eq!(out[0].tag("status"), Some("401"));
    }

    #[test]
    fn test_malformed_filter_leaves_record_untouched() {
        let original = vts_record("upstream", "uri=/login");
        let out = filter().apply(vec![original.clone()]);
        assert_eq!(out[0], original);

        let missing = MetricRecord::new("nginx_vts_filter_requests_total", MetricKind::Counter);
        assert_eq!(filter().apply(vec![missing.clone()])[0], missing);
    }

    #[test]
    fn test_other_metrics_pass_through() {
        let mut other = vts_record("upstream=a", "uri=/b");
        other.name = "nginx_vts_server_requests_total".to_string();
        assert_eq!(filter().apply(vec![other.clone()]), vec![other]);
    }

    #[test]
    fn test_short_names_are_not_renamed() {
        let vts = VtsFilter::new(VtsFilterConfig {
            conversions: vec![VtsConversion::new("nginx_vts")],
        });
        let mut rec = vts_record("upstream=a", "uri=/b");
        rec.name = "nginx_vts".to_string();
        let out = vts.apply(vec![rec.clone()]);
        assert_eq!(out[0], rec);
    }
}

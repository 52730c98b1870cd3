//! Conversion of the agent's flat metrics snapshot into records
//!
//! Framework and allocator scoped names carry identifiers in their path
//! (`master/frameworks/<name>/<id>/calls/decline`). Those identifiers are
//! pulled out into tags so that one record is emitted per distinct tag set.

use crate::models::{MetricKind, MetricRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Measurement name of every snapshot record
pub const SNAPSHOT_MEASUREMENT: &str = "mesos";

/// One snapshot value with the tags extracted from its path
#[derive(Debug, Clone, PartialEq)]
struct TaggedField {
    field_name: String,
    value: f64,
    tags: BTreeMap<String, String>,
}

/// Percent-decode a framework name, falling back to the raw value
pub fn decode_framework_name(encoded: &str) -> String {
    match urlencoding::decode(encoded) {
        Ok(decoded) => decoded.into_owned(),
        Err(e) => {
            warn!(framework = %encoded, error = %e, "Error decoding framework name");
            encoded.to_string()
        }
    }
}

/// Split the snapshot into an untagged record plus one record per tag set
pub fn snapshot_records(
    snapshot: &BTreeMap<String, f64>,
    base_tags: &BTreeMap<String, String>,
    timestamp: DateTime<Utc>,
) -> Vec<MetricRecord> {
    let mut plain = BTreeMap::new();
    let mut grouped: BTreeMap<BTreeMap<String, String>, BTreeMap<String, f64>> = BTreeMap::new();

    for (name, value) in snapshot {
        match tagged_field(name, *value) {
            Some(tf) => {
                grouped.entry(tf.tags).or_default().insert(tf.field_name, tf.value);
            }
            None => {
                plain.insert(name.clone(), *value);
            }
        }
    }

    let mut records = Vec::with_capacity(grouped.len() + 1);
    let record = |fields: BTreeMap<String, f64>, tags: BTreeMap<String, String>| MetricRecord {
        name: SNAPSHOT_MEASUREMENT.to_string(),
        kind: MetricKind::Untyped,
        fields,
        tags,
        timestamp: Some(timestamp),
    };

    if !plain.is_empty() {
        records.push(record(plain, base_tags.clone()));
    }
    for (mut tags, fields) in grouped {
        tags.extend(base_tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        records.push(record(fields, tags));
    }

    records
}

fn tagged_field(name: &str, value: f64) -> Option<TaggedField> {
    let parts: Vec<&str> = name.split('/').collect();

    let tf = match parts.first().copied() {
        Some("master") if parts.get(1) == Some(&"frameworks") && parts.len() >= 5 => {
            framework_field(&parts, value)
        }
        Some("allocator") if parts.len() > 5 => allocator_field(&parts, value)?,
        _ => return None,
    };

    // No identifiers extracted: keep the name as a plain field
    if tf.tags.is_empty() {
        None
    } else {
        Some(tf)
    }
}

fn framework_field(parts: &[&str], value: f64) -> TaggedField {
    let mut tags = BTreeMap::new();
    tags.insert("framework_name".to_string(), decode_framework_name(parts[2]));
    tags.insert("framework_id".to_string(), parts[3].to_string());

    let prefix = format!("{}/{}", parts[0], parts[1]);
    let field_name = if parts.len() == 5 {
        format!("{}/{}_total", prefix, parts[4])
    } else {
        let sub = parts[4];
        let arg = |i: usize| parts.get(i).copied().unwrap_or_default();
        match sub {
            "offers" => format!("{}/{}/{}", prefix, sub, arg(5)),
            "calls" => {
                tags.insert("call_type".to_string(), arg(5).to_string());
                format!("{}/{}", prefix, sub)
            }
            "events" => {
                tags.insert("event_type".to_string(), arg(5).to_string());
                format!("{}/{}", prefix, sub)
            }
            "operations" => {
                tags.insert("operation_type".to_string(), arg(5).to_string());
                format!("{}/{}", prefix, sub)
            }
            "tasks" if parts.len() >= 7 => {
                tags.insert("task_state".to_string(), arg(6).to_string());
                format!("{}/{}/{}", prefix, sub, arg(5))
            }
            "roles" if parts.len() >= 7 => {
                tags.insert("role_name".to_string(), arg(5).to_string());
                format!("{}/{}/{}", prefix, sub, arg(6))
            }
            _ => {
                debug!(metric = %parts.join("/"), "Unexpected framework metric name");
                format!("{}/{}", prefix, parts[4..].join("/"))
            }
        }
    };

    TaggedField {
        field_name,
        value,
        tags,
    }
}

fn allocator_field(parts: &[&str], value: f64) -> Option<TaggedField> {
    let mut tags = BTreeMap::new();

    let field_name = match parts[2] {
        "roles" => {
            tags.insert("role_name".to_string(), parts[3].to_string());
            format!("{}/{}/{}/{}", parts[0], parts[2], parts[4], parts[5])
        }
        "offer_filters" => {
            tags.insert("role_name".to_string(), parts[4].to_string());
            format!("{}/{}/{}/{}", parts[0], parts[2], parts[3], parts[5])
        }
        "quota" if parts.len() >= 8 => {
            tags.insert("role_name".to_string(), parts[4].to_string());
            tags.insert("resource".to_string(), parts[6].to_string());
            format!(
                "{}/{}/{}/{}/{}",
                parts[0], parts[2], parts[3], parts[5], parts[7]
            )
        }
        _ => return None,
    };

    Some(TaggedField {
        field_name,
        value,
        tags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_decode_framework_name() {
        assert_eq!(decode_framework_name("hello%20world"), "hello world");
        assert_eq!(decode_framework_name("marathon"), "marathon");
        assert_eq!(decode_framework_name("bad%FFname"), "bad%FFname");
    }

    #[test]
    fn test_framework_metrics_are_tagged() {
        let snap = snapshot(&[
            ("master/frameworks/my%20fw/fw-1/calls/decline", 3.0),
            ("master/frameworks/my%20fw/fw-1/calls/accept", 4.0),
            ("master/frameworks/my%20fw/fw-1/subscribed", 1.0),
            ("master/uptime_secs", 100.0),
        ]);
        let base: BTreeMap<String, String> =
            [("url".to_string(), "http://agent:5051".to_string())].into();

        let records = snapshot_records(&snap, &base, Utc::now());

        let plain = records
            .iter()
            .find(|r| r.tag("framework_id").is_none())
            .unwrap();
        assert_eq!(plain.fields["master/uptime_secs"], 100.0);
        assert_eq!(plain.tag("url"), Some("http://agent:5051"));

        let decline = records
            .iter()
            .find(|r| r.tag("call_type") == Some("decline"))
            .unwrap();
        assert_eq!(decline.tag("framework_name"), Some("my fw"));
        assert_eq!(decline.tag("framework_id"), Some("fw-1"));
        assert_eq!(decline.fields["master/frameworks/calls"], 3.0);
        assert_eq!(decline.tag("url"), Some("http://agent:5051"));

        let subscribed = records
            .iter()
            .find(|r| r.fields.contains_key("master/frameworks/subscribed_total"))
            .unwrap();
        assert!(subscribed.tag("call_type").is_none());
    }

    #[test]
    fn test_task_state_and_roles() {
        let snap = snapshot(&[
            ("master/frameworks/fw/id/tasks/active/running", 2.0),
            ("master/frameworks/fw/id/roles/public/suppressed", 1.0),
        ]);
        let records = snapshot_records(&snap, &BTreeMap::new(), Utc::now());
        assert_eq!(records.len(), 2);

        let running = records
            .iter()
            .find(|r| r.tag("task_state") == Some("running"))
            .unwrap();
        assert_eq!(running.fields["master/frameworks/tasks/active"], 2.0);

        let role = records
            .iter()
            .find(|r| r.tag("role_name") == Some("public"))
            .unwrap();
        assert_eq!(role.fields["master/frameworks/roles/suppressed"], 1.0);
    }

    #[test]
    fn test_short_allocator_names_stay_plain() {
        let snap = snapshot(&[
            ("allocator/mesos/allocation_run_ms/count", 5.0),
            ("allocator/mesos/roles/web/shares/dominant", 0.5),
        ]);
        let records = snapshot_records(&snap, &BTreeMap::new(), Utc::now());

        let plain = records.iter().find(|r| r.tags.is_empty()).unwrap();
        assert!(plain.fields.contains_key("allocator/mesos/allocation_run_ms/count"));

        let role = records
            .iter()
            .find(|r| r.tag("role_name") == Some("web"))
            .unwrap();
        assert_eq!(role.fields["allocator/roles/shares/dominant"], 0.5);
    }
}

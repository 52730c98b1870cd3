use super::Processor;
use crate::models::MetricRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowercaseConfig {
    /// Also emit every record unmodified
    pub send_original: bool,
}

/// Lowercases field keys that contain capitals
pub struct Lowercase {
    config: LowercaseConfig,
}

impl Lowercase {
    pub fn new(config: LowercaseConfig) -> Self {
        Self { config }
    }
}

impl Processor for Lowercase {
    fn name(&self) -> &'static str {
        "lowercase"
    }

    fn apply(&self, records: Vec<MetricRecord>) -> Vec<MetricRecord> {
        let mut out = Vec::with_capacity(if self.config.send_original {
            records.len() * 2
        } else {
            records.len()
        });

        for mut record in records {
            if self.config.send_original {
                out.push(record.clone());
            }
            let capitalized: Vec<String> = record
                .fields
                .keys()
                .filter(|k| k.chars().any(|c| c.is_ascii_uppercase()))
                .cloned()
                .collect();
            for key in capitalized {
                if let Some(value) = record.fields.remove(&key) {
                    record.fields.insert(key.to_ascii_lowercase(), value);
                }
            }
            out.push(record);
        }

        out
    }
}

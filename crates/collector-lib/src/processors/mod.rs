//! Record processors applied after enrichment

mod lowercase;
mod vts_filter;

pub use lowercase::{Lowercase, LowercaseConfig};
pub use vts_filter::{VtsConversion, VtsFilter, VtsFilterConfig};

use crate::models::MetricRecord;
use serde::{Deserialize, Serialize};

/// A transformation over one cycle's records
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, records: Vec<MetricRecord>) -> Vec<MetricRecord>;
}

/// Processors to enable; absent sections are disabled
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorsConfig {
    pub lowercase: Option<LowercaseConfig>,
    pub vts_filter: Option<VtsFilterConfig>,
}

/// Ordered list of processors
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowercase runs before the VTS filter
    pub fn from_config(config: &ProcessorsConfig) -> Self {
        let mut chain = Self::new();
        if let Some(lc) = &config.lowercase {
            chain = chain.with(Lowercase::new(lc.clone()));
        }
        if let Some(vts) = &config.vts_filter {
            chain = chain.with(VtsFilter::new(vts.clone()));
        }
        chain
    }

    pub fn with(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn apply(&self, records: Vec<MetricRecord>) -> Vec<MetricRecord> {
        self.processors
            .iter()
            .fold(records, |records, processor| processor.apply(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricKind;

    #[test]
    fn test_chain_from_config_order() {
        let config = ProcessorsConfig {
            lowercase: Some(LowercaseConfig::default()),
            vts_filter: Some(VtsFilterConfig::default()),
        };
        let chain = ProcessorChain::from_config(&config);
        assert_eq!(chain.names(), vec!["lowercase", "vts_filter"]);

        assert!(ProcessorChain::from_config(&ProcessorsConfig::default()).is_empty());
    }

    #[test]
    fn test_empty_chain_passes_records_through() {
        let records = vec![MetricRecord::new("up", MetricKind::Gauge).with_field("Gauge", 1.0)];
        assert_eq!(ProcessorChain::new().apply(records.clone()), records);
    }
}

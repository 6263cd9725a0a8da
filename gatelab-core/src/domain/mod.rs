//! Domain types shared by every gatelab component.

pub mod ids;
pub mod metrics;

pub use ids::{CandidateId, JobId};
pub use metrics::{MetricsBag, RawMetrics};

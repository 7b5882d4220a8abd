//! Row-count probe
//!
//! Never raises: any transport or API failure is logged and reported as
//! "no results", so one unreachable query turns into an empty sync instead of
//! a crashed run.

use super::api::QueryResultsSource;
use crate::types::{Availability, ExternalQueryHandle};
use std::sync::Arc;

#[derive(Clone)]
pub struct ResultAvailabilityProbe {
    source: Arc<dyn QueryResultsSource>,
}

impl ResultAvailabilityProbe {
    pub fn new(source: Arc<dyn QueryResultsSource>) -> Self {
        Self { source }
    }

    pub async fn check(&self, handle: &ExternalQueryHandle) -> Availability {
        match self.source.total_row_count(handle).await {
            Ok(rows) => {
                log::info!(
                    "🔎 {} (query {}): {} rows available",
                    handle.partition_key(),
                    handle.query_id(),
                    rows
                );
                Availability::rows(rows)
            }
            Err(e) => {
                log::warn!(
                    "⚠️  Availability check failed for {} (query {}): {}",
                    handle.partition_key(),
                    handle.query_id(),
                    e
                );
                Availability::none()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fake::FakeSource;

    #[tokio::test]
    async fn test_reports_row_count() {
        let probe = ResultAvailabilityProbe::new(Arc::new(FakeSource::traders(25)));
        let availability = probe.check(&ExternalQueryHandle::new("1", "alpha")).await;

        assert_eq!(availability.row_count, 25);
        assert!(availability.has_results);
    }

    #[tokio::test]
    async fn test_empty_result_has_no_results() {
        let probe = ResultAvailabilityProbe::new(Arc::new(FakeSource::traders(0)));
        let availability = probe.check(&ExternalQueryHandle::new("1", "alpha")).await;

        assert_eq!(availability, Availability::none());
    }

    #[tokio::test]
    async fn test_failure_is_absorbed() {
        let probe = ResultAvailabilityProbe::new(Arc::new(FakeSource::traders(25).failing_probe()));
        let availability = probe.check(&ExternalQueryHandle::new("1", "alpha")).await;

        assert_eq!(availability.row_count, 0);
        assert!(!availability.has_results);
    }
}

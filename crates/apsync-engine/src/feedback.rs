//! Delivery of per-Access-Provider outcomes.

use std::sync::{Mutex, PoisonError};

use apsync_core::AccessProviderFeedback;

/// Receives one record per processed Access Provider.
pub trait FeedbackSink: Send + Sync {
    fn add_feedback(&self, feedback: AccessProviderFeedback);
}

/// Keeps feedback in memory, in delivery order.
#[derive(Debug, Default)]
pub struct CollectingFeedbackSink {
    records: Mutex<Vec<AccessProviderFeedback>>,
}

impl CollectingFeedbackSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AccessProviderFeedback> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, access_provider: &str) -> Option<AccessProviderFeedback> {
        self.records()
            .into_iter()
            .find(|f| f.access_provider == access_provider)
    }
}

impl FeedbackSink for CollectingFeedbackSink {
    fn add_feedback(&self, feedback: AccessProviderFeedback) {
        if !feedback.errors.is_empty() {
            tracing::error!(
                access_provider = %feedback.access_provider,
                errors = ?feedback.errors,
                "access provider failed"
            );
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(feedback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_records_survive_a_poisoned_lock() {
        let sink = Arc::new(CollectingFeedbackSink::new());
        sink.add_feedback(AccessProviderFeedback::new("a"));

        let poisoner = Arc::clone(&sink);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.records.lock().unwrap();
            panic!("poison the sink");
        })
        .join();
        assert!(sink.records.is_poisoned());

        sink.add_feedback(AccessProviderFeedback::new("b"));

        let ids: Vec<String> = sink.records().into_iter().map(|f| f.access_provider).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(sink.get("b").is_some());
    }
}

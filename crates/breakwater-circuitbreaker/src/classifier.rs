//! Error classification for recording decisions.
//!
//! The breaker never inspects error types itself: the configuration supplies
//! two predicates, built once at config time, and the decorators consult the
//! resulting [`OutcomeClassifier`] per failed call. The ignore predicate is
//! checked first; an ignored error releases the permission and leaves the
//! metrics untouched.

use std::sync::Arc;

/// How a failed call is treated by the metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Counts as a failure.
    Failure,
    /// Counts as neither failure nor success; the permission is returned.
    Ignored,
    /// Counts as a success (the error did not match the record predicate).
    Success,
}

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Classifies errors into [`Classification`]s.
pub struct OutcomeClassifier<E> {
    record: Predicate<E>,
    ignore: Predicate<E>,
}

impl<E> OutcomeClassifier<E> {
    /// Records every error as a failure, ignores none.
    pub fn record_all() -> Self {
        Self {
            record: Arc::new(|_| true),
            ignore: Arc::new(|_| false),
        }
    }

    pub fn new(record: Predicate<E>, ignore: Predicate<E>) -> Self {
        Self { record, ignore }
    }

    pub fn classify(&self, error: &E) -> Classification {
        if (self.ignore)(error) {
            Classification::Ignored
        } else if (self.record)(error) {
            Classification::Failure
        } else {
            Classification::Success
        }
    }
}

impl<E> Clone for OutcomeClassifier<E> {
    fn clone(&self) -> Self {
        Self {
            record: Arc::clone(&self.record),
            ignore: Arc::clone(&self.ignore),
        }
    }
}

impl<E> std::fmt::Debug for OutcomeClassifier<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeClassifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum TestError {
        Transient,
        Fatal,
        Irrelevant,
    }

    fn classifier() -> OutcomeClassifier<TestError> {
        OutcomeClassifier::new(
            Arc::new(|e: &TestError| matches!(e, TestError::Fatal)),
            Arc::new(|e: &TestError| matches!(e, TestError::Irrelevant)),
        )
    }

    #[test]
    fn default_records_everything() {
        let classifier = OutcomeClassifier::<TestError>::record_all();
        assert_eq!(
            classifier.classify(&TestError::Transient),
            Classification::Failure
        );
        assert_eq!(
            classifier.classify(&TestError::Fatal),
            Classification::Failure
        );
    }

    #[test]
    fn ignore_wins_over_record() {
        let classifier = OutcomeClassifier::new(
            Arc::new(|_: &TestError| true),
            Arc::new(|e: &TestError| matches!(e, TestError::Irrelevant)),
        );
        assert_eq!(
            classifier.classify(&TestError::Irrelevant),
            Classification::Ignored
        );
    }

    #[test]
    fn unmatched_errors_count_as_success() {
        let classifier = classifier();
        assert_eq!(
            classifier.classify(&TestError::Transient),
            Classification::Success
        );
        assert_eq!(
            classifier.classify(&TestError::Fatal),
            Classification::Failure
        );
        assert_eq!(
            classifier.classify(&TestError::Irrelevant),
            Classification::Ignored
        );
    }
}

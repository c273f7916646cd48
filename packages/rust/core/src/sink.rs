//! Terminal results sink.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::step::{Output, Record};

/// Ordered, append-only collector receiving the last step's output.
#[derive(Debug)]
pub struct ResultsSink<R> {
    name: String,
    records: Mutex<Vec<R>>,
}

impl<R: Record> ResultsSink<R> {
    /// Create an empty sink.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Copy of everything received so far, in arrival order.
    pub fn snapshot(&self) -> Vec<R> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<R>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: Record> Default for ResultsSink<R> {
    fn default() -> Self {
        Self::new("results")
    }
}

impl<R: Record> Output<R> for ResultsSink<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, record: R) {
        self.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_keeps_arrival_order() {
        let sink = ResultsSink::default();
        assert!(sink.is_empty());

        for n in [3, 1, 2, 1] {
            sink.put(n);
        }

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.snapshot(), vec![3, 1, 2, 1]);
        // Snapshots are non-destructive.
        assert_eq!(sink.snapshot().len(), 4);
        assert_eq!(sink.name(), "results");
    }
}

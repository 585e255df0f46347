use dashmap::DashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Admission gate for one crawl run: every path is admitted at most once and
/// no more than `capacity` paths are held at a time.
#[derive(Debug)]
pub struct Frontier {
    seen: DashSet<String>,
    reserved: AtomicUsize,
    capacity: usize,
}

impl Frontier {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: DashSet::new(),
            reserved: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Returns true if `path` was newly admitted.
    pub fn admit(&self, path: &str) -> bool {
        if self.seen.contains(path) {
            return false;
        }
        if self.reserved.fetch_add(1, Ordering::SeqCst) >= self.capacity {
            self.reserved.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        if self.seen.insert(path.to_string()) {
            true
        } else {
            self.reserved.fetch_sub(1, Ordering::SeqCst);
            false
        }
    }

    /// Gives the slot of a path that could not be fetched back to the run.
    pub fn release(&self, path: &str) {
        if self.seen.remove(path).is_some() {
            self.reserved.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn is_full(&self) -> bool {
        self.reserved.load(Ordering::SeqCst) >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn admits_once() {
        let frontier = Frontier::new(10);
        assert!(frontier.admit("/a"));
        assert!(!frontier.admit("/a"));
        assert_eq!(frontier.len(), 1);
    }

    #[test]
    fn stops_at_capacity_and_release_frees_a_slot() {
        let frontier = Frontier::new(2);
        assert!(frontier.admit("/a"));
        assert!(frontier.admit("/b"));
        assert!(frontier.is_full());
        assert!(!frontier.admit("/c"));

        frontier.release("/b");
        assert!(!frontier.is_full());
        assert!(frontier.admit("/c"));
        assert_eq!(frontier.len(), 2);
    }

    #[test]
    fn concurrent_admission_never_duplicates() {
        let frontier = Arc::new(Frontier::new(50));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let frontier = frontier.clone();
                std::thread::spawn(move || {
                    (0..100).filter(|i| frontier.admit(&format!("/p/{i}"))).count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
        assert_eq!(frontier.len(), 50);
    }
}

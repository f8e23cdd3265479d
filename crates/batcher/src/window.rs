//! Bounded window of recently processed request ids

use proven_common::RequestId;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Most recently completed request ids, oldest evicted first.
///
/// Membership is what rejects duplicate submits after a request has been
/// answered. Once an id is evicted a resubmission of it is indistinguishable
/// from a new request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "WindowRepr", into = "WindowRepr")]
pub struct ProcessedWindow {
    capacity: usize,
    order: VecDeque<RequestId>,
    members: HashSet<RequestId>,
}

/// Serialized form: capacity plus ids, oldest first
#[derive(Serialize, Deserialize)]
struct WindowRepr {
    capacity: usize,
    ids: Vec<RequestId>,
}

impl ProcessedWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity.max(1)),
            members: HashSet::with_capacity(capacity.max(1)),
        }
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.members.contains(id)
    }

    /// Record `id` as processed, returning the id evicted to make room
    pub fn insert(&mut self, id: RequestId) -> Option<RequestId> {
        if !self.members.insert(id.clone()) {
            return None;
        }
        self.order.push_back(id);

        if self.order.len() > self.capacity {
            let evicted = self.order.pop_front()?;
            self.members.remove(&evicted);
            return Some(evicted);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ids from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &RequestId> {
        self.order.iter()
    }
}

impl From<WindowRepr> for ProcessedWindow {
    fn from(repr: WindowRepr) -> Self {
        let mut window = ProcessedWindow::new(repr.capacity);
        for id in repr.ids {
            window.insert(id);
        }
        window
    }
}

impl From<ProcessedWindow> for WindowRepr {
    fn from(window: ProcessedWindow) -> Self {
        WindowRepr {
            capacity: window.capacity,
            ids: window.order.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> RequestId {
        RequestId::from_string(format!("wr-{}", n))
    }

    #[test]
    fn test_evicts_oldest_past_capacity() {
        let mut window = ProcessedWindow::new(3);
        for n in 1..=3 {
            assert_eq!(window.insert(id(n)), None);
        }

        assert_eq!(window.insert(id(4)), Some(id(1)));
        assert!(!window.contains(&id(1)));
        assert!(window.contains(&id(2)));
        assert!(window.contains(&id(4)));
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_reinsert_does_not_refresh_position() {
        let mut window = ProcessedWindow::new(2);
        window.insert(id(1));
        window.insert(id(2));
        assert_eq!(window.insert(id(1)), None);

        // id(1) is still the oldest
        assert_eq!(window.insert(id(3)), Some(id(1)));
    }

    #[test]
    fn test_serialized_form_preserves_order_and_capacity() {
        let mut window = ProcessedWindow::new(4);
        for n in [7, 3, 9] {
            window.insert(id(n));
        }

        let json = serde_json::to_string(&window).unwrap();
        let restored: ProcessedWindow = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.capacity(), 4);
        let ids: Vec<_> = restored.iter().cloned().collect();
        assert_eq!(ids, vec![id(7), id(3), id(9)]);
        assert!(restored.contains(&id(3)));
    }
}

//! Preview pagination.
//!
//! Write owners: the viewer drives `increase`/`decrease`, the artifact parser
//! alone sets the page count, and the orchestrator resets the count when a
//! new artifact is published.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Current page within the rendered artifact.
///
/// `pages_count` is `None` between a new artifact being published and the
/// parser reporting its page count; the requested page is kept meanwhile and
/// clamped once the count is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    page: u32,
    pages_count: Option<u32>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            pages_count: None,
        }
    }
}

impl Pagination {
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn pages_count(&self) -> Option<u32> {
        self.pages_count
    }

    pub fn can_increase(&self) -> bool {
        matches!(self.pages_count, Some(count) if self.page < count)
    }

    pub fn can_decrease(&self) -> bool {
        self.page > 1
    }

    /// Next page; no-op on the last page. Returns whether the page changed.
    pub fn increase(&mut self) -> bool {
        if !self.can_increase() {
            return false;
        }
        self.page += 1;
        true
    }

    /// Previous page; no-op on the first page. Returns whether the page changed.
    pub fn decrease(&mut self) -> bool {
        if !self.can_decrease() {
            return false;
        }
        self.page -= 1;
        true
    }

    /// Record the artifact's page count and clamp the page into `[1, count]`.
    /// A reported count of zero is treated as a single page.
    pub fn set_pages_count(&mut self, count: u32) {
        let count = count.max(1);
        self.pages_count = Some(count);
        self.page = self.page.clamp(1, count);
    }

    /// Forget the page count (new artifact); the page itself is preserved.
    pub fn reset_pages_count(&mut self) {
        self.pages_count = None;
    }
}

/// Shared, observable pagination state.
#[derive(Debug)]
pub struct PaginationState {
    tx: watch::Sender<Pagination>,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self::new()
    }
}

impl PaginationState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Pagination::default());
        Self { tx }
    }

    pub fn get(&self) -> Pagination {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Pagination> {
        self.tx.subscribe()
    }

    pub fn increase(&self) -> bool {
        self.tx.send_if_modified(Pagination::increase)
    }

    pub fn decrease(&self) -> bool {
        self.tx.send_if_modified(Pagination::decrease)
    }

    pub fn set_pages_count(&self, count: u32) {
        self.tx.send_modify(|p| p.set_pages_count(count));
    }

    pub fn reset_pages_count(&self) {
        self.tx.send_if_modified(|p| {
            let changed = p.pages_count.is_some();
            p.reset_pages_count();
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_count(page: u32, count: u32) -> Pagination {
        let mut p = Pagination::default();
        p.set_pages_count(count);
        while p.page() < page && p.increase() {}
        p
    }

    #[test]
    fn test_guards_at_bounds() {
        let p = with_count(1, 3);
        assert!(p.can_increase());
        assert!(!p.can_decrease());

        let p = with_count(3, 3);
        assert!(!p.can_increase());
        assert!(p.can_decrease());
    }

    #[test]
    fn test_guarded_ops_are_noops() {
        let mut p = with_count(1, 1);
        assert!(!p.increase());
        assert!(!p.decrease());
        assert_eq!(p.page(), 1);
    }

    #[test]
    fn test_new_count_clamps_preserved_page() {
        let mut p = with_count(5, 8);
        p.reset_pages_count();
        assert_eq!(p.page(), 5);
        assert!(!p.can_increase());
        p.set_pages_count(3);
        assert_eq!(p.page(), 3);
        p.set_pages_count(10);
        assert_eq!(p.page(), 3);
    }

    #[test]
    fn test_zero_count_means_single_page() {
        let mut p = Pagination::default();
        p.set_pages_count(0);
        assert_eq!(p.pages_count(), Some(1));
        assert!(!p.can_increase());
    }

    #[test]
    fn test_state_notifies_only_on_change() {
        let state = PaginationState::new();
        let mut rx = state.subscribe();
        state.set_pages_count(2);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert!(state.increase());
        assert!(!state.increase());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().page(), 2);

        assert!(!state.increase());
        assert!(!rx.has_changed().unwrap());
    }
}

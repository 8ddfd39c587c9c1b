//! Open-popup accounting.
//!
//! The menu window hides itself on focus loss, except while a context
//! popup is open. That count is owned by the application context and
//! handed out by reference; a popup holds a [`PopupGuard`] for as long as
//! it is on screen, and the count drops on every exit path because the
//! guard releases in `Drop`.

use std::cell::Cell;
use std::rc::Rc;

#[derive(Clone, Default)]
pub struct PopupTracker {
    open: Rc<Cell<usize>>,
}

impl PopupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.open.get()
    }

    pub fn any_open(&self) -> bool {
        self.open.get() > 0
    }

    /// Count a popup as open until the returned guard drops.
    #[must_use]
    pub fn acquire(&self) -> PopupGuard {
        self.open.set(self.open.get() + 1);
        PopupGuard {
            open: self.open.clone(),
        }
    }
}

pub struct PopupGuard {
    open: Rc<Cell<usize>>,
}

impl Drop for PopupGuard {
    fn drop(&mut self) {
        self.open.set(self.open.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_follows_guard_lifetimes() {
        let tracker = PopupTracker::new();
        assert!(!tracker.any_open());

        let first = tracker.acquire();
        let second = tracker.acquire();
        assert_eq!(tracker.open_count(), 2);

        drop(first);
        assert_eq!(tracker.open_count(), 1);
        drop(second);
        assert!(!tracker.any_open());
    }

    #[test]
    fn guard_releases_on_early_exit() {
        let tracker = PopupTracker::new();

        fn show_popup(tracker: &PopupTracker, fail: bool) -> Result<(), ()> {
            let _guard = tracker.acquire();
            if fail {
                return Err(());
            }
            Ok(())
        }

        show_popup(&tracker, false).unwrap();
        show_popup(&tracker, true).unwrap_err();
        assert_eq!(tracker.open_count(), 0);
    }

    #[test]
    fn clones_share_the_count() {
        let tracker = PopupTracker::new();
        let clone = tracker.clone();
        let _guard = tracker.acquire();
        assert!(clone.any_open());
    }
}

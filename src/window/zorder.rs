//! Window stacking order
//!
//! Explicit top-to-bottom order list for the windows exposed to the remote
//! peer. Minimized windows move to a "below all" tier. Any mutation marks
//! the order dirty; the dirty flag is consumed once per repaint cycle so a
//! burst of stacking changes coalesces into one remote update.

use super::WindowHandle;

/// The stacking order of exposed windows, with a coalescing dirty flag.
#[derive(Debug, Default)]
pub struct ZOrder {
    /// Top-to-bottom; index 0 is the topmost window.
    order: Vec<WindowHandle>,
    /// Minimized tier, logically below every entry of `order`.
    minimized: Vec<WindowHandle>,
    dirty: bool,
}

impl ZOrder {
    /// An empty stacking order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly mapped window at the top of the stack.
    pub fn insert_top(&mut self, handle: WindowHandle) {
        if !self.order.contains(&handle) {
            self.order.insert(0, handle);
            self.dirty = true;
        }
    }

    /// Remove a window from whichever tier holds it.
    pub fn remove(&mut self, handle: WindowHandle) {
        let before = self.order.len() + self.minimized.len();
        self.order.retain(|h| *h != handle);
        self.minimized.retain(|h| *h != handle);
        if self.order.len() + self.minimized.len() != before {
            self.dirty = true;
        }
    }

    /// Raise a window to the top of the active tier.
    pub fn raise(&mut self, handle: WindowHandle) {
        if let Some(pos) = self.order.iter().position(|h| *h == handle) {
            if pos != 0 {
                let h = self.order.remove(pos);
                self.order.insert(0, h);
                self.dirty = true;
            }
        }
    }

    /// Move a window to the minimized tier.
    pub fn sink_minimized(&mut self, handle: WindowHandle) {
        if let Some(pos) = self.order.iter().position(|h| *h == handle) {
            let h = self.order.remove(pos);
            self.minimized.push(h);
            self.dirty = true;
        }
    }

    /// Return a window from the minimized tier to the top of the stack.
    pub fn unminimize(&mut self, handle: WindowHandle) {
        if let Some(pos) = self.minimized.iter().position(|h| *h == handle) {
            let h = self.minimized.remove(pos);
            self.order.insert(0, h);
            self.dirty = true;
        }
    }

    /// Topmost window of the active tier, if any.
    pub fn top(&self) -> Option<WindowHandle> {
        self.order.first().copied()
    }

    /// Consume the dirty flag: when set, return the full top-to-bottom
    /// order (minimized tier last) and clear it. Called once per repaint.
    pub fn take_if_dirty(&mut self) -> Option<Vec<WindowHandle>> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        let mut snapshot = self.order.clone();
        snapshot.extend(self.minimized.iter().copied());
        Some(snapshot)
    }

    #[cfg(test)]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(index: u32) -> WindowHandle {
        WindowHandle {
            index,
            generation: 1,
        }
    }

    #[test]
    fn test_insert_raises_and_marks_dirty() {
        let mut z = ZOrder::new();
        z.insert_top(h(1));
        z.insert_top(h(2));
        assert_eq!(z.top(), Some(h(2)));

        z.raise(h(1));
        assert_eq!(z.top(), Some(h(1)));
        assert_eq!(z.take_if_dirty(), Some(vec![h(1), h(2)]));
        assert_eq!(z.take_if_dirty(), None);
    }

    #[test]
    fn test_minimized_tier_is_below_all() {
        let mut z = ZOrder::new();
        z.insert_top(h(1));
        z.insert_top(h(2));
        z.insert_top(h(3));
        z.sink_minimized(h(3));
        assert_eq!(z.take_if_dirty(), Some(vec![h(2), h(1), h(3)]));

        z.unminimize(h(3));
        assert_eq!(z.take_if_dirty(), Some(vec![h(3), h(2), h(1)]));
    }

    #[test]
    fn test_burst_coalesces_into_one_snapshot() {
        let mut z = ZOrder::new();
        z.insert_top(h(1));
        z.insert_top(h(2));
        z.raise(h(1));
        z.raise(h(2));
        z.remove(h(1));
        // One repaint cycle, one snapshot.
        assert!(z.is_dirty());
        assert_eq!(z.take_if_dirty(), Some(vec![h(2)]));
        assert!(!z.is_dirty());
    }

    #[test]
    fn test_raise_of_topmost_keeps_clean() {
        let mut z = ZOrder::new();
        z.insert_top(h(1));
        z.take_if_dirty();
        z.raise(h(1));
        assert!(!z.is_dirty());
    }
}

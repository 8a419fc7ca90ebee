//! Current/alternate resource pair used by every grid variable and filter.

/// Two interchangeable resources, one labelled current and one alternate.
///
/// Passes read `current()` and write `alternate()`. Calling `swap()` after the
/// write has been recorded makes the freshly written resource current.
#[derive(Debug)]
pub struct PingPong<T> {
    buffers: [T; 2],
    current: usize,
}

impl<T> PingPong<T> {
    /// Create a pair where `current` starts as the current resource.
    pub fn new(current: T, alternate: T) -> Self {
        Self {
            buffers: [current, alternate],
            current: 0,
        }
    }

    /// The most recently completed resource.
    pub fn current(&self) -> &T {
        &self.buffers[self.current]
    }

    /// The resource the next pass writes into.
    pub fn alternate(&self) -> &T {
        &self.buffers[1 - self.current]
    }

    /// Exchange the current and alternate labels.
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Index (0 or 1) of the current resource in creation order.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Both resources in creation order.
    pub fn both(&self) -> &[T; 2] {
        &self.buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_exchanges_roles() {
        let mut pair = PingPong::new("a", "b");
        assert_eq!(*pair.current(), "a");
        assert_eq!(*pair.alternate(), "b");

        pair.swap();
        assert_eq!(*pair.current(), "b");
        assert_eq!(*pair.alternate(), "a");
        assert_eq!(pair.current_index(), 1);
    }

    #[test]
    fn test_double_swap_is_identity() {
        let mut pair = PingPong::new(1, 2);
        pair.swap();
        pair.swap();
        assert_eq!(*pair.current(), 1);
        assert_eq!(pair.both(), &[1, 2]);
    }

    #[test]
    fn test_current_never_aliases_alternate() {
        let mut pair = PingPong::new(vec![0.0_f32; 4], vec![0.0_f32; 4]);
        for _ in 0..5 {
            assert!(!std::ptr::eq(pair.current(), pair.alternate()));
            pair.swap();
        }
    }
}

use std::collections::VecDeque;

/// Fixed-capacity ring of recent candidate flags.
///
/// Onset is only declared once enough of the last W frames were candidates,
/// which filters out door slams and coughs without adding latency beyond the
/// window itself.
pub struct ContinuityWindow {
    flags: VecDeque<bool>,
    capacity: usize,
}

impl ContinuityWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            flags: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, candidate: bool) {
        if self.flags.len() == self.capacity {
            self.flags.pop_front();
        }
        self.flags.push_back(candidate);
    }

    /// Number of candidate frames currently in the window.
    pub fn count(&self) -> usize {
        self.flags.iter().filter(|&&c| c).count()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }
}

use std::sync::Arc;

use crate::media::MediaDescriptor;

/// Shuffle-then-drain draw order over the current media set.
///
/// Every refill reshuffles the *whole* set, so an item drawn last in one
/// window can be drawn first in the next. Within one window each item is
/// drawn exactly once.
pub struct MediaQueue {
    items: Vec<Arc<MediaDescriptor>>,
    order: Vec<Arc<MediaDescriptor>>,
    rng: fastrand::Rng,
}

impl Default for MediaQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaQueue {
    pub fn new() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }

    pub fn with_rng(rng: fastrand::Rng) -> Self {
        Self {
            items: Vec::new(),
            order: Vec::new(),
            rng,
        }
    }

    /// Replaces the backing set and immediately shuffles a fresh draw order.
    pub fn load(&mut self, items: Vec<Arc<MediaDescriptor>>) {
        self.items = items;
        self.refill();
    }

    /// Draws one descriptor, refilling first if the current order is drained.
    ///
    /// Returns `None` only when the backing set is empty.
    pub fn next(&mut self) -> Option<Arc<MediaDescriptor>> {
        if self.order.is_empty() {
            self.refill();
        }
        self.order.pop()
    }

    /// Drops whatever is left of the current order and reshuffles the full set.
    pub fn reshuffle(&mut self) {
        self.refill();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Draws left before the next refill.
    pub fn pending(&self) -> usize {
        self.order.len()
    }

    pub fn items(&self) -> &[Arc<MediaDescriptor>] {
        &self.items
    }

    fn refill(&mut self) {
        self.order.clear();
        self.order.extend(self.items.iter().cloned());
        // Fisher-Yates
        for i in (1..self.order.len()).rev() {
            let j = self.rng.usize(..=i);
            self.order.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn media(n: usize) -> Vec<Arc<MediaDescriptor>> {
        (0..n)
            .map(|i| Arc::new(MediaDescriptor::image(format!("file:///img/{}.png", i))))
            .collect()
    }

    #[test]
    fn empty_set_draws_nothing() {
        let mut queue = MediaQueue::new();
        assert!(queue.next().is_none());
        queue.load(Vec::new());
        assert!(queue.next().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn load_shuffles_immediately() {
        let mut queue = MediaQueue::with_rng(fastrand::Rng::with_seed(7));
        queue.load(media(4));
        assert_eq!(queue.pending(), 4);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn each_refill_window_is_a_permutation() {
        let set = media(6);
        let mut queue = MediaQueue::with_rng(fastrand::Rng::with_seed(99));
        queue.load(set.clone());

        let expected: HashSet<String> = set.iter().map(|d| d.url.clone()).collect();
        for _ in 0..25 {
            let window: HashSet<String> = (0..set.len())
                .map(|_| queue.next().expect("non-empty set never runs dry").url.clone())
                .collect();
            assert_eq!(window, expected);
        }
    }

    #[test]
    fn reshuffle_discards_partial_order() {
        let mut queue = MediaQueue::with_rng(fastrand::Rng::with_seed(3));
        queue.load(media(5));
        queue.next();
        queue.next();
        assert_eq!(queue.pending(), 3);
        queue.reshuffle();
        assert_eq!(queue.pending(), 5);
    }

    #[test]
    fn single_item_repeats_forever() {
        let mut queue = MediaQueue::new();
        queue.load(media(1));
        for _ in 0..10 {
            assert_eq!(queue.next().unwrap().url, "file:///img/0.png");
        }
    }

    #[test]
    fn draws_are_roughly_uniform() {
        let mut queue = MediaQueue::with_rng(fastrand::Rng::with_seed(2024));
        queue.load(media(5));

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..5_000 {
            *counts.entry(queue.next().unwrap().url.clone()).or_default() += 1;
        }
        // Whole windows, so the counts are exact.
        assert!(counts.values().all(|&c| c == 1_000));
    }
}

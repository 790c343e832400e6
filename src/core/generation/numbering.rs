//! Collector numbering
//!
//! One counter per run, threaded by value through the orchestrator so
//! batch and land numbers can never collide.

use crate::core::card::Card;

/// Monotonic collector-number counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorNumbering {
    next: u32,
}

impl Default for CollectorNumbering {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorNumbering {
    /// Counter starting at 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Counter whose first number is `max(existing) + 1` (or 1 when no card
    /// is numbered yet).
    pub fn after(cards: &[Card]) -> Self {
        let high = cards
            .iter()
            .filter_map(|c| c.collector_number)
            .max()
            .unwrap_or(0);
        Self { next: high + 1 }
    }

    /// Return the current value and advance.
    pub fn next(&mut self) -> u32 {
        let n = self.next;
        self.next += 1;
        n
    }

    /// Value the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> u32 {
        self.next
    }

    /// Number every card in order.
    pub fn assign(&mut self, cards: &mut [Card]) {
        for card in cards {
            card.collector_number = Some(self.next());
        }
    }
}

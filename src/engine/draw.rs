//! Draw sampling.
//!
//! Picks `count` distinct numbers from `1..=total` one at a time with a
//! partial Fisher–Yates shuffle: step `i` swaps a uniformly chosen element
//! of the undrawn tail into position `i`. Every ordered draw is equally
//! likely.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::iter::FusedIterator;

/// A lazy, finite draw. Not `Clone`: once consumed it cannot be replayed.
#[derive(Debug)]
pub struct DrawSequence {
    pool: Vec<u8>,
    next: usize,
    count: usize,
    rng: ChaCha20Rng,
}

impl DrawSequence {
    /// Prepare a draw of `count` numbers from `1..=total`, forking a
    /// private RNG from `rng`.
    ///
    /// `count` is clamped to `total`.
    pub fn new<R: Rng>(rng: &mut R, total: u8, count: u8) -> Self {
        Self {
            pool: (1..=total).collect(),
            next: 0,
            count: count.min(total) as usize,
            rng: ChaCha20Rng::from_seed(rng.gen()),
        }
    }

    /// Numbers drawn so far, in draw order.
    pub fn drawn(&self) -> &[u8] {
        &self.pool[..self.next]
    }

    /// Draws still to come.
    pub fn remaining(&self) -> usize {
        self.count - self.next
    }

    pub fn is_finished(&self) -> bool {
        self.next == self.count
    }
}

impl Iterator for DrawSequence {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.is_finished() {
            return None;
        }
        let i = self.next;
        let j = self.rng.gen_range(i..self.pool.len());
        self.pool.swap(i, j);
        self.next += 1;
        Some(self.pool[i])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

impl ExactSizeIterator for DrawSequence {}

impl FusedIterator for DrawSequence {}

/// Draw `count` distinct numbers from `1..=total` in one go.
pub fn draw_numbers<R: Rng>(rng: &mut R, total: u8, count: u8) -> Vec<u8> {
    DrawSequence::new(rng, total, count).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! A mutex wrapper that enforces the subsystem lock order in debug builds.
//!
//! Every shared subsystem owns exactly one of these, tagged with its rank.
//! A thread may only acquire a strictly increasing rank; the thread-local
//! stack of held ranks makes violations panic immediately instead of
//! deadlocking later.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

#[cfg(debug_assertions)]
thread_local! {
    static HELD_RANKS: std::cell::RefCell<Vec<u8>> =
        const { std::cell::RefCell::new(Vec::new()) };
}

pub struct OrderedMutex<T> {
    rank: u8,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    pub fn new(rank: u8, value: T) -> Self {
        OrderedMutex { rank, inner: Mutex::new(value) }
    }

    pub fn lock(&self) -> OrderedGuard<'_, T> {
        #[cfg(debug_assertions)]
        HELD_RANKS.with(|held| {
            if let Some(&top) = held.borrow().last() {
                assert!(
                    self.rank > top,
                    "lock rank {} acquired while holding rank {top}",
                    self.rank
                );
            }
        });

        let guard = self.inner.lock().unwrap();

        #[cfg(debug_assertions)]
        HELD_RANKS.with(|held| held.borrow_mut().push(self.rank));

        OrderedGuard { guard, _rank: self.rank }
    }
}

pub struct OrderedGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    _rank: u8,
}

impl<T> Deref for OrderedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OrderedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for OrderedGuard<'_, T> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        HELD_RANKS.with(|held| {
            let mut held = held.borrow_mut();
            let pos = held
                .iter()
                .rposition(|&r| r == self._rank)
                .expect("dropping a guard whose rank was never recorded");
            held.remove(pos);
        });
    }
}

//! Round-Robin Rotation
//!
//! A fair rotation over distinct handles (idle workers, plans with queued
//! work). A newly added handle is always the next one returned.

use std::collections::HashMap;
use std::hash::Hash;

/// Neighbours of one handle in the rotation.
#[derive(Debug, Clone)]
struct Links<T> {
    prev: T,
    next: T,
}

/// Ordered rotation of distinct handles with a moving cursor.
///
/// The rotation is a ring linked through a hash map, so `add`, `delete`
/// and `next` are all O(1).
#[derive(Debug, Clone)]
pub struct RoundRobin<T> {
    links: HashMap<T, Links<T>>,
    /// The handle `next()` returns
    cursor: Option<T>,
}

impl<T: Eq + Hash + Clone> RoundRobin<T> {
    pub fn new() -> Self {
        Self {
            links: HashMap::new(),
            cursor: None,
        }
    }

    /// Adds `item` so that it is returned by the following `next()`.
    ///
    /// Adding a handle already present promotes it instead of duplicating it.
    pub fn add(&mut self, item: T) {
        self.delete(&item);
        let links = match self.cursor.take() {
            None => Links {
                prev: item.clone(),
                next: item.clone(),
            },
            Some(current) => {
                let prev = self.relink(&current, |links| &mut links.prev, item.clone());
                self.relink(&prev, |links| &mut links.next, item.clone());
                Links { prev, next: current }
            }
        };
        self.links.insert(item.clone(), links);
        self.cursor = Some(item);
    }

    /// Returns the handle at the cursor and advances, wrapping around.
    pub fn next(&mut self) -> Option<T> {
        let current = self.cursor.take()?;
        self.cursor = self.links.get(&current).map(|links| links.next.clone());
        Some(current)
    }

    /// Removes `item`; the cursor moves on to the handle that followed it.
    pub fn delete(&mut self, item: &T) -> bool {
        let Some(Links { prev, next }) = self.links.remove(item) else {
            return false;
        };
        if self.links.is_empty() {
            self.cursor = None;
            return true;
        }
        self.relink(&prev, |links| &mut links.next, next.clone());
        self.relink(&next, |links| &mut links.prev, prev);
        if self.cursor.as_ref() == Some(item) {
            self.cursor = Some(next);
        }
        true
    }

    /// Points one side of `at` to `to`, returning the handle it replaced.
    fn relink(&mut self, at: &T, side: impl Fn(&mut Links<T>) -> &mut T, to: T) -> T {
        match self.links.get_mut(at) {
            Some(links) => std::mem::replace(side(links), to),
            None => to,
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl<T: Eq + Hash + Clone> Default for RoundRobin<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_with_adds_and_deletes() {
        let mut rr = RoundRobin::new();
        assert_eq!(rr.next(), None);
        assert_eq!(rr.next(), None);
        assert!(rr.is_empty());

        rr.add(1);
        assert_eq!(rr.next(), Some(1));
        assert_eq!(rr.next(), Some(1));

        rr.add(2);
        assert_eq!(rr.next(), Some(2));
        assert_eq!(rr.next(), Some(1));
        assert_eq!(rr.next(), Some(2));

        rr.delete(&1);
        assert_eq!(rr.next(), Some(2));
        assert_eq!(rr.next(), Some(2));

        rr.delete(&2);
        assert_eq!(rr.next(), None);
        assert!(rr.is_empty());
    }

    #[test]
    fn test_full_cycle_visits_each_handle_once() {
        let mut rr = RoundRobin::new();
        for i in 0..5 {
            rr.add(i);
        }

        let mut seen: Vec<i32> = (0..5).filter_map(|_| rr.next()).collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_added_handle_is_next() {
        let mut rr = RoundRobin::new();
        rr.add('a');
        rr.add('b');
        rr.add('c');
        rr.next();
        rr.add('d');
        assert_eq!(rr.next(), Some('d'));
    }

    #[test]
    fn test_add_existing_handle_does_not_duplicate() {
        let mut rr = RoundRobin::new();
        rr.add(1);
        rr.add(2);
        rr.add(1);
        assert_eq!(rr.len(), 2);
        assert_eq!(rr.next(), Some(1));
        assert_eq!(rr.next(), Some(2));
    }

    #[test]
    fn test_delete_at_cursor_advances_to_following() {
        let mut rr = RoundRobin::new();
        rr.add(3);
        rr.add(2);
        rr.add(1);
        // Rotation is now 1, 2, 3
        assert_eq!(rr.next(), Some(1));
        assert!(rr.delete(&2));
        assert_eq!(rr.next(), Some(3));
        assert_eq!(rr.next(), Some(1));
        assert!(!rr.delete(&2));
        assert_eq!(rr.len(), 2);
    }

    #[test]
    fn test_delete_only_handle_then_add_again() {
        let mut rr = RoundRobin::new();
        rr.add("w0");
        assert!(rr.delete(&"w0"));
        assert_eq!(rr.next(), None);

        rr.add("w1");
        rr.add("w0");
        assert_eq!(rr.next(), Some("w0"));
        assert_eq!(rr.next(), Some("w1"));
        assert_eq!(rr.next(), Some("w0"));
    }
}

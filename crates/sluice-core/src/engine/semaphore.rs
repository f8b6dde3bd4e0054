//! Counting wake-up primitive for the render loop

use crossbeam::channel::{unbounded, Receiver, Sender};

/// Counting semaphore
///
/// Every `post` lets exactly one `wait` return. Posting never blocks, so it
/// is safe from platform callbacks.
#[derive(Clone)]
pub struct Semaphore {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Semaphore {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn post(&self) {
        // Both ends live in self, so the channel cannot be disconnected
        let _ = self.tx.send(());
    }

    /// Block until a post is available and consume it
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }

    /// Consume a post if one is available
    pub fn try_wait(&self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// Discard all pending posts
    pub fn drain(&self) {
        while self.try_wait() {}
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_posts_are_counted() {
        let sem = Semaphore::new();
        sem.post();
        sem.post();
        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
    }

    #[test]
    fn test_wait_wakes_on_post_from_other_thread() {
        let sem = Semaphore::new();
        let poster = sem.clone();
        let handle = thread::spawn(move || poster.post());
        sem.wait();
        handle.join().unwrap();
    }

    #[test]
    fn test_drain_discards_pending() {
        let sem = Semaphore::new();
        for _ in 0..3 {
            sem.post();
        }
        sem.drain();
        assert!(!sem.try_wait());
    }
}

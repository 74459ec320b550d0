//! Single-assignment result cell.

use std::sync::Mutex;
use tokio::sync::oneshot;

/// A value that can be resolved at most once from any number of tasks.
///
/// The first `resolve` wins and wakes the waiting side; every later call is a
/// no-op returning `false`.
pub struct ResolveOnce<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

/// Waiting half of a [`ResolveOnce`].
pub struct Resolution<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> ResolveOnce<T> {
    pub fn new() -> (Self, Resolution<T>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(sender)),
            },
            Resolution { receiver },
        )
    }

    /// Returns `true` if this call performed the resolution.
    pub fn resolve(&self, value: T) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match sender {
            // The waiter may already be gone; the cell still counts as resolved.
            Some(sender) => {
                let _ = sender.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

impl<T> Resolution<T> {
    /// Wait for the value. `None` if the cell was dropped unresolved.
    pub async fn wait(self) -> Option<T> {
        self.receiver.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let (cell, resolution) = ResolveOnce::new();

        assert!(!cell.is_resolved());
        assert!(cell.resolve("timeout"));
        assert!(!cell.resolve("response"));
        assert!(cell.is_resolved());
        assert_eq!(resolution.wait().await, Some("timeout"));
    }

    #[tokio::test]
    async fn test_concurrent_resolvers_fire_once() {
        let (cell, resolution) = ResolveOnce::new();
        let cell = Arc::new(cell);

        let mut handles = Vec::new();
        for i in 0..16u32 {
            let cell = cell.clone();
            handles.push(tokio::spawn(async move { cell.resolve(i) }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert!(resolution.wait().await.is_some());
    }

    #[tokio::test]
    async fn test_dropped_cell_yields_none() {
        let (cell, resolution) = ResolveOnce::<u8>::new();
        drop(cell);
        assert_eq!(resolution.wait().await, None);
    }
}

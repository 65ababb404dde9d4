// SPDX-License-Identifier: Apache-2.0

//! Bounded multi-producer channel used between harvesters and their consumers.
//!
//! Harvesters run on blocking threads and push with [`BoundedSender::send_blocking`],
//! which parks the thread while the queue is full. That is the backpressure path:
//! a slow consumer throttles reading instead of growing memory.

use flume::{Receiver, Sender, TrySendError};
use std::fmt;
use std::time::Duration;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    /// Every receiver has been dropped; nothing will ever drain the queue.
    Disconnected,
    /// Only returned by `try_send`.
    Full,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
            SendError::Full => write!(f, "channel full"),
        }
    }
}

impl std::error::Error for SendError {}

impl<T> BoundedSender<T> {
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        self.tx
            .send_async(item)
            .await
            .map_err(|_| SendError::Disconnected)
    }

    /// Blocks the calling thread until there is capacity in the channel.
    /// Only call this from non-async contexts (harvester threads).
    pub fn send_blocking(&self, item: T) -> Result<(), SendError> {
        self.tx.send(item).map_err(|_| SendError::Disconnected)
    }

    pub fn try_send(&self, item: T) -> Result<(), SendError> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SendError::Full),
            Err(TrySendError::Disconnected(_)) => Err(SendError::Disconnected),
        }
    }

    /// True once all receivers are gone.
    pub fn is_disconnected(&self) -> bool {
        self.tx.is_disconnected()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for BoundedSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedSender")
            .field("len", &self.tx.len())
            .field("capacity", &self.tx.capacity())
            .finish()
    }
}

#[derive(Clone)]
pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Returns `None` once every sender is dropped and the queue is drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Blocking receive, for non-async contexts.
    pub fn recv_blocking(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Returns None if no item is available or the channel is disconnected.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Drains whatever is queued right now without waiting.
    pub fn drain(&self) -> Vec<T> {
        self.rx.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);
    (BoundedSender { tx }, BoundedReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::{SendError, bounded};
    use std::time::Duration;
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn basics() {
        let (tx, mut rx) = bounded(3);

        let mut send1 = spawn(async { tx.send(10).await });
        let mut recv1 = spawn(async { rx.next().await });

        assert_pending!(recv1.poll());
        assert_ok!(assert_ready!(send1.poll()));
        assert!(recv1.is_woken());
        assert_eq!(Some(10), assert_ready!(recv1.poll()));

        drop(send1);
        drop(recv1);

        let mut recv2 = spawn(async { rx.next().await });
        drop(tx);
        assert_eq!(None, assert_ready!(recv2.poll()));
    }

    #[tokio::test]
    async fn sender_blocks_on_full() {
        let (tx, mut rx) = bounded(1);

        let mut send1 = spawn(async { tx.send(1).await });
        let mut recv1 = spawn(async { rx.next().await });
        assert_ok!(assert_ready!(send1.poll()));
        drop(send1);

        let mut send2 = spawn(async { tx.send(2).await });
        assert_pending!(send2.poll());

        assert_eq!(Some(1), assert_ready!(recv1.poll()));
        assert_ok!(assert_ready!(send2.poll()));
    }

    #[test]
    fn send_blocking_fails_on_rx_close() {
        let (tx, rx) = bounded::<u32>(1);
        drop(rx);
        assert!(tx.is_disconnected());
        assert_eq!(Err(SendError::Disconnected), tx.send_blocking(5));
    }

    #[test]
    fn try_send_reports_full() {
        let (tx, rx) = bounded::<u32>(1);
        assert_eq!(Ok(()), tx.try_send(1));
        assert_eq!(Err(SendError::Full), tx.try_send(2));
        assert_eq!(rx.drain(), vec![1]);
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn send_blocking_waits_for_capacity() {
        let (tx, rx) = bounded::<u32>(1);
        tx.send_blocking(1).unwrap();

        let handle = std::thread::spawn(move || tx.send_blocking(2));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(rx.recv_blocking(), Some(1));
        assert_eq!(handle.join().unwrap(), Ok(()));
        assert_eq!(rx.recv_blocking(), Some(2));
    }
}

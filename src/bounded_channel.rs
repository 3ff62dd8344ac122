// SPDX-License-Identifier: Apache-2.0

//! Bounded multi-producer queue used to hand flushed metric points from the
//! blocking file workers to the async exporter.

use flume::{Receiver, Sender};
use std::fmt;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
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

    /// Non-blocking send. Workers never wait on the exporter, so a full
    /// queue is reported back to the caller instead of applying backpressure.
    pub fn try_send(&self, item: T) -> Result<(), SendError> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(_)) => Err(SendError::Full),
            Err(flume::TrySendError::Disconnected(_)) => Err(SendError::Disconnected),
        }
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

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Waits for the next item; `None` once every sender is gone and the
    /// queue is drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Returns immediately. `None` if nothing is queued or the channel is disconnected.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
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

// SeriesRelay - catalog mirroring and scheduled republishing
// Copyright (C) 2025 SeriesRelay contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Fan-out of progress events to live observers
//!
//! Each observer owns the receiving half of a bounded channel. An event is
//! serialized once and the same frame is offered to every observer:
//! - closed observers are pruned when detected during a broadcast
//! - observers whose buffer is full simply miss the frame
//!
//! There is no replay buffer; a frame is delivered at most once per observer.

use super::{EventSink, ProgressEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default per-observer buffer, in frames
pub const DEFAULT_OBSERVER_BUFFER: usize = 256;

/// Serialized event as delivered to observers
pub type Frame = Arc<str>;

struct Observer {
    id: u64,
    tx: mpsc::Sender<Frame>,
}

/// Progress broadcaster
pub struct Broadcaster {
    observers: Mutex<Vec<Observer>>,
    buffer: usize,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_OBSERVER_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new observer
    ///
    /// The observer receives a `connected` greeting followed by every event
    /// broadcast after this call. Dropping the receiver disconnects it.
    pub fn subscribe(&self) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let greeting = ProgressEvent::Connected {
            message: "Connected to series relay".to_string(),
        };
        if let Ok(json) = serde_json::to_string(&greeting) {
            let _ = tx.try_send(Frame::from(json));
        }

        self.lock_observers().push(Observer { id, tx });
        tracing::debug!(observer = id, "observer connected");
        rx
    }

    /// Number of observers not yet pruned
    pub fn observer_count(&self) -> usize {
        self.lock_observers().len()
    }

    /// Push an event to every open observer
    ///
    /// Returns how many observers accepted the frame.
    pub fn broadcast(&self, event: &ProgressEvent) -> usize {
        let frame: Frame = match serde_json::to_string(event) {
            Ok(json) => Frame::from(json),
            Err(e) => {
                tracing::error!(error = %e, kind = event.kind(), "failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        self.lock_observers().retain(|observer| {
            if observer.tx.is_closed() {
                tracing::debug!(observer = observer.id, "observer disconnected");
                return false;
            }
            match observer.tx.try_send(Arc::clone(&frame)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(observer = observer.id, kind = event.kind(), "observer lagging, frame dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(observer = observer.id, "observer disconnected");
                    false
                }
            }
        });

        delivered
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<Observer>> {
        // A panic while holding the lock leaves the list itself intact
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for Broadcaster {
    fn emit(&self, event: ProgressEvent) {
        self.broadcast(&event);
    }
}

//! Monitoring side channel
//!
//! Visualizers and meters never see the live frames. After each iteration
//! the processing thread copies both frames into spare snapshots, then
//! swaps them into a shared slot under a lock held only for the pointer
//! swap. Readers clone the `Arc` out of the slot and copy samples after
//! releasing it, so a slow reader never stalls the loop. Consumers that
//! need more than the latest frame (spectrogram-style displays) drain a
//! bounded history of input snapshots instead.

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::frame::{AudioFrame, FrameSnapshot};

/// Which side of the transform to observe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tap {
    Input,
    Output,
}

/// Something that analyzes completed frames, e.g. a spectrum display.
/// It receives owned copies in capture order.
pub trait FrameConsumer {
    fn consume(&mut self, snapshot: &FrameSnapshot);
}

#[derive(Default)]
struct Latest {
    input: Arc<FrameSnapshot>,
    output: Arc<FrameSnapshot>,
    sequence: u64,
}

/// Buffers the writer fills before swapping them in. Only the processing
/// thread locks this, so it is never contended.
#[derive(Default)]
struct Spare {
    input: Arc<FrameSnapshot>,
    output: Arc<FrameSnapshot>,
}

/// Bounded history that evicts the oldest snapshot when full
pub struct SnapshotHistory {
    queue: Option<ArrayQueue<FrameSnapshot>>,
    evicted: AtomicU64,
}

impl SnapshotHistory {
    /// `capacity` of 0 keeps no history
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: (capacity > 0).then(|| ArrayQueue::new(capacity)),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.queue.is_some()
    }

    pub fn push(&self, snapshot: FrameSnapshot) {
        if let Some(queue) = &self.queue {
            if queue.force_push(snapshot).is_some() {
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn pop(&self) -> Option<FrameSnapshot> {
        self.queue.as_ref().and_then(|q| q.pop())
    }

    pub fn len(&self) -> usize {
        self.queue.as_ref().map_or(0, |q| q.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.queue.as_ref().map_or(0, |q| q.capacity())
    }

    /// Snapshots dropped because no consumer drained them in time
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        while self.pop().is_some() {}
    }
}

/// Cloneable read handle onto a processor's frames
#[derive(Clone)]
pub struct MonitorHandle {
    latest: Arc<Mutex<Latest>>,
    spare: Arc<Mutex<Spare>>,
    history: Arc<SnapshotHistory>,
}

impl MonitorHandle {
    pub fn new(history_frames: usize) -> Self {
        Self {
            latest: Arc::new(Mutex::new(Latest::default())),
            spare: Arc::new(Mutex::new(Spare::default())),
            history: Arc::new(SnapshotHistory::new(history_frames)),
        }
    }

    /// Shared reference to the latest snapshot, without copying samples
    pub fn shared_snapshot(&self, tap: Tap) -> Arc<FrameSnapshot> {
        let latest = self.latest.lock();
        match tap {
            Tap::Input => latest.input.clone(),
            Tap::Output => latest.output.clone(),
        }
    }

    pub fn snapshot(&self, tap: Tap) -> FrameSnapshot {
        FrameSnapshot::clone(&self.shared_snapshot(tap))
    }

    pub fn snapshot_input(&self) -> FrameSnapshot {
        self.snapshot(Tap::Input)
    }

    pub fn snapshot_output(&self) -> FrameSnapshot {
        self.snapshot(Tap::Output)
    }

    /// Input and output from the same iteration
    pub fn snapshot_pair(&self) -> (FrameSnapshot, FrameSnapshot) {
        let (input, output) = {
            let latest = self.latest.lock();
            (latest.input.clone(), latest.output.clone())
        };
        (FrameSnapshot::clone(&input), FrameSnapshot::clone(&output))
    }

    /// Number of iterations published since the last start
    pub fn sequence(&self) -> u64 {
        self.latest.lock().sequence
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    /// Hand every queued input snapshot to `consumer`, oldest first
    pub fn feed<C: FrameConsumer + ?Sized>(&self, consumer: &mut C) -> usize {
        let mut fed = 0;
        while let Some(snapshot) = self.history.pop() {
            consumer.consume(&snapshot);
            fed += 1;
        }
        fed
    }

    pub(crate) fn publish(&self, input: &AudioFrame, output: &AudioFrame) {
        let mut spare = self.spare.lock();
        // Copies only when a reader still holds the previous snapshot
        Arc::make_mut(&mut spare.input).refresh_from(input);
        Arc::make_mut(&mut spare.output).refresh_from(output);
        {
            let mut latest = self.latest.lock();
            mem::swap(&mut latest.input, &mut spare.input);
            mem::swap(&mut latest.output, &mut spare.output);
            latest.sequence += 1;
        }
        if self.history.is_enabled() {
            self.history.push(input.snapshot());
        }
    }

    pub(crate) fn reset(&self) {
        *self.latest.lock() = Latest::default();
        *self.spare.lock() = Spare::default();
        self.history.clear();
    }
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("sequence", &self.sequence())
            .field("history_len", &self.history.len())
            .finish()
    }
}

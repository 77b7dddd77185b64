//! State shared between the scheduler handle and its workers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use super::stats::{MediaStats, bump};
use crate::audio::buffer::{AudioFrame, FramePool, MediaQueue};
use crate::common::{MediaError, MediaResult};
use crate::configs::MediaConfig;

pub type FrameQueue = MediaQueue<AudioFrame>;

/// Queues, discard flags and counters of one media session.
///
/// Every queue lock is taken with a bounded wait so neither the transport
/// nor a worker can stall on the other.
pub struct MediaContext {
    pub config: MediaConfig,
    pub pool: FramePool,
    pub stats: MediaStats,
    inbound: Mutex<FrameQueue>,
    voice: Mutex<FrameQueue>,
    outbound: Mutex<FrameQueue>,
    rx_discard: AtomicBool,
    tx_discard: AtomicBool,
    lock_timeout: Duration,
}

impl MediaContext {
    pub fn new(config: MediaConfig) -> Self {
        let sink = &config.sink;
        let policy = sink.overflow;
        Self {
            pool: FramePool::new(config.frame_pool_buffers, config.frame_pool_buffer_size),
            stats: MediaStats::default(),
            inbound: Mutex::new(MediaQueue::new("a2dp-sink", sink.queue_capacity, policy)),
            voice: Mutex::new(MediaQueue::new("voice-sink", sink.voice_queue_capacity, policy)),
            outbound: Mutex::new(MediaQueue::new(
                "a2dp-source",
                config.source.queue_capacity,
                policy,
            )),
            rx_discard: AtomicBool::new(false),
            tx_discard: AtomicBool::new(false),
            lock_timeout: Duration::from_millis(config.enqueue_timeout_ms),
            config,
        }
    }

    fn lock<'a>(&self, queue: &'a Mutex<FrameQueue>) -> MediaResult<MutexGuard<'a, FrameQueue>> {
        queue
            .try_lock_for(self.lock_timeout)
            .ok_or(MediaError::QueueBusy)
    }

    pub fn inbound(&self) -> MediaResult<MutexGuard<'_, FrameQueue>> {
        self.lock(&self.inbound)
    }

    pub fn voice(&self) -> MediaResult<MutexGuard<'_, FrameQueue>> {
        self.lock(&self.voice)
    }

    pub fn outbound(&self) -> MediaResult<MutexGuard<'_, FrameQueue>> {
        self.lock(&self.outbound)
    }

    /// Enqueues into `queue`, adding anything the overflow policy drops to
    /// `dropped`. Returns whether `frame` itself was kept.
    pub fn push(queue: &mut FrameQueue, frame: AudioFrame, dropped: &AtomicU64) -> bool {
        let before = queue.overflowed();
        let kept = queue.try_enqueue(frame);
        if queue.overflowed() > before {
            bump(dropped, 1);
        }
        kept
    }

    pub fn rx_discard(&self) -> bool {
        self.rx_discard.load(Ordering::Acquire)
    }

    pub fn set_rx_discard(&self, discard: bool) {
        self.rx_discard.store(discard, Ordering::Release);
    }

    pub fn tx_discard(&self) -> bool {
        self.tx_discard.load(Ordering::Acquire)
    }

    pub fn set_tx_discard(&self, discard: bool) {
        self.tx_discard.store(discard, Ordering::Release);
    }

    /// Empties every queue, waiting for each lock without a bound. Only
    /// used once the workers are gone.
    pub fn flush_all(&self) -> usize {
        self.inbound.lock().flush() + self.voice.lock().flush() + self.outbound.lock().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_follow_config() {
        let ctx = MediaContext::new(MediaConfig::default());
        assert_eq!(ctx.inbound().unwrap().capacity(), 18);
        assert_eq!(ctx.voice().unwrap().capacity(), 5);
        assert_eq!(ctx.outbound().unwrap().capacity(), 18);
    }

    #[test]
    fn held_lock_times_out_as_busy() {
        let ctx = MediaContext::new(MediaConfig::default());
        let _held = ctx.inbound().unwrap();
        assert!(matches!(ctx.inbound(), Err(MediaError::QueueBusy)));
    }

    #[test]
    fn overflow_is_counted() {
        let ctx = MediaContext::new(MediaConfig::default());
        let mut queue = ctx.voice().unwrap();
        for _ in 0..7 {
            let frame = AudioFrame::voice(&ctx.pool, &[0xAD], 0).unwrap();
            assert!(MediaContext::push(&mut queue, frame, &ctx.stats.inbound_dropped));
        }
        assert_eq!(queue.len(), 5);
        drop(queue);
        assert_eq!(ctx.stats.snapshot().inbound_dropped, 2);
        assert_eq!(ctx.flush_all(), 5);
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the workers and read by anyone holding the
/// scheduler. All loads and stores are relaxed; a snapshot is not atomic
/// across fields.
#[derive(Debug, Default)]
pub struct MediaStats {
    pub frames_decoded: AtomicU64,
    pub frames_concealed: AtomicU64,
    pub decode_errors: AtomicU64,
    pub decoder_resets: AtomicU64,
    pub inbound_dropped: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub packets_sent: AtomicU64,
    pub outbound_dropped: AtomicU64,
    pub underruns: AtomicU64,
    pub rx_ticks: AtomicU64,
    pub tx_ticks: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaStatsSnapshot {
    pub frames_decoded: u64,
    pub frames_concealed: u64,
    pub decode_errors: u64,
    pub decoder_resets: u64,
    pub inbound_dropped: u64,
    pub frames_encoded: u64,
    pub packets_sent: u64,
    pub outbound_dropped: u64,
    pub underruns: u64,
    pub rx_ticks: u64,
    pub tx_ticks: u64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl MediaStats {
    pub fn snapshot(&self) -> MediaStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MediaStatsSnapshot {
            frames_decoded: load(&self.frames_decoded),
            frames_concealed: load(&self.frames_concealed),
            decode_errors: load(&self.decode_errors),
            decoder_resets: load(&self.decoder_resets),
            inbound_dropped: load(&self.inbound_dropped),
            frames_encoded: load(&self.frames_encoded),
            packets_sent: load(&self.packets_sent),
            outbound_dropped: load(&self.outbound_dropped),
            underruns: load(&self.underruns),
            rx_ticks: load(&self.rx_ticks),
            tx_ticks: load(&self.tx_ticks),
        }
    }
}

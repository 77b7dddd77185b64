//! `MediaTaskScheduler`: lifecycle and producer-side API of the media task.
//!
//! The scheduler is the handle the rest of the stack holds. It owns the
//! shared [`MediaContext`] and the channels into the two workers, never any
//! codec state. Every call is `&self` so the transport and the application
//! feed can share it behind an `Arc`.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use flume::{Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::command::{ControlGate, ControlRequest, MediaCommand};
use super::context::MediaContext;
use super::sink::SinkPipeline;
use super::source::SourcePipeline;
use super::state::{AtomicTaskState, TaskState};
use super::stats::MediaStatsSnapshot;
use super::worker::{MediaWorker, Role, Signal};
use super::{BoxedSink, BoxedSource};
use crate::audio::buffer::AudioFrame;
use crate::audio::codec::{BoxedDecoder, BoxedEncoder};
use crate::common::{Direction, MediaError, MediaResult};
use crate::configs::MediaConfig;

/// The external endpoints handed to the workers at start.
pub struct MediaIo {
    pub encoder: BoxedEncoder,
    pub decoder: BoxedDecoder,
    pub sink: BoxedSink,
    pub source: BoxedSource,
}

#[derive(Clone)]
struct WorkerLink {
    commands: Sender<MediaCommand>,
    signals: Sender<Signal>,
}

impl WorkerLink {
    fn signal(&self) -> MediaResult<()> {
        match self.signals.try_send(Signal::DataReady) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(MediaError::ChannelClosed),
        }
    }
}

#[derive(Clone)]
struct Session {
    ctx: Arc<MediaContext>,
    rx: WorkerLink,
    tx: WorkerLink,
}

impl Session {
    fn link(&self, direction: Direction) -> &WorkerLink {
        match direction {
            Direction::Inbound => &self.rx,
            Direction::Outbound => &self.tx,
        }
    }
}

pub struct MediaTaskScheduler {
    config: MediaConfig,
    state: AtomicTaskState,
    gate: ControlGate,
    session: RwLock<Option<Session>>,
    cancel: Mutex<Option<CancellationToken>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl MediaTaskScheduler {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            config,
            state: AtomicTaskState::default(),
            gate: ControlGate::default(),
            session: RwLock::new(None),
            cancel: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Allocates the queues and spawns both workers.
    pub fn start(&self, io: MediaIo) -> MediaResult<()> {
        self.config.validate().map_err(MediaError::InvalidConfig)?;
        self.state
            .transition(TaskState::Off, TaskState::On)
            .map_err(|_| MediaError::AlreadyRunning)?;

        let ctx = Arc::new(MediaContext::new(self.config.clone()));
        let cancel = CancellationToken::new();
        let (rx_cmd_tx, rx_cmd_rx) = flume::bounded(self.config.command_queue_len);
        let (tx_cmd_tx, tx_cmd_rx) = flume::bounded(self.config.command_queue_len);
        let (rx_sig_tx, rx_sig_rx) = flume::bounded(1);
        let (tx_sig_tx, tx_sig_rx) = flume::bounded(1);

        let sink = SinkPipeline::new(ctx.clone(), io.decoder, io.sink);
        let source = SourcePipeline::new(ctx.clone(), io.encoder, io.source);
        let workers = [
            MediaWorker::new(ctx.clone(), Role::Sink(sink), rx_cmd_rx, rx_sig_rx, cancel.clone()),
            MediaWorker::new(ctx.clone(), Role::Source(source), tx_cmd_rx, tx_sig_rx, cancel.clone()),
        ];

        let mut threads = Vec::with_capacity(workers.len());
        for worker in workers {
            match worker.spawn() {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    error!("media task start failed: {}", e);
                    cancel.cancel();
                    join_all(threads);
                    self.state.set(TaskState::Off);
                    return Err(e);
                }
            }
        }

        *self.threads.lock() = threads;
        *self.cancel.lock() = Some(cancel);
        *self.session.write() = Some(Session {
            ctx,
            rx: WorkerLink {
                commands: rx_cmd_tx,
                signals: rx_sig_tx,
            },
            tx: WorkerLink {
                commands: tx_cmd_tx,
                signals: tx_sig_tx,
            },
        });
        info!("media task started");
        Ok(())
    }

    /// Cancels and joins the workers, then frees every queued frame.
    /// Stopping a task that is not running is a no-op.
    pub fn stop(&self) -> MediaResult<()> {
        match self.state.transition(TaskState::On, TaskState::ShuttingDown) {
            Ok(()) => {}
            Err(TaskState::Off) => return Ok(()),
            Err(_) => return Err(MediaError::ShuttingDown),
        }
        info!("media task shutting down");

        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        join_all(std::mem::take(&mut *self.threads.lock()));

        if let Some(session) = self.session.write().take() {
            let freed = session.ctx.flush_all();
            debug!("freed {} queued frames", freed);
        }
        self.gate.acknowledge();
        self.state.set(TaskState::Off);
        info!("media task stopped");
        Ok(())
    }

    fn session(&self) -> MediaResult<Session> {
        match self.state.get() {
            TaskState::On => {}
            TaskState::ShuttingDown => return Err(MediaError::ShuttingDown),
            TaskState::Off => return Err(MediaError::NotRunning),
        }
        self.session.read().clone().ok_or(MediaError::NotRunning)
    }

    /// Queues one received A2DP media payload for decoding.
    pub fn enqueue_inbound(&self, payload: &[u8]) -> MediaResult<()> {
        let session = self.session()?;
        let ctx = &session.ctx;
        if ctx.rx_discard() {
            debug!("inbound payload discarded");
            return Ok(());
        }
        let frame = AudioFrame::from_media_payload(&ctx.pool, payload)?;
        let kept = {
            let mut queue = ctx.inbound()?;
            MediaContext::push(&mut queue, frame, &ctx.stats.inbound_dropped)
        };
        session.rx.signal()?;
        if kept { Ok(()) } else { Err(MediaError::QueueFull) }
    }

    /// Queues one received voice frame with its packet status.
    pub fn enqueue_voice(&self, payload: &[u8], status: u16) -> MediaResult<()> {
        let session = self.session()?;
        let ctx = &session.ctx;
        let frame = AudioFrame::voice(&ctx.pool, payload, status)?;
        let kept = {
            let mut queue = ctx.voice()?;
            MediaContext::push(&mut queue, frame, &ctx.stats.inbound_dropped)
        };
        session.rx.signal()?;
        if kept { Ok(()) } else { Err(MediaError::QueueFull) }
    }

    /// Takes the oldest encoded packet for the transport, if any.
    pub fn read_outbound(&self) -> MediaResult<Option<AudioFrame>> {
        let session = self.session()?;
        let mut queue = session.ctx.outbound()?;
        Ok(queue.try_dequeue())
    }

    pub fn outbound_len(&self) -> MediaResult<usize> {
        let session = self.session()?;
        let queue = session.ctx.outbound()?;
        Ok(queue.len())
    }

    /// Posts a command to the worker that owns its state, waiting at most
    /// `enqueue_timeout_ms` for room.
    pub fn post(&self, cmd: MediaCommand) -> MediaResult<()> {
        let session = self.session()?;
        let timeout = Duration::from_millis(self.config.enqueue_timeout_ms);
        debug!("posting {:?}", cmd);
        session
            .link(cmd.direction())
            .commands
            .send_timeout(cmd, timeout)?;
        Ok(())
    }

    /// Starts, suspends or stops the outbound stream. Only one request may
    /// await acknowledgment at a time.
    pub fn control(&self, request: ControlRequest) -> MediaResult<()> {
        self.gate.begin(request)?;
        let posted = match request {
            ControlRequest::Start => self.set_tx_discard(false).and_then(|_| self.post(MediaCommand::StartTx)),
            ControlRequest::Suspend => self.set_tx_discard(true).and_then(|_| self.post(MediaCommand::StopTx)),
            ControlRequest::Stop => self
                .post(MediaCommand::StopTx)
                .and_then(|_| self.post(MediaCommand::FlushOutbound)),
        };
        if let Err(e) = &posted {
            warn!("control request {:?} failed: {}", request, e);
            self.gate.acknowledge();
        }
        posted
    }

    /// Completes the pending control request.
    pub fn acknowledge(&self) -> Option<ControlRequest> {
        self.gate.acknowledge()
    }

    pub fn pending_control(&self) -> Option<ControlRequest> {
        self.gate.pending()
    }

    pub fn set_rx_discard(&self, discard: bool) -> MediaResult<()> {
        self.session()?.ctx.set_rx_discard(discard);
        Ok(())
    }

    pub fn set_tx_discard(&self, discard: bool) -> MediaResult<()> {
        self.session()?.ctx.set_tx_discard(discard);
        Ok(())
    }

    /// Counters of the running session.
    pub fn stats(&self) -> Option<MediaStatsSnapshot> {
        self.session
            .read()
            .as_ref()
            .map(|session| session.ctx.stats.snapshot())
    }
}

impl Drop for MediaTaskScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("media task stop on drop failed: {}", e);
        }
    }
}

fn join_all(threads: Vec<JoinHandle<()>>) {
    for handle in threads {
        let name = handle.thread().name().unwrap_or("media-worker").to_string();
        if handle.join().is_err() {
            error!("{} panicked", name);
        }
    }
}

//! `MediaWorker`: per-direction event loop.
//!
//! A worker owns every piece of mutable codec state of its direction and
//! runs on a dedicated thread with a single-threaded tokio runtime. It
//! sleeps in one `select!` over cancellation, commands, the coalesced
//! data-ready signal and its tick timer. The timer is only armed while
//! there is something to tick for.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::Receiver;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::command::MediaCommand;
use super::context::MediaContext;
use super::sink::{SinkMode, SinkPipeline};
use super::source::SourcePipeline;
use crate::common::{Direction, MediaError, MediaResult};

/// Wake-up posted by producers after enqueueing. Sent with `try_send` on a
/// single-slot channel, so any number of pending signals collapse into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    DataReady,
}

/// What a command does to the tick timer.
enum TickAction {
    Keep,
    Arm,
    Disarm,
    /// Disarm, then wait for the delayed-start threshold again.
    Restart,
}

pub enum Role {
    Sink(SinkPipeline),
    Source(SourcePipeline),
}

impl Role {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Sink(_) => Direction::Inbound,
            Self::Source(_) => Direction::Outbound,
        }
    }
}

pub struct MediaWorker {
    ctx: Arc<MediaContext>,
    role: Role,
    commands: Receiver<MediaCommand>,
    signals: Receiver<Signal>,
    cancel: CancellationToken,
    ticker: Option<Interval>,
    last_tick: Option<Instant>,
}

async fn next_tick(ticker: &mut Option<Interval>) -> Instant {
    match ticker {
        Some(ticker) => ticker.tick().await,
        None => std::future::pending().await,
    }
}

impl MediaWorker {
    pub fn new(
        ctx: Arc<MediaContext>,
        role: Role,
        commands: Receiver<MediaCommand>,
        signals: Receiver<Signal>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            role,
            commands,
            signals,
            cancel,
            ticker: None,
            last_tick: None,
        }
    }

    pub fn direction(&self) -> Direction {
        self.role.direction()
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    /// Moves the worker onto its own named thread.
    pub fn spawn(self) -> MediaResult<JoinHandle<()>> {
        let name = match self.direction() {
            Direction::Inbound => "media-rx",
            Direction::Outbound => "media-tx",
        };
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run())
            .map_err(MediaError::Spawn)
    }

    fn run(mut self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("{} media worker could not build its runtime: {}", self.direction(), e);
                return;
            }
        };
        info!("{} media worker started", self.direction());
        runtime.block_on(self.event_loop());
        info!("{} media worker exited", self.direction());
    }

    async fn event_loop(&mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                cmd = self.commands.recv_async() => match cmd {
                    Ok(cmd) => {
                        self.handle_command(cmd);
                        while let Ok(cmd) = self.commands.try_recv() {
                            self.handle_command(cmd);
                        }
                    }
                    Err(_) => break,
                },
                signal = self.signals.recv_async() => match signal {
                    Ok(Signal::DataReady) => self.on_data_ready(),
                    Err(_) => break,
                },
                now = next_tick(&mut self.ticker) => self.on_tick(now),
            }
        }
        self.disarm();
    }

    fn arm(&mut self) {
        if self.ticker.is_some() {
            return;
        }
        let period = Duration::from_millis(self.ctx.config.tick_ms);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.last_tick = None;
        debug!("{} tick armed every {:?}", self.direction(), period);
    }

    fn disarm(&mut self) {
        if self.ticker.take().is_some() {
            debug!("{} tick disarmed", self.direction());
        }
        self.last_tick = None;
    }

    pub fn handle_command(&mut self, cmd: MediaCommand) {
        debug!("{} worker: {:?}", self.direction(), cmd);
        let direction = self.direction();

        let action = match (&mut self.role, cmd) {
            (Role::Sink(sink), MediaCommand::ConfigureSink { codec_info }) => {
                match sink.configure(&codec_info) {
                    Ok(()) => TickAction::Restart,
                    Err(e) => {
                        warn!("sink configuration rejected: {}", e);
                        TickAction::Keep
                    }
                }
            }
            (Role::Sink(sink), MediaCommand::ConfigureVoice) => {
                sink.configure_voice();
                TickAction::Arm
            }
            (Role::Sink(sink), MediaCommand::ClearTrack) => {
                sink.clear_track();
                match sink.mode() {
                    SinkMode::Audio(_) => TickAction::Disarm,
                    _ => TickAction::Keep,
                }
            }
            (Role::Sink(sink), MediaCommand::FlushInbound) => {
                sink.flush();
                TickAction::Keep
            }
            (Role::Source(source), MediaCommand::InitEncoder { config, mtu, edr }) => {
                if let Err(e) = source.init_encoder(config, mtu, edr) {
                    warn!("encoder init rejected: {}", e);
                }
                TickAction::Keep
            }
            (
                Role::Source(source),
                MediaCommand::UpdateEncoder {
                    min_bitpool,
                    max_bitpool,
                    mtu,
                },
            ) => {
                if let Err(e) = source.update_encoder(min_bitpool, max_bitpool, mtu) {
                    warn!("encoder update rejected: {}", e);
                }
                TickAction::Keep
            }
            (Role::Source(source), MediaCommand::InitFeeding(feeding)) => {
                if let Err(e) = source.init_feeding(feeding) {
                    warn!("feeding init rejected: {}", e);
                }
                TickAction::Keep
            }
            (Role::Source(source), MediaCommand::StartTx) => {
                source.start();
                if source.is_running() {
                    TickAction::Arm
                } else {
                    TickAction::Keep
                }
            }
            (Role::Source(source), MediaCommand::StopTx) => {
                source.stop();
                TickAction::Disarm
            }
            (Role::Source(source), MediaCommand::FlushOutbound) => {
                source.flush();
                TickAction::Keep
            }
            (_, cmd) => {
                warn!("{:?} does not belong to the {} worker", cmd, direction);
                TickAction::Keep
            }
        };

        match action {
            TickAction::Keep => {}
            TickAction::Arm => self.arm(),
            TickAction::Disarm => self.disarm(),
            TickAction::Restart => {
                self.disarm();
                self.on_data_ready();
            }
        }
    }

    pub fn on_data_ready(&mut self) {
        if let Role::Sink(sink) = &mut self.role {
            if sink.poll_delayed_start() {
                self.arm();
            }
        }
    }

    pub fn on_tick(&mut self, now: Instant) {
        let default_us = self.ctx.config.tick_ms * 1000;
        let elapsed_us = self
            .last_tick
            .map(|last| now.saturating_duration_since(last).as_micros() as u64)
            .unwrap_or(default_us);
        self.last_tick = Some(now);
        trace!("{} tick, {} us since last", self.direction(), elapsed_us);

        match &mut self.role {
            Role::Sink(sink) => sink.rx_tick(),
            Role::Source(source) => source.tx_tick(elapsed_us),
        }
    }
}

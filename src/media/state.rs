use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a [`super::MediaTaskScheduler`]: `Off → On → ShuttingDown → Off`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Off = 0,
    On = 1,
    ShuttingDown = 2,
}

impl TaskState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::On,
            2 => Self::ShuttingDown,
            _ => Self::Off,
        }
    }
}

/// [`TaskState`] readable from any thread.
#[derive(Debug)]
pub struct AtomicTaskState(AtomicU8);

impl Default for AtomicTaskState {
    fn default() -> Self {
        Self(AtomicU8::new(TaskState::Off as u8))
    }
}

impl AtomicTaskState {
    pub fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: TaskState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves `from → to`; returns the state actually found on failure.
    pub fn transition(&self, from: TaskState, to: TaskState) -> Result<(), TaskState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(TaskState::from_u8)
    }
}

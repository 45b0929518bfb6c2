//! Transport state for live playback

/// Coarse transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Idle,
    Playing,
}

/// The voice whose natural end finishes the session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TailSource {
    /// Index into the transport's handles
    pub index: usize,
    /// Absolute start instant on the device clock
    pub start_at: f64,
    /// Seconds the source sounds for
    pub duration: f64,
}

impl TailSource {
    /// True when a completion reported at `ended_at` covered the whole duration.
    ///
    /// `tolerance` absorbs rounding to whole frames.
    pub fn finished_by_time(&self, ended_at: f64, tolerance: f64) -> bool {
        ended_at - self.start_at + tolerance >= self.duration
    }
}

/// Live session state. `H` is the signal-graph handle type owned while playing.
#[derive(Debug)]
pub enum Transport<H> {
    Idle,
    Playing {
        /// Device clock value when playback began
        epoch: f64,
        handles: Vec<H>,
        tail: Option<TailSource>,
    },
}

impl<H> Default for Transport<H> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<H> Transport<H> {
    pub fn state(&self) -> TransportState {
        match self {
            Self::Idle => TransportState::Idle,
            Self::Playing { .. } => TransportState::Playing,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing { .. })
    }

    pub fn epoch(&self) -> Option<f64> {
        match self {
            Self::Playing { epoch, .. } => Some(*epoch),
            Self::Idle => None,
        }
    }

    pub fn handles(&self) -> &[H] {
        match self {
            Self::Playing { handles, .. } => handles,
            Self::Idle => &[],
        }
    }

    pub fn tail(&self) -> Option<(&H, TailSource)> {
        match self {
            Self::Playing { handles, tail: Some(tail), .. } => handles.get(tail.index).map(|h| (h, *tail)),
            _ => None,
        }
    }

    /// Timeline position for a device clock reading, while playing
    pub fn position(&self, now: f64) -> Option<f64> {
        self.epoch().map(|epoch| now - epoch)
    }

    /// Switch to idle and hand back the owned handles for release
    pub fn reset(&mut self) -> Vec<H> {
        match std::mem::take(self) {
            Self::Playing { handles, .. } => handles,
            Self::Idle => Vec::new(),
        }
    }
}

/// Format seconds as MM:SS.ss
pub fn format_time(secs: f64) -> String {
    let secs = secs.max(0.0);
    let mins = (secs / 60.0) as u32;
    let secs_rem = secs % 60.0;
    format!("{:02}:{:05.2}", mins, secs_rem)
}

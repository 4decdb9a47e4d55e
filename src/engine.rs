use crate::audio::{AudioDevice, PlayStart};
use crate::error::NoticeError;
use crate::model::{Direction, PlaybackState, SearchItem};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Ticks in one preview; progress reaches 100% on the last one.
pub const PREVIEW_TICKS: u32 = 30;
const SHUFFLE_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Cancelled,
    Running,
    Held,
}

/// Fixed-period progress clock. Time only accumulates while running, and
/// `start` always discards whatever the previous run had accumulated.
#[derive(Debug, Clone)]
pub struct ProgressTimer {
    period: Duration,
    carry: Duration,
    state: TimerState,
}

impl ProgressTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            carry: Duration::ZERO,
            state: TimerState::Cancelled,
        }
    }

    pub fn start(&mut self) {
        self.carry = Duration::ZERO;
        self.state = TimerState::Running;
    }

    pub fn cancel(&mut self) {
        self.carry = Duration::ZERO;
        self.state = TimerState::Cancelled;
    }

    pub fn hold(&mut self) {
        if self.state == TimerState::Running {
            self.state = TimerState::Held;
        }
    }

    pub fn resume(&mut self) {
        if self.state == TimerState::Held {
            self.state = TimerState::Running;
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running
    }

    pub fn is_armed(&self) -> bool {
        self.state != TimerState::Cancelled
    }

    /// Feeds elapsed wall time and returns how many whole periods completed.
    pub fn due(&mut self, elapsed: Duration) -> u32 {
        if !self.is_running() {
            return 0;
        }
        self.carry += elapsed;
        let mut ticks = 0;
        while self.carry >= self.period {
            self.carry -= self.period;
            ticks += 1;
        }
        ticks
    }
}

impl Default for ProgressTimer {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Owns the audio device and the one playback session of the process.
pub struct PlaybackEngine<D: AudioDevice> {
    device: D,
    current: Option<SearchItem>,
    state: PlaybackState,
    repeat: bool,
    progress_ticks: u32,
    volume_percent: u8,
    timer: ProgressTimer,
    rng: SmallRng,
}

impl<D: AudioDevice> PlaybackEngine<D> {
    pub fn new(device: D, volume_percent: u8, tick: Duration) -> Self {
        Self::with_rng(device, volume_percent, tick, SmallRng::from_os_rng())
    }

    pub fn seeded(device: D, volume_percent: u8, tick: Duration, seed: u64) -> Self {
        Self::with_rng(device, volume_percent, tick, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(device: D, volume_percent: u8, tick: Duration, rng: SmallRng) -> Self {
        let mut engine = Self {
            device,
            current: None,
            state: PlaybackState::Idle,
            repeat: false,
            progress_ticks: 0,
            volume_percent: volume_percent.min(100),
            timer: ProgressTimer::new(tick),
            rng,
        };
        let volume = engine.volume_fraction();
        engine.device.set_volume(volume);
        engine
    }

    pub fn play(&mut self, item: &SearchItem) -> Result<(), NoticeError> {
        let Some(locator) = item.preview_url.as_deref().filter(|_| item.has_preview()) else {
            tracing::info!(item = %item.id, "no preview to play");
            return Err(NoticeError::NoPreviewAvailable);
        };

        if self.current.is_some() {
            self.device.pause();
        }
        self.timer.cancel();

        self.current = Some(item.clone());
        self.progress_ticks = 0;
        self.state = PlaybackState::Loading;
        let volume = self.volume_fraction();
        self.device.set_source(locator);
        self.device.set_volume(volume);
        self.device.set_loop(self.repeat);

        match self.device.play() {
            Ok(PlayStart::Started) => {
                self.begin_playing();
                Ok(())
            }
            Ok(PlayStart::Pending) => {
                tracing::debug!(item = %item.id, "preview loading");
                Ok(())
            }
            Err(err) => self.reject(&err),
        }
    }

    /// Card click: toggles the current item, plays anything else.
    pub fn activate(&mut self, item: &SearchItem) -> Result<(), NoticeError> {
        if !item.has_preview() {
            return Err(NoticeError::NoPreviewAvailable);
        }
        if self.is_current(item) {
            self.toggle_play()
        } else {
            self.play(item)
        }
    }

    pub fn toggle_play(&mut self) -> Result<(), NoticeError> {
        match self.state {
            PlaybackState::Idle | PlaybackState::Loading => Ok(()),
            PlaybackState::Playing => {
                self.device.pause();
                self.timer.hold();
                self.state = PlaybackState::Paused;
                Ok(())
            }
            PlaybackState::Paused | PlaybackState::Ended => {
                let restart = self.state == PlaybackState::Ended;
                if restart {
                    if let Err(err) = self.device.seek_to_start() {
                        tracing::warn!(error = %format!("{err:#}"), "failed to rewind preview");
                    }
                }
                let started = match self.device.play() {
                    Ok(started) => started,
                    Err(err) => {
                        tracing::warn!(error = %format!("{err:#}"), "device refused to resume");
                        return Err(NoticeError::rejected(&err));
                    }
                };
                if restart {
                    self.progress_ticks = 0;
                }
                match started {
                    PlayStart::Started if restart => self.timer.start(),
                    PlayStart::Started => self.timer.resume(),
                    PlayStart::Pending => {
                        self.timer.cancel();
                        self.state = PlaybackState::Loading;
                        return Ok(());
                    }
                }
                self.state = PlaybackState::Playing;
                Ok(())
            }
        }
    }

    pub fn toggle_repeat(&mut self) {
        self.repeat = !self.repeat;
        self.device.set_loop(self.repeat);
        tracing::debug!(repeat = self.repeat, "repeat toggled");
    }

    /// Moves through `view`, the filtered list as it stands right now.
    pub fn advance(&mut self, direction: Direction, view: &[SearchItem]) -> Result<(), NoticeError> {
        match direction {
            Direction::Previous => self.restart_current(),
            Direction::Next => {
                if view.is_empty() {
                    return Ok(());
                }
                if self.repeat && self.current.is_some() {
                    return self.restart_current();
                }
                match self.next_playable(view) {
                    Some(index) => self.play(&view[index]),
                    None => Err(NoticeError::NoPreviewAvailable),
                }
            }
        }
    }

    pub fn shuffle(&mut self, view: &[SearchItem]) -> Result<(), NoticeError> {
        if view.is_empty() {
            return Ok(());
        }
        for _ in 0..SHUFFLE_ATTEMPTS {
            let candidate = &view[self.rng.random_range(0..view.len())];
            if candidate.has_preview() {
                return self.play(candidate);
            }
        }
        tracing::info!(len = view.len(), "shuffle found nothing playable");
        Err(NoticeError::NoPreviewAvailable)
    }

    /// One timer period. Past the end of the preview this loops or moves on.
    pub fn on_tick(&mut self, view: &[SearchItem]) -> Result<(), NoticeError> {
        if self.state != PlaybackState::Playing {
            return Ok(());
        }
        self.progress_ticks += 1;
        if self.progress_ticks < PREVIEW_TICKS {
            return Ok(());
        }

        if self.repeat {
            self.progress_ticks = 0;
            if let Err(err) = self.device.seek_to_start().and_then(|()| self.device.play()) {
                tracing::warn!(error = %format!("{err:#}"), "failed to restart preview");
            }
            return Ok(());
        }

        let result = self.advance(Direction::Next, view);
        if self.state == PlaybackState::Playing && self.progress_ticks >= PREVIEW_TICKS {
            self.device.pause();
            self.finish();
        }
        result
    }

    /// Drives the timer by `elapsed` wall time. Time left over when a preview
    /// restarts or changes is not carried into the new run.
    pub fn update(&mut self, elapsed: Duration, view: &[SearchItem]) -> Result<(), NoticeError> {
        for _ in 0..self.timer.due(elapsed) {
            self.on_tick(view)?;
            if self.progress_ticks == 0 || !self.timer.is_running() {
                break;
            }
        }
        Ok(())
    }

    /// Consumes device events: the outcome of a loading preview, then end of media.
    pub fn poll_device(&mut self) -> Result<(), NoticeError> {
        if let Some(result) = self.device.take_start_result() {
            if self.state == PlaybackState::Loading {
                match result {
                    Ok(()) => self.begin_playing(),
                    Err(err) => return self.reject(&err),
                }
            } else {
                tracing::debug!(state = ?self.state, "ignoring late start result");
            }
        }
        if self.device.take_ended() {
            self.on_device_ended();
        }
        Ok(())
    }

    pub fn on_device_ended(&mut self) {
        if self.repeat {
            return;
        }
        self.finish();
    }

    pub fn stop(&mut self) {
        self.device.pause();
        self.timer.cancel();
        self.current = None;
        self.progress_ticks = 0;
        self.state = PlaybackState::Idle;
        tracing::debug!("playback stopped");
    }

    pub fn set_volume(&mut self, percent: i32) {
        self.volume_percent = percent.clamp(0, 100) as u8;
        let volume = self.volume_fraction();
        self.device.set_volume(volume);
    }

    pub fn current(&self) -> Option<&SearchItem> {
        self.current.as_ref()
    }

    pub fn is_current(&self, item: &SearchItem) -> bool {
        self.current.as_ref().is_some_and(|current| current.id == item.id)
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn is_repeat_on(&self) -> bool {
        self.repeat
    }

    pub fn progress_percent(&self) -> f64 {
        f64::from(self.progress_ticks.min(PREVIEW_TICKS)) * 100.0 / f64::from(PREVIEW_TICKS)
    }

    pub fn volume_percent(&self) -> u8 {
        self.volume_percent
    }

    pub fn timer(&self) -> &ProgressTimer {
        &self.timer
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    fn restart_current(&mut self) -> Result<(), NoticeError> {
        match self.current.clone() {
            Some(item) => self.play(&item),
            None => Ok(()),
        }
    }

    /// First preview-bearing item after the current one, wrapping once around.
    fn next_playable(&self, view: &[SearchItem]) -> Option<usize> {
        let len = view.len();
        let start = self
            .current
            .as_ref()
            .and_then(|current| view.iter().position(|item| item.id == current.id))
            .unwrap_or(len - 1);
        (1..=len)
            .map(|step| (start + step) % len)
            .find(|index| view[*index].has_preview())
    }

    fn begin_playing(&mut self) {
        self.state = PlaybackState::Playing;
        self.timer.start();
        if let Some(item) = &self.current {
            tracing::info!(item = %item.id, title = %item.title, "playing preview");
        }
    }

    fn reject(&mut self, err: &anyhow::Error) -> Result<(), NoticeError> {
        tracing::warn!(error = %format!("{err:#}"), "device rejected preview");
        self.timer.cancel();
        self.current = None;
        self.progress_ticks = 0;
        self.state = PlaybackState::Idle;
        Err(NoticeError::rejected(err))
    }

    fn finish(&mut self) {
        self.timer.cancel();
        if self.current.is_some() {
            self.state = PlaybackState::Ended;
        }
    }

    fn volume_fraction(&self) -> f32 {
        f32::from(self.volume_percent) / 100.0
    }
}

impl<D: AudioDevice> Drop for PlaybackEngine<D> {
    fn drop(&mut self) {
        if self.current.is_some() {
            self.device.pause();
        }
        self.timer.cancel();
    }
}

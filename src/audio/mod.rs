use anyhow::{Context, Result};
use reqwest::blocking::Client;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(20);

/// How a `play` request was taken up by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStart {
    /// Audio is running now.
    Started,
    /// The clip is still being fetched; the outcome arrives through `take_start_result`.
    Pending,
}

/// The single audio output. Volume is a 0.0–1.0 fraction.
pub trait AudioDevice {
    /// Selects the clip for the next `play`. Playback always begins at the start of the clip,
    /// including when the same locator is set again.
    fn set_source(&mut self, locator: &str);
    fn set_volume(&mut self, volume: f32);
    fn set_loop(&mut self, enabled: bool);
    /// Starts the current source, or resumes it when paused.
    fn play(&mut self) -> Result<PlayStart>;
    /// Pausing also abandons a pending start.
    fn pause(&mut self);
    fn seek_to_start(&mut self) -> Result<()>;
    /// Outcome of a `Pending` start, reported once.
    fn take_start_result(&mut self) -> Option<Result<()>>;
    /// True once per natural end of media. Never fires while looping.
    fn take_ended(&mut self) -> bool;
}

impl<D: AudioDevice + ?Sized> AudioDevice for Box<D> {
    fn set_source(&mut self, locator: &str) {
        (**self).set_source(locator)
    }

    fn set_volume(&mut self, volume: f32) {
        (**self).set_volume(volume)
    }

    fn set_loop(&mut self, enabled: bool) {
        (**self).set_loop(enabled)
    }

    fn play(&mut self) -> Result<PlayStart> {
        (**self).play()
    }

    fn pause(&mut self) {
        (**self).pause()
    }

    fn seek_to_start(&mut self) -> Result<()> {
        (**self).seek_to_start()
    }

    fn take_start_result(&mut self) -> Option<Result<()>> {
        (**self).take_start_result()
    }

    fn take_ended(&mut self) -> bool {
        (**self).take_ended()
    }
}

struct LoadedPreview {
    locator: String,
    bytes: Arc<[u8]>,
}

struct PendingLoad {
    locator: String,
    rx: Receiver<Result<Arc<[u8]>>>,
}

/// Plays previews through the system output. Clips are downloaded and probed on a
/// worker thread; audio starts once the whole clip is in memory.
pub struct RodioAudioDevice {
    stream: OutputStream,
    sink: Sink,
    http: Client,
    source: Option<String>,
    loaded: Option<LoadedPreview>,
    pending: Option<PendingLoad>,
    volume: f32,
    looping: bool,
    rewind: bool,
    ended_reported: bool,
}

impl RodioAudioDevice {
    pub fn new() -> Result<Self> {
        let (stream, sink) = Self::open_output_stream()?;
        let http = Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("failed to build preview http client")?;

        Ok(Self {
            stream,
            sink,
            http,
            source: None,
            loaded: None,
            pending: None,
            volume: 1.0,
            looping: false,
            rewind: false,
            ended_reported: false,
        })
    }

    fn open_output_stream() -> Result<(OutputStream, Sink)> {
        let mut stream = match OutputStreamBuilder::from_default_device()
            .context("failed to open default system output stream")
            .and_then(|builder| {
                builder
                    .with_error_callback(|_| {})
                    .open_stream_or_fallback()
                    .context("failed to start default output stream")
            }) {
            Ok(stream) => stream,
            Err(default_err) => Self::open_fallback_stream().with_context(|| {
                format!("unable to start any audio output stream after default failed: {default_err:#}")
            })?,
        };
        stream.log_on_drop(false);
        let sink = Sink::connect_new(stream.mixer());
        Ok((stream, sink))
    }

    fn open_fallback_stream() -> Result<OutputStream> {
        let host = rodio::cpal::default_host();
        let mut devices: Vec<_> = host
            .output_devices()
            .context("failed to enumerate output devices")?
            .filter_map(|device| device.name().ok().map(|name| (name, device)))
            .collect();
        devices.sort_by_cached_key(|(name, _)| {
            let lower = name.to_ascii_lowercase();
            let rank = if lower.contains("pulse") {
                0_u8
            } else if lower.contains("pipewire") {
                1_u8
            } else if lower.contains("default") {
                2_u8
            } else {
                3_u8
            };
            (rank, lower)
        });

        for (name, device) in devices {
            let opened = OutputStreamBuilder::from_device(device)
                .context("failed to open fallback output device")
                .and_then(|builder| {
                    builder
                        .with_error_callback(|_| {})
                        .open_stream_or_fallback()
                        .context("failed to start fallback output stream")
                });
            match opened {
                Ok(stream) => {
                    tracing::info!(device = %name, "using fallback audio output");
                    return Ok(stream);
                }
                Err(err) => tracing::debug!(device = %name, error = %format!("{err:#}"), "output rejected"),
            }
        }
        anyhow::bail!("no usable audio output device")
    }

    fn spawn_fetch(&self, locator: &str) -> PendingLoad {
        let (tx, rx) = mpsc::channel();
        let http = self.http.clone();
        let target = locator.to_string();
        thread::spawn(move || {
            let loaded = fetch_preview(&http, &target).and_then(|bytes| {
                let length = probe_preview(&target, Arc::clone(&bytes))?;
                tracing::debug!(locator = %target, size = bytes.len(), length = ?length, "preview fetched");
                Ok(bytes)
            });
            let _ = tx.send(loaded);
        });
        PendingLoad {
            locator: locator.to_string(),
            rx,
        }
    }

    fn append_loaded(&mut self) -> Result<()> {
        let Some(loaded) = &self.loaded else {
            anyhow::bail!("no preview loaded");
        };
        let decoder = Decoder::new(Cursor::new(Arc::clone(&loaded.bytes)))
            .with_context(|| format!("failed to decode preview {}", loaded.locator))?;
        self.sink.append(decoder);
        self.ended_reported = false;
        Ok(())
    }

    /// Swaps in a fresh sink holding the loaded clip from its first sample.
    fn restart_sink(&mut self) -> Result<()> {
        let paused = self.sink.is_paused();
        self.sink.stop();
        self.sink = Sink::connect_new(self.stream.mixer());
        self.sink.set_volume(self.volume);
        if paused {
            self.sink.pause();
        }
        self.rewind = false;
        self.append_loaded()
    }

    fn install(&mut self, locator: String, bytes: Arc<[u8]>) -> Result<()> {
        self.loaded = Some(LoadedPreview { locator, bytes });
        if let Err(err) = self.restart_sink() {
            self.loaded = None;
            return Err(err);
        }
        self.sink.play();
        Ok(())
    }
}

impl AudioDevice for RodioAudioDevice {
    fn set_source(&mut self, locator: &str) {
        self.source = Some(locator.to_string());
        self.pending = None;
        self.rewind = true;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.sink.set_volume(self.volume);
    }

    fn set_loop(&mut self, enabled: bool) {
        self.looping = enabled;
    }

    fn play(&mut self) -> Result<PlayStart> {
        let Some(source) = self.source.clone() else {
            anyhow::bail!("no preview source set");
        };
        let already_loaded = self
            .loaded
            .as_ref()
            .is_some_and(|loaded| loaded.locator == source);
        if !already_loaded {
            if self.pending.as_ref().is_none_or(|pending| pending.locator != source) {
                self.sink.stop();
                self.pending = Some(self.spawn_fetch(&source));
            }
            return Ok(PlayStart::Pending);
        }

        if self.rewind || self.sink.empty() {
            self.restart_sink()?;
        }
        self.sink.play();
        Ok(PlayStart::Started)
    }

    fn pause(&mut self) {
        self.pending = None;
        self.sink.pause();
    }

    fn seek_to_start(&mut self) -> Result<()> {
        if self.loaded.is_none() {
            anyhow::bail!("no active preview");
        }
        self.restart_sink()
    }

    fn take_start_result(&mut self) -> Option<Result<()>> {
        let received = match self.pending.as_ref()?.rx.try_recv() {
            Ok(received) => received,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(anyhow::anyhow!("preview download was interrupted")),
        };
        let pending = self.pending.take()?;
        Some(received.and_then(|bytes| self.install(pending.locator, bytes)))
    }

    fn take_ended(&mut self) -> bool {
        if self.pending.is_some()
            || self.loaded.is_none()
            || self.sink.is_paused()
            || !self.sink.empty()
        {
            return false;
        }
        if self.looping {
            if let Err(err) = self.append_loaded() {
                tracing::warn!(error = %format!("{err:#}"), "failed to loop preview");
            }
            return false;
        }
        if self.ended_reported {
            return false;
        }
        self.ended_reported = true;
        true
    }
}

fn fetch_preview(http: &Client, locator: &str) -> Result<Arc<[u8]>> {
    let bytes = if locator.starts_with("http://") || locator.starts_with("https://") {
        http.get(locator)
            .send()
            .with_context(|| format!("failed to request preview {locator}"))?
            .error_for_status()
            .with_context(|| format!("preview refused by server {locator}"))?
            .bytes()
            .with_context(|| format!("failed to download preview {locator}"))?
            .to_vec()
    } else {
        fs::read(locator).with_context(|| format!("failed to read preview {locator}"))?
    };
    Ok(Arc::from(bytes))
}

/// Checks that `bytes` hold a decodable clip and returns its length when the container knows it.
pub fn probe_preview(locator: &str, bytes: Arc<[u8]>) -> Result<Option<Duration>> {
    let source = MediaSourceStream::new(
        Box::new(Cursor::new(bytes)),
        MediaSourceStreamOptions::default(),
    );
    let mut hint = Hint::new();
    if let Some(extension) = extension_of(locator) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("unsupported preview format {locator}"))?;
    let Some(track) = probed.format.default_track() else {
        anyhow::bail!("preview {locator} has no audio track");
    };

    let params = &track.codec_params;
    let length = match (params.n_frames, params.time_base) {
        (Some(frames), Some(time_base)) => {
            let time = time_base.calc_time(frames);
            Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
        }
        _ => None,
    };
    Ok(length)
}

fn extension_of(locator: &str) -> Option<&str> {
    let path = locator.split(['?', '#']).next()?;
    let (_, extension) = path.rsplit_once('.')?;
    (!extension.is_empty() && !extension.contains('/')).then_some(extension)
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    SetSource(String),
    SetVolume(f32),
    SetLoop(bool),
    Play,
    Pause,
    SeekToStart,
}

/// Silent device that records every call. Used headless and in tests.
///
/// Starts are immediate unless `defer_starts` is on, in which case a new clip stays
/// loading until `finish_loading`.
#[derive(Debug, Default)]
pub struct NullAudioDevice {
    pub calls: Vec<DeviceCall>,
    rejected: HashSet<String>,
    source: Option<String>,
    loaded: Option<String>,
    position: Duration,
    playing: bool,
    loading: bool,
    deferred: bool,
    start_result: Option<Result<()>>,
    looping: bool,
    volume: f32,
    ended: bool,
}

impl NullAudioDevice {
    pub fn new() -> Self {
        Self {
            volume: 1.0,
            ..Self::default()
        }
    }

    /// Makes every later `play` of `locator` fail.
    pub fn reject(&mut self, locator: &str) {
        self.rejected.insert(locator.to_string());
    }

    pub fn defer_starts(&mut self, enabled: bool) {
        self.deferred = enabled;
    }

    /// Completes a deferred start of the current source.
    pub fn finish_loading(&mut self) {
        if !self.loading {
            return;
        }
        self.loading = false;
        let Some(source) = self.source.clone() else {
            return;
        };
        if self.rejected.contains(&source) {
            self.start_result = Some(Err(anyhow::anyhow!("playback of {source} was refused")));
            return;
        }
        self.loaded = Some(source);
        self.playing = true;
        self.start_result = Some(Ok(()));
    }

    /// Moves the playhead as if `elapsed` of audio had been heard.
    pub fn played_for(&mut self, elapsed: Duration) {
        if self.playing {
            self.position += elapsed;
        }
    }

    /// Simulates the clip running out.
    pub fn finish(&mut self) {
        if self.playing && !self.looping {
            self.playing = false;
            self.ended = true;
        }
    }

    pub fn play_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| **call == DeviceCall::Play)
            .count()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn position(&self) -> Duration {
        self.position
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl AudioDevice for NullAudioDevice {
    fn set_source(&mut self, locator: &str) {
        self.calls.push(DeviceCall::SetSource(locator.to_string()));
        self.source = Some(locator.to_string());
        self.position = Duration::ZERO;
        self.playing = false;
        self.loading = false;
        self.start_result = None;
        self.ended = false;
    }

    fn set_volume(&mut self, volume: f32) {
        self.calls.push(DeviceCall::SetVolume(volume));
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn set_loop(&mut self, enabled: bool) {
        self.calls.push(DeviceCall::SetLoop(enabled));
        self.looping = enabled;
    }

    fn play(&mut self) -> Result<PlayStart> {
        self.calls.push(DeviceCall::Play);
        let Some(source) = self.source.clone() else {
            anyhow::bail!("no preview source set");
        };
        if self.deferred && self.loaded.as_deref() != Some(source.as_str()) {
            self.loading = true;
            return Ok(PlayStart::Pending);
        }
        if self.rejected.contains(&source) {
            anyhow::bail!("playback of {source} was refused");
        }
        self.loaded = Some(source);
        self.playing = true;
        Ok(PlayStart::Started)
    }

    fn pause(&mut self) {
        self.calls.push(DeviceCall::Pause);
        self.playing = false;
        self.loading = false;
        self.start_result = None;
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.calls.push(DeviceCall::SeekToStart);
        if self.source.is_none() {
            anyhow::bail!("no active preview");
        }
        self.position = Duration::ZERO;
        self.ended = false;
        Ok(())
    }

    fn take_start_result(&mut self) -> Option<Result<()>> {
        self.start_result.take()
    }

    fn take_ended(&mut self) -> bool {
        std::mem::take(&mut self.ended)
    }
}

#[cfg(test)]
mod tests {
    use super::{AudioDevice, DeviceCall, NullAudioDevice, PlayStart, extension_of, probe_preview};
    use std::sync::Arc;
    use std::time::Duration;

    fn silent_wav(sample_rate: u32, samples: u32) -> Vec<u8> {
        let data_len = samples * 2;
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        wav.extend_from_slice(&16_u32.to_le_bytes());
        wav.extend_from_slice(&1_u16.to_le_bytes());
        wav.extend_from_slice(&1_u16.to_le_bytes());
        wav.extend_from_slice(&sample_rate.to_le_bytes());
        wav.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        wav.extend_from_slice(&2_u16.to_le_bytes());
        wav.extend_from_slice(&16_u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        wav.resize(wav.len() + data_len as usize, 0);
        wav
    }

    #[test]
    fn extension_ignores_query_and_fragment() {
        assert_eq!(extension_of("https://p/a/clip.m4a?token=1"), Some("m4a"));
        assert_eq!(extension_of("/tmp/clip.wav#t=3"), Some("wav"));
        assert_eq!(extension_of("https://p.example/stream"), None);
    }

    #[test]
    fn probe_reads_wav_length() {
        let bytes: Arc<[u8]> = Arc::from(silent_wav(8_000, 8_000));
        let length = probe_preview("clip.wav", bytes).expect("probe");
        assert_eq!(length, Some(Duration::from_secs(1)));
    }

    #[test]
    fn probe_rejects_garbage() {
        let bytes: Arc<[u8]> = Arc::from(vec![7_u8; 256]);
        assert!(probe_preview("clip.m4a", bytes).is_err());
    }

    #[test]
    fn null_device_rejects_flagged_sources() {
        let mut device = NullAudioDevice::new();
        device.reject("https://p/blocked.m4a");

        device.set_source("https://p/blocked.m4a");
        assert!(device.play().is_err());
        assert!(!device.is_playing());

        device.set_source("https://p/ok.m4a");
        device.play().expect("play should succeed");
        assert!(device.is_playing());
        assert_eq!(device.play_count(), 2);
    }

    #[test]
    fn null_device_reports_end_once() {
        let mut device = NullAudioDevice::new();
        device.set_source("https://p/a.m4a");
        device.play().expect("play");
        device.finish();
        assert!(device.take_ended());
        assert!(!device.take_ended());
    }

    #[test]
    fn null_device_never_ends_while_looping() {
        let mut device = NullAudioDevice::new();
        device.set_source("https://p/a.m4a");
        device.set_loop(true);
        device.play().expect("play");
        device.finish();
        assert!(!device.take_ended());
        assert!(device.is_playing());
    }

    #[test]
    fn setting_the_same_source_rewinds() {
        let mut device = NullAudioDevice::new();
        device.set_source("https://p/a.m4a");
        device.play().expect("play");
        device.played_for(Duration::from_secs(10));
        device.pause();
        assert_eq!(device.position(), Duration::from_secs(10));

        device.set_source("https://p/a.m4a");
        assert_eq!(device.play().expect("play"), PlayStart::Started);
        assert_eq!(device.position(), Duration::ZERO);
    }

    #[test]
    fn deferred_start_reports_once_loaded() {
        let mut device = NullAudioDevice::new();
        device.defer_starts(true);
        device.set_source("https://p/a.m4a");
        assert_eq!(device.play().expect("play"), PlayStart::Pending);
        assert!(device.take_start_result().is_none());
        assert!(!device.is_playing());

        device.finish_loading();
        assert!(device.take_start_result().expect("result").is_ok());
        assert!(device.is_playing());

        device.pause();
        assert_eq!(device.play().expect("resume"), PlayStart::Started);
    }

    #[test]
    fn pause_abandons_a_pending_start() {
        let mut device = NullAudioDevice::new();
        device.defer_starts(true);
        device.set_source("https://p/a.m4a");
        device.play().expect("play");
        device.pause();
        device.finish_loading();
        assert!(device.take_start_result().is_none());
        assert!(!device.is_playing());
    }

    #[test]
    fn boxed_device_forwards_calls() {
        let mut device: Box<NullAudioDevice> = Box::new(NullAudioDevice::new());
        device.set_volume(0.5);
        device.pause();
        assert_eq!(
            device.calls,
            vec![DeviceCall::SetVolume(0.5), DeviceCall::Pause]
        );
    }
}

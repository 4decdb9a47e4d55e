#![no_main]

use libfuzzer_sys::fuzz_target;
use std::time::Duration;
use tunepeek::audio::NullAudioDevice;
use tunepeek::engine::PlaybackEngine;
use tunepeek::model::{Direction, ItemId, PlaybackState, SearchItem};

fuzz_target!(|data: &[u8]| {
    let len = data.first().map_or(0, |byte| usize::from(*byte % 8));
    let view: Vec<SearchItem> = (0..len)
        .map(|idx| SearchItem {
            id: ItemId::Track(idx as u64),
            title: format!("track_{idx}"),
            artist: None,
            genre: None,
            preview_url: (idx % 3 != 0).then(|| format!("https://p/{idx}.m4a")),
            collection_id: None,
            collection_name: None,
            price: None,
            artwork_url: None,
        })
        .collect();

    let mut engine = PlaybackEngine::seeded(NullAudioDevice::new(), 70, Duration::from_secs(1), 0);
    for byte in data.iter().skip(1) {
        let _ = match byte % 9 {
            0 if !view.is_empty() => engine.activate(&view[usize::from(*byte) % view.len()]),
            1 => engine.toggle_play(),
            2 => engine.advance(Direction::Next, &view),
            3 => engine.advance(Direction::Previous, &view),
            4 => engine.shuffle(&view),
            5 => {
                engine.toggle_repeat();
                Ok(())
            }
            6 => engine.update(Duration::from_millis(u64::from(*byte) * 250), &view),
            7 if byte & 0x80 != 0 => {
                let deferred = !engine.device().is_loading();
                engine.device_mut().defer_starts(deferred);
                engine.device_mut().finish_loading();
                engine.poll_device()
            }
            7 => {
                engine.device_mut().finish();
                engine.poll_device()
            }
            _ => {
                engine.stop();
                Ok(())
            }
        };

        assert_eq!(engine.state() == PlaybackState::Idle, engine.current().is_none());
        assert!((0.0..=100.0).contains(&engine.progress_percent()));
        assert_eq!(engine.timer().is_running(), engine.is_playing());
    }
});

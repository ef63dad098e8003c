//! Offline rendering of a composition into a PCM buffer.
//!
//! The renderer plans and routes every segment with the same [`Voice`] used by
//! live playback, anchored at the segment's timeline start, so an offline
//! render reproduces what playback from zero sounds like.

use std::{cell::Cell, rc::Rc};

use crate::{
    assets::{AssetCache, AssetDecoder},
    audio::{plan_clip, silent_buffer, Voice},
    config::RenderConfig,
    model::{ClipId, Composition, TrackId},
    Result, TimelineError,
};

/// Shortest render produced, even for an empty composition.
pub const MIN_RENDER_S: f64 = 0.1;
/// Peak level normalization aims for.
pub const NORMALIZE_TARGET: f64 = 0.99;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Restrict the render to one track (a stem).
    pub only_track: Option<TrackId>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl RenderOptions {
    pub fn mixdown(config: &RenderConfig) -> Self {
        Self {
            only_track: None,
            sample_rate: config.sample_rate,
            channels: config.channels,
        }
    }

    pub fn stem(config: &RenderConfig, track: TrackId) -> Self {
        Self {
            only_track: Some(track),
            ..Self::mixdown(config)
        }
    }
}

/// Planar render output.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedAudio {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
    /// Clips left out because their asset could not be decoded.
    pub skipped: Vec<ClipId>,
}

impl RenderedAudio {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration_s(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }

    /// Largest absolute sample across every channel.
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flatten()
            .fold(0.0_f32, |acc, &s| acc.max(s.abs()))
    }
}

/// Uniform scale lifting a quieter render's `peak` to [`NORMALIZE_TARGET`].
/// Renders already at or above the target, and silent ones, keep unit gain.
pub fn peak_normalization_scale(peak: f64) -> f64 {
    if peak > 0.0 && peak < NORMALIZE_TARGET {
        NORMALIZE_TARGET / peak
    } else {
        1.0
    }
}

/// Render length in seconds: the latest clip end, floored at [`MIN_RENDER_S`].
pub fn project_duration_s(state: &Composition) -> f64 {
    state.end_s().max(MIN_RENDER_S)
}

/// Headless renderer. One render runs at a time; overlapping requests are
/// rejected with [`TimelineError::RenderInProgress`].
pub struct OfflineRenderer {
    decoder: Rc<dyn AssetDecoder>,
    busy: Cell<bool>,
}

impl std::fmt::Debug for OfflineRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineRenderer")
            .field("busy", &self.busy.get())
            .finish()
    }
}

struct BusyGuard<'a>(&'a Cell<bool>);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Result<Self> {
        if flag.replace(true) {
            return Err(TimelineError::RenderInProgress);
        }
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl OfflineRenderer {
    pub fn new(decoder: Rc<dyn AssetDecoder>) -> Self {
        Self {
            decoder,
            busy: Cell::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    pub async fn render(
        &self,
        state: &Composition,
        options: &RenderOptions,
    ) -> Result<RenderedAudio> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let sample_rate = options.sample_rate.max(1);
        let duration_s = project_duration_s(state);
        let frames = (duration_s * sample_rate as f64).ceil() as usize;
        let mut channels = silent_buffer(options.channels, frames);
        let cache = AssetCache::new(self.decoder.clone());
        let mut skipped = Vec::new();

        let clips = state.clips.iter().filter(|c| {
            c.asset.is_some() && options.only_track.map_or(true, |t| c.track_id == t)
        });
        let total = state.clips.len();
        tracing::info!(
            duration_s,
            frames,
            sample_rate,
            only_track = ?options.only_track,
            "rendering offline"
        );

        for (index, clip) in clips.enumerate() {
            let Some(track) = state.track(clip.track_id) else {
                continue;
            };
            let url = clip.asset.as_ref().map_or("", |a| a.url.as_str());
            tracing::debug!(
                clip = %clip.id,
                current = index + 1,
                total,
                url,
                "decoding for render"
            );
            let audio = match cache.get(url).await {
                Ok(audio) => audio,
                Err(err) => {
                    tracing::warn!(clip = %clip.id, url, reason = %err.reason, "render skips clip");
                    skipped.push(clip.id);
                    continue;
                }
            };

            for plan in plan_clip(clip, audio.duration_s()) {
                if plan.start_s >= duration_s {
                    continue;
                }
                let mut voice = Voice::new(
                    audio.clone(),
                    &plan,
                    clip,
                    track,
                    plan.start_s,
                    plan.start_s,
                    sample_rate,
                );
                voice.render_into(&mut channels, 0);
            }
        }

        Ok(RenderedAudio {
            sample_rate,
            channels,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future::Future,
        pin::Pin,
        task::{Context, Poll},
    };

    use async_trait::async_trait;
    use futures::{executor::block_on, future::join};

    use super::*;
    use crate::{
        assets::{testing::*, DecodedAudio},
        error::AssetError,
        model::ClipDraft,
        playback::LiveScheduler,
    };

    fn config() -> RenderConfig {
        RenderConfig::default()
    }

    #[test]
    fn single_clip_is_audible_for_exactly_its_frames() {
        let decoder = Rc::new(MemoryDecoder::with("a.wav", constant(44_100, 1.0, 0.5)));
        let renderer = OfflineRenderer::new(decoder);
        let mut state = Composition::default();
        let first = state.tracks[0].id;
        let second = state.tracks[1].id;
        state.add_clip(ClipDraft::for_asset("a", "a.wav", 0.75), first, 0.0);
        state.add_clip(ClipDraft { duration_s: 2.0, ..Default::default() }, second, 0.0);

        let out = block_on(renderer.render(&state, &RenderOptions::mixdown(&config()))).unwrap();
        assert_eq!(out.channels.len(), 2);
        assert_eq!(out.frames(), 88_200);
        for channel in &out.channels {
            let audible: Vec<usize> = (0..channel.len()).filter(|&i| channel[i] != 0.0).collect();
            assert_eq!(audible.len(), 33_075);
            assert_eq!(audible.first(), Some(&0));
            assert_eq!(audible.last(), Some(&33_074));
        }
    }

    #[test]
    fn empty_composition_renders_minimum_length() {
        let renderer = OfflineRenderer::new(Rc::new(MemoryDecoder::default()));
        let options = RenderOptions::mixdown(&config());
        let out = block_on(renderer.render(&Composition::default(), &options)).unwrap();
        assert_eq!(out.frames(), 4_410);
        assert_eq!(out.peak(), 0.0);
    }

    #[test]
    fn normalization_lifts_quiet_renders_only() {
        assert_eq!(peak_normalization_scale(0.5), 1.98);
        assert_eq!(peak_normalization_scale(0.99), 1.0);
        assert_eq!(peak_normalization_scale(1.7), 1.0);
        assert_eq!(peak_normalization_scale(0.0), 1.0);
    }

    #[test]
    fn stems_only_contain_their_track() {
        let decoder = Rc::new(MemoryDecoder::with("a.wav", constant(1_000, 1.0, 0.5)));
        let renderer = OfflineRenderer::new(decoder);
        let mut state = Composition::default();
        let first = state.tracks[0].id;
        let second = state.tracks[1].id;
        state.add_clip(ClipDraft::for_asset("a", "a.wav", 0.5), first, 0.0);
        state.add_clip(ClipDraft::for_asset("b", "a.wav", 0.5), second, 1.0);
        let options = RenderOptions {
            sample_rate: 1_000,
            ..RenderOptions::stem(&config(), second)
        };
        let out = block_on(renderer.render(&state, &options)).unwrap();
        assert!(out.channels[0][..1_000].iter().all(|&s| s == 0.0));
        assert!(out.channels[0][1_000..1_500].iter().all(|&s| s != 0.0));
    }

    #[test]
    fn undecodable_assets_are_skipped() {
        let renderer = OfflineRenderer::new(Rc::new(MemoryDecoder::default()));
        let mut state = Composition::default();
        let track = state.tracks[0].id;
        let id = state.add_clip(ClipDraft::for_asset("x", "x.wav", 0.5), track, 0.0);
        let out = block_on(renderer.render(&state, &RenderOptions::mixdown(&config()))).unwrap();
        assert_eq!(out.skipped, vec![id]);
        assert_eq!(out.peak(), 0.0);
    }

    #[test]
    fn offline_render_matches_live_playback_from_zero() {
        let samples: Vec<f32> = (0..400).map(|i| ((i as f32) * 0.1).sin() * 0.8).collect();
        let decoder = Rc::new(MemoryDecoder::with("s.wav", DecodedAudio::new(200, vec![samples])));
        let mut state = Composition::default();
        let track = state.tracks[0].id;
        let id = state.add_clip(ClipDraft::for_asset("s", "s.wav", 1.5), track, 0.25);
        state.set_track_pan(track, -0.4);
        let clip = state.clip_mut(id).unwrap();
        clip.gain.insert_point(0.5, 0.3);
        clip.pan.insert_point(0.3, 0.7);
        clip.rate.insert_point(0.6, 1.4);
        clip.set_fade_in(0.2);
        clip.set_fade_out(0.3);

        let render_config = RenderConfig { sample_rate: 200, channels: 2 };
        let renderer = OfflineRenderer::new(decoder.clone());
        let offline =
            block_on(renderer.render(&state, &RenderOptions::mixdown(&render_config))).unwrap();

        let live = LiveScheduler::new(decoder, &render_config);
        block_on(live.play_from(&state, 0.0));
        let block = live.render_block(offline.frames());
        for (a, b) in offline.channels.iter().zip(&block) {
            for (x, y) in a.iter().zip(b) {
                assert!((x - y).abs() < 1e-6);
            }
        }
        assert!(offline.peak() > 0.0);
    }

    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                return Poll::Ready(());
            }
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    struct SlowDecoder(MemoryDecoder);

    #[async_trait(?Send)]
    impl AssetDecoder for SlowDecoder {
        async fn decode(&self, url: &str) -> std::result::Result<DecodedAudio, AssetError> {
            YieldOnce(false).await;
            self.0.decode(url).await
        }
    }

    #[test]
    fn overlapping_renders_are_rejected() {
        let decoder = Rc::new(SlowDecoder(MemoryDecoder::with("a.wav", constant(100, 1.0, 0.5))));
        let renderer = OfflineRenderer::new(decoder);
        let mut state = Composition::default();
        let track = state.tracks[0].id;
        state.add_clip(ClipDraft::for_asset("a", "a.wav", 0.5), track, 0.0);
        let options = RenderOptions { sample_rate: 100, ..RenderOptions::mixdown(&config()) };

        let (first, second) = block_on(join(
            renderer.render(&state, &options),
            renderer.render(&state, &options),
        ));
        assert!(first.is_ok());
        assert!(matches!(second, Err(TimelineError::RenderInProgress)));
        assert!(!renderer.is_busy());
        assert!(block_on(renderer.render(&state, &options)).is_ok());
    }
}

//! Live playback scheduling against an output clock.
//!
//! Every call to [`LiveScheduler::play_from`] opens a new session. Work that
//! suspends (asset decoding) holds a [`SessionToken`] and checks it before
//! each side effect, so a newer play or stop turns stale work into a no-op.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::Arc,
};

use futures::future::join_all;

use crate::{
    assets::{AssetCache, AssetDecoder, DecodedAudio},
    audio::{plan_clip, silent_buffer, Voice},
    config::RenderConfig,
    error::AssetError,
    model::{Clip, ClipId, Composition},
    timeline::PlaybackClock,
};

/// Cancellation handle for one playback session.
#[derive(Debug, Clone)]
pub struct SessionToken {
    generation: u64,
    current: Rc<Cell<u64>>,
}

impl SessionToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        self.current.get() == self.generation
    }
}

/// What a `play_from` call ended up scheduling.
#[derive(Debug, Default)]
pub struct PlaybackReport {
    pub scheduled_segments: usize,
    pub skipped: Vec<(ClipId, AssetError)>,
    /// A newer session superseded this one before it finished scheduling.
    pub cancelled: bool,
}

/// Schedules voices for a composition and mixes them block by block.
pub struct LiveScheduler {
    cache: AssetCache,
    generation: Rc<Cell<u64>>,
    voices: RefCell<Vec<Voice>>,
    playing: Cell<bool>,
    clock: RefCell<PlaybackClock>,
    channels: u16,
}

impl std::fmt::Debug for LiveScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveScheduler")
            .field("generation", &self.generation.get())
            .field("voices", &self.voices.borrow().len())
            .field("playing", &self.playing.get())
            .finish()
    }
}

impl LiveScheduler {
    pub fn new(decoder: Rc<dyn AssetDecoder>, config: &RenderConfig) -> Self {
        Self::with_cache(AssetCache::new(decoder), config)
    }

    pub fn with_cache(cache: AssetCache, config: &RenderConfig) -> Self {
        Self {
            cache,
            generation: Rc::new(Cell::new(0)),
            voices: RefCell::new(Vec::new()),
            playing: Cell::new(false),
            clock: RefCell::new(PlaybackClock::new(config.sample_rate)),
            channels: config.channels.max(1),
        }
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.borrow().sample_rate()
    }

    /// Output clock time in seconds.
    pub fn now(&self) -> f64 {
        self.clock.borrow().time_seconds()
    }

    /// True while a session is active, whether or not anything is audible.
    pub fn is_playing(&self) -> bool {
        self.playing.get()
    }

    pub fn active_voices(&self) -> usize {
        self.voices.borrow().iter().filter(|v| !v.is_finished()).count()
    }

    /// Token for the session that is current right now.
    pub fn session(&self) -> SessionToken {
        SessionToken {
            generation: self.generation.get(),
            current: self.generation.clone(),
        }
    }

    /// Invalidates the running session and silences every voice.
    pub fn stop_all(&self) {
        self.generation.set(self.generation.get().wrapping_add(1));
        for voice in self.voices.borrow_mut().iter_mut() {
            voice.stop();
        }
        self.voices.borrow_mut().clear();
        self.playing.set(false);
    }

    /// Starts playback of `state` with the external transport at
    /// `transport_time_s`.
    ///
    /// Clips are resolved concurrently. A clip whose asset fails to decode is
    /// skipped; the others still play. Segments already in progress start
    /// mid-way with automation anchored to where they would have started.
    pub async fn play_from(&self, state: &Composition, transport_time_s: f64) -> PlaybackReport {
        self.stop_all();
        let token = self.session();
        let base_now = self.now();
        tracing::info!(
            session = token.generation(),
            transport_time_s,
            clips = state.clips.len(),
            "starting playback"
        );

        let candidates: Vec<&Clip> = state
            .clips
            .iter()
            .filter(|c| c.asset.is_some() && c.end_s() >= transport_time_s)
            .collect();

        let outcomes = join_all(candidates.into_iter().map(|clip| {
            let token = token.clone();
            async move {
                let url = clip.asset.as_ref().map_or("", |a| a.url.as_str());
                match self.cache.get(url).await {
                    Ok(audio) => Ok(self.schedule_clip(
                        state,
                        clip,
                        audio,
                        &token,
                        base_now,
                        transport_time_s,
                    )),
                    Err(err) => {
                        tracing::warn!(clip = %clip.id, url, reason = %err.reason, "skipping clip");
                        Err((clip.id, err))
                    }
                }
            }
        }))
        .await;

        let mut report = PlaybackReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(count) => report.scheduled_segments += count,
                Err(skipped) => report.skipped.push(skipped),
            }
        }
        if token.is_current() {
            self.playing.set(true);
        } else {
            report.cancelled = true;
            tracing::debug!(session = token.generation(), "playback session superseded");
        }
        report
    }

    fn schedule_clip(
        &self,
        state: &Composition,
        clip: &Clip,
        audio: Arc<DecodedAudio>,
        token: &SessionToken,
        base_now: f64,
        base_transport_s: f64,
    ) -> usize {
        if !token.is_current() {
            return 0;
        }
        let now = self.now();
        let transport_t = base_transport_s + (now - base_now);
        if transport_t > clip.end_s() {
            return 0;
        }
        let Some(track) = state.track(clip.track_id) else {
            return 0;
        };

        let sample_rate = self.sample_rate();
        let mut scheduled = 0;
        for plan in plan_clip(clip, audio.duration_s()) {
            if transport_t > plan.end_s() {
                continue;
            }
            let nominal_at = now + plan.start_s - transport_t;
            let resume_at = nominal_at.max(now);
            tracing::debug!(
                clip = %clip.id,
                nominal_at,
                resume_at,
                duration_s = plan.duration_s,
                "scheduling segment"
            );
            let voice = Voice::new(
                audio.clone(),
                &plan,
                clip,
                track,
                nominal_at,
                resume_at,
                sample_rate,
            );
            self.voices.borrow_mut().push(voice);
            scheduled += 1;
        }
        scheduled
    }

    /// Decodes an asset ahead of playback.
    pub async fn prefetch(&self, url: &str) -> bool {
        self.cache.prefetch(url).await
    }

    /// Mixes the next `frames` frames of every active voice and advances the
    /// output clock.
    pub fn render_block(&self, frames: usize) -> Vec<Vec<f32>> {
        let mut out = silent_buffer(self.channels, frames);
        let block_start = self.clock.borrow().frames();
        {
            let mut voices = self.voices.borrow_mut();
            for voice in voices.iter_mut() {
                voice.render_into(&mut out, block_start);
            }
            voices.retain(|v| !v.is_finished());
        }
        self.clock.borrow_mut().advance_frames(frames as u64);
        out
    }
}

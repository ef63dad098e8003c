use serde::{Deserialize, Serialize};

use crate::{model::Composition, playback::LiveScheduler, playback::PlaybackReport};

/// Output clock counting rendered frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackClock {
    frames: u64,
    sample_rate: u32,
}

impl PlaybackClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: 0,
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn reset(&mut self) {
        self.frames = 0;
    }

    pub fn advance_frames(&mut self, frames: u64) {
        self.frames = self.frames.saturating_add(frames);
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn time_seconds(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Idle,
    Playing,
}

/// Events emitted by the external clock (the video player).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TransportEvent {
    Play { time_s: f64 },
    Pause { time_s: f64 },
    Seek { time_s: f64 },
}

/// Idle/Playing state machine that follows the external transport.
#[derive(Debug)]
pub struct Transport {
    scheduler: LiveScheduler,
    state: TransportState,
    position_s: f64,
}

impl Transport {
    pub fn new(scheduler: LiveScheduler) -> Self {
        Self {
            scheduler,
            state: TransportState::Idle,
            position_s: 0.0,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn position_s(&self) -> f64 {
        self.position_s
    }

    pub fn scheduler(&self) -> &LiveScheduler {
        &self.scheduler
    }

    /// Applies one transport event. Returns the scheduling report when the
    /// event (re)started playback.
    pub async fn handle(
        &mut self,
        composition: &Composition,
        event: TransportEvent,
    ) -> Option<PlaybackReport> {
        match event {
            TransportEvent::Play { time_s } => Some(self.play(composition, time_s).await),
            TransportEvent::Pause { time_s } => {
                self.pause(time_s);
                None
            }
            TransportEvent::Seek { time_s } => {
                self.position_s = time_s.max(0.0);
                match self.state {
                    TransportState::Playing => Some(self.play(composition, time_s).await),
                    TransportState::Idle => None,
                }
            }
        }
    }

    async fn play(&mut self, composition: &Composition, time_s: f64) -> PlaybackReport {
        self.position_s = time_s.max(0.0);
        self.state = TransportState::Playing;
        self.scheduler.play_from(composition, self.position_s).await
    }

    fn pause(&mut self, time_s: f64) {
        self.scheduler.stop_all();
        self.position_s = time_s.max(0.0);
        self.state = TransportState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use futures::executor::block_on;

    use super::*;
    use crate::{
        assets::testing::{constant, MemoryDecoder},
        config::RenderConfig,
        model::ClipDraft,
    };

    #[test]
    fn clock_counts_frames() {
        let mut clock = PlaybackClock::new(100);
        clock.advance_frames(150);
        assert_eq!(clock.time_seconds(), 1.5);
        clock.reset();
        assert_eq!(clock.frames(), 0);
    }

    #[test]
    fn transport_follows_play_pause_and_seek() {
        let decoder = Rc::new(MemoryDecoder::with("a.wav", constant(100, 1.0, 0.5)));
        let scheduler = LiveScheduler::new(decoder, &RenderConfig::default());
        let mut transport = Transport::new(scheduler);
        let mut state = Composition::default();
        let track = state.tracks[0].id;
        state.add_clip(ClipDraft::for_asset("a", "a.wav", 1.0), track, 2.0);

        assert!(block_on(transport.handle(&state, TransportEvent::Seek { time_s: 1.0 })).is_none());
        assert_eq!(transport.state(), TransportState::Idle);

        let report =
            block_on(transport.handle(&state, TransportEvent::Play { time_s: 1.0 })).unwrap();
        assert_eq!(report.scheduled_segments, 1);
        assert!(transport.scheduler().is_playing());

        let report =
            block_on(transport.handle(&state, TransportEvent::Seek { time_s: 3.5 })).unwrap();
        assert_eq!(report.scheduled_segments, 0);
        assert_eq!(transport.state(), TransportState::Playing);

        block_on(transport.handle(&state, TransportEvent::Pause { time_s: 3.6 }));
        assert_eq!(transport.state(), TransportState::Idle);
        assert!(!transport.scheduler().is_playing());
        assert_eq!(transport.position_s(), 3.6);
    }
}

//! Core library for the Foley Timeline composition engine.
//!
//! A [`Composition`] of tracks and clips is edited through [`History`], which
//! keeps every mutation undoable. Placement rules and crossfades live in
//! [`placement`], automation semantics in [`automation`]. Live playback
//! ([`LiveScheduler`]) and offline rendering ([`OfflineRenderer`]) share the
//! same per-segment voice so an export sounds like what was heard. The
//! [`sync`] module aligns clips to motion events from an external detector.

pub mod analysis;
pub mod assets;
pub mod audio;
pub mod automation;
pub mod config;
pub mod error;
pub mod export;
pub mod history;
pub mod model;
pub mod placement;
pub mod playback;
pub mod render;
pub mod sync;
pub mod timeline;

pub use analysis::{detect_transient_times, Envelope};
pub use assets::{compute_peaks, AssetCache, AssetDecoder, DecodedAudio, WavFileDecoder};
pub use audio::{plan_clip, SegmentPlan, Voice};
pub use automation::{evaluate, ParamSchedule};
pub use config::{EngineConfig, ExportFormat, ExportMode, RenderConfig, SyncConfig, TimelineConfig};
pub use error::{AssetError, Result, TimelineError};
pub use export::{ExportFile, ExportRequest, Exporter, LossyEncoder};
pub use history::History;
pub use model::{
    AssetRef, AutomationCurve, AutomationPoint, Clip, ClipDraft, ClipId, Clipboard, Composition,
    CurveKind, Selection, TimeWarpSegment, Track, TrackId, TransitionPolicy,
};
pub use playback::{LiveScheduler, PlaybackReport, SessionToken};
pub use render::{OfflineRenderer, RenderOptions, RenderedAudio};
pub use sync::{
    MotionEvent, MotionEventSource, MotionRequest, MotionSync, SyncOutcome, SyncStrategy,
};
pub use timeline::{PlaybackClock, Transport, TransportEvent, TransportState};

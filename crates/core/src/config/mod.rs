use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timeline: TimelineConfig,
    pub render: RenderConfig,
    pub export: ExportConfig,
    pub sync: SyncConfig,
    pub history: HistoryConfig,
}

impl EngineConfig {
    /// Reads a JSON configuration file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Defaults for freshly created compositions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    pub initial_tracks: usize,
    pub track_gain: f64,
    pub transition_s: f64,
    pub track_name_prefix: String,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            initial_tracks: 5,
            track_gain: 0.9,
            transition_s: 0.25,
            track_name_prefix: "Track".to_string(),
        }
    }
}

/// Configuration of the offline render context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Every track summed into one file.
    Mixdown,
    /// One file per track that references at least one asset.
    Stems,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Wav,
    Lossy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub normalize: bool,
    pub mode: ExportMode,
    pub format: ExportFormat,
    pub bitrate_kbps: u32,
    pub project_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            mode: ExportMode::Mixdown,
            format: ExportFormat::Wav,
            bitrate_kbps: 192,
            project_name: "foley_timeline".to_string(),
        }
    }
}

/// Parameters forwarded verbatim to the motion-event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionAnalysisParams {
    pub frame_analysis: bool,
    pub model: String,
    pub smooth_win: u32,
    pub blur_ksize: u32,
    pub roi_x: f64,
    pub roi_y: f64,
    pub roi_w: f64,
    pub roi_h: f64,
}

impl Default for MotionAnalysisParams {
    fn default() -> Self {
        Self {
            frame_analysis: true,
            model: "default".to_string(),
            smooth_win: 5,
            blur_ksize: 7,
            roi_x: 0.10,
            roi_y: 0.55,
            roi_w: 0.80,
            roi_h: 0.43,
        }
    }
}

impl MotionAnalysisParams {
    /// Clamps every field into the range accepted by the motion service.
    pub fn sanitized(&self) -> Self {
        Self {
            frame_analysis: self.frame_analysis,
            model: if self.model.is_empty() {
                "default".to_string()
            } else {
                self.model.clone()
            },
            smooth_win: self.smooth_win.clamp(1, 99),
            blur_ksize: self.blur_ksize.clamp(1, 99),
            roi_x: self.roi_x.clamp(0.0, 1.0),
            roi_y: self.roi_y.clamp(0.0, 1.0),
            roi_w: self.roi_w.clamp(0.0, 1.0),
            roi_h: self.roi_h.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub analysis: MotionAnalysisParams,
    pub whole_clip_max_events: usize,
    pub segmented_max_events: usize,
    pub repeat_if_few: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            analysis: MotionAnalysisParams::default(),
            whole_clip_max_events: 12,
            segmented_max_events: 20,
            repeat_if_few: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_depth: 256 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "render": { "sample_rate": 48000 } }"#)
            .expect("config should parse");
        assert_eq!(config.render.sample_rate, 48_000);
        assert_eq!(config.render.channels, 2);
        assert_eq!(config.timeline.initial_tracks, 5);
        assert_eq!(config.export.mode, ExportMode::Mixdown);
    }

    #[test]
    fn analysis_params_are_clamped() {
        let params = MotionAnalysisParams {
            smooth_win: 0,
            roi_x: 1.7,
            model: String::new(),
            ..Default::default()
        }
        .sanitized();
        assert_eq!(params.smooth_win, 1);
        assert_eq!(params.roi_x, 1.0);
        assert_eq!(params.model, "default");
    }
}

//! Mixdown and stem export to 16-bit WAV or an external lossy encoder.

use std::{io::Cursor, rc::Rc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    config::{ExportConfig, ExportFormat, ExportMode, RenderConfig},
    model::Composition,
    render::{peak_normalization_scale, OfflineRenderer, RenderOptions, RenderedAudio},
    Result, TimelineError,
};

pub const MIN_BITRATE_KBPS: u32 = 32;
pub const MAX_BITRATE_KBPS: u32 = 320;
const MAX_FILE_PART_CHARS: usize = 64;

/// Everything one export run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub mode: ExportMode,
    pub format: ExportFormat,
    pub normalize: bool,
    pub bitrate_kbps: u32,
    pub project_name: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl ExportRequest {
    pub fn from_config(export: &ExportConfig, render: &RenderConfig) -> Self {
        Self {
            mode: export.mode,
            format: export.format,
            normalize: export.normalize,
            bitrate_kbps: export.bitrate_kbps,
            project_name: export.project_name.clone(),
            sample_rate: render.sample_rate,
            channels: render.channels,
        }
    }

    fn render_config(&self) -> RenderConfig {
        RenderConfig {
            sample_rate: self.sample_rate,
            channels: self.channels.clamp(1, 2),
        }
    }
}

/// A finished export artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// External service turning WAV bytes into a lossy stream.
#[async_trait(?Send)]
pub trait LossyEncoder {
    async fn encode(&self, wav: &[u8], bitrate_kbps: u32) -> Result<Vec<u8>>;
}

/// Restricts a name to word characters and dashes for use in file names.
pub fn safe_file_part(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            if ch == '_' {
                pending_sep = true;
                continue;
            }
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }
    let out: String = out.chars().take(MAX_FILE_PART_CHARS).collect();
    if out.is_empty() {
        "export".to_string()
    } else {
        out
    }
}

/// Signed 16-bit conversion with asymmetric full scale.
fn to_pcm16(sample: f64) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32_768.0) as i16
    } else {
        (s * 32_767.0) as i16
    }
}

/// Encodes a render as interleaved 16-bit little-endian PCM WAV, scaling
/// every sample by `scale`. A mono render written as stereo duplicates its
/// only channel.
pub fn encode_wav(audio: &RenderedAudio, scale: f64, channels: u16) -> Result<Vec<u8>> {
    let channels = channels.clamp(1, 2);
    let spec = hound::WavSpec {
        channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        let empty: &[f32] = &[];
        let left = audio.channels.first().map_or(empty, Vec::as_slice);
        let right = audio.channels.get(1).map_or(left, Vec::as_slice);
        for (i, &l) in left.iter().enumerate() {
            writer.write_sample(to_pcm16(l as f64 * scale))?;
            if channels == 2 {
                let r = right.get(i).copied().unwrap_or(0.0);
                writer.write_sample(to_pcm16(r as f64 * scale))?;
            }
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Renders and encodes mixdowns or stems.
pub struct Exporter {
    renderer: OfflineRenderer,
    encoder: Option<Rc<dyn LossyEncoder>>,
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("renderer", &self.renderer)
            .field("lossy", &self.encoder.is_some())
            .finish()
    }
}

impl Exporter {
    pub fn new(renderer: OfflineRenderer) -> Self {
        Self {
            renderer,
            encoder: None,
        }
    }

    pub fn with_encoder(mut self, encoder: Rc<dyn LossyEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub async fn export(
        &self,
        state: &Composition,
        request: &ExportRequest,
    ) -> Result<Vec<ExportFile>> {
        if state.clips.is_empty() {
            return Err(TimelineError::msg("nothing to export: the composition has no clips"));
        }
        if request.format == ExportFormat::Lossy {
            if !(MIN_BITRATE_KBPS..=MAX_BITRATE_KBPS).contains(&request.bitrate_kbps) {
                return Err(TimelineError::Encoding(format!(
                    "bitrate {} kbps outside {MIN_BITRATE_KBPS}..={MAX_BITRATE_KBPS}",
                    request.bitrate_kbps
                )));
            }
            if self.encoder.is_none() {
                return Err(TimelineError::Encoding("no lossy encoder configured".to_string()));
            }
        }

        let project = safe_file_part(&request.project_name);
        let render_config = request.render_config();
        let targets: Vec<(String, RenderOptions)> = match request.mode {
            ExportMode::Mixdown => vec![(
                format!("{project}_mixdown"),
                RenderOptions::mixdown(&render_config),
            )],
            ExportMode::Stems => state
                .tracks
                .iter()
                .filter(|t| state.clips_on(t.id).any(|c| c.asset.is_some()))
                .map(|t| {
                    (
                        format!("{project}_stem_{}", safe_file_part(&t.name)),
                        RenderOptions::stem(&render_config, t.id),
                    )
                })
                .collect(),
        };

        let mut files = Vec::with_capacity(targets.len());
        for (base_name, options) in targets {
            let rendered = self.renderer.render(state, &options).await?;
            let peak = rendered.peak() as f64;
            let scale = if request.normalize {
                peak_normalization_scale(peak)
            } else {
                1.0
            };
            tracing::info!(
                file = %base_name,
                peak,
                scale,
                frames = rendered.frames(),
                "encoding export"
            );
            let wav = encode_wav(&rendered, scale, render_config.channels)?;
            let file = match (request.format, &self.encoder) {
                (ExportFormat::Lossy, Some(encoder)) => ExportFile {
                    file_name: format!("{base_name}_{}kbps.mp3", request.bitrate_kbps),
                    bytes: encoder.encode(&wav, request.bitrate_kbps).await?,
                },
                _ => ExportFile {
                    file_name: format!("{base_name}.wav"),
                    bytes: wav,
                },
            };
            files.push(file);
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::{
        assets::{testing::*, DecodedAudio},
        model::ClipDraft,
    };

    fn request(mode: ExportMode, format: ExportFormat) -> ExportRequest {
        ExportRequest {
            mode,
            format,
            sample_rate: 1_000,
            ..ExportRequest::from_config(&ExportConfig::default(), &RenderConfig::default())
        }
    }

    fn exporter() -> Exporter {
        let decoder = Rc::new(MemoryDecoder::with("a.wav", constant(1_000, 1.0, 0.25)));
        Exporter::new(OfflineRenderer::new(decoder))
    }

    fn state_with_clip() -> Composition {
        let mut state = Composition::default();
        let track = state.tracks[1].id;
        state.set_track_name(track, "Foley / Steps!");
        state.add_clip(ClipDraft::for_asset("a", "a.wav", 0.5), track, 0.0);
        state
    }

    struct FakeMp3;

    #[async_trait(?Send)]
    impl LossyEncoder for FakeMp3 {
        async fn encode(&self, wav: &[u8], bitrate_kbps: u32) -> Result<Vec<u8>> {
            Ok(format!("mp3:{bitrate_kbps}:{}", wav.len()).into_bytes())
        }
    }

    #[test]
    fn file_parts_are_sanitized() {
        assert_eq!(safe_file_part("  Foley / Steps! "), "Foley_Steps");
        assert_eq!(safe_file_part("__a__b__"), "a_b");
        assert_eq!(safe_file_part("a-b"), "a-b");
        assert_eq!(safe_file_part("!!!"), "export");
        assert_eq!(safe_file_part(&"x".repeat(100)).len(), 64);
    }

    #[test]
    fn pcm_conversion_is_asymmetric_and_clamped() {
        assert_eq!(to_pcm16(1.0), 32_767);
        assert_eq!(to_pcm16(-1.0), -32_768);
        assert_eq!(to_pcm16(3.0), 32_767);
        assert_eq!(to_pcm16(0.0), 0);
    }

    #[test]
    fn wav_header_and_samples_round_trip() {
        let audio = RenderedAudio {
            sample_rate: 8_000,
            channels: vec![vec![0.5, -0.5, 0.25]],
            skipped: Vec::new(),
        };
        let bytes = encode_wav(&audio, 1.0, 2).unwrap();
        assert_eq!(bytes.len(), 44 + 3 * 4);
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8_000);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![16_383, 16_383, -16_384, -16_384, 8_191, 8_191]);
        let bytes = encode_wav(&audio, 1.0, 1).unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let decoded = DecodedAudio::from_wav_reader(reader).unwrap();
        assert_eq!(decoded.length_samples(), 3);
    }

    #[test]
    fn stems_skip_tracks_without_assets() {
        let req = request(ExportMode::Stems, ExportFormat::Wav);
        let files = block_on(exporter().export(&state_with_clip(), &req)).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "foley_timeline_stem_Foley_Steps.wav");
    }

    #[test]
    fn mixdown_is_normalized_to_target_peak() {
        let req = request(ExportMode::Mixdown, ExportFormat::Wav);
        let files = block_on(exporter().export(&state_with_clip(), &req)).unwrap();
        assert_eq!(files[0].file_name, "foley_timeline_mixdown.wav");
        let reader = hound::WavReader::new(Cursor::new(files[0].bytes.clone())).unwrap();
        let peak = reader.into_samples::<i16>().map(|s| s.unwrap().unsigned_abs()).max().unwrap();
        assert!((32_400..=32_440).contains(&peak), "peak {peak}");
    }

    #[test]
    fn lossy_export_validates_bitrate_and_names_files() {
        let exporter = exporter().with_encoder(Rc::new(FakeMp3));
        let mut req = request(ExportMode::Mixdown, ExportFormat::Lossy);
        req.bitrate_kbps = 16;
        assert!(matches!(
            block_on(exporter.export(&state_with_clip(), &req)),
            Err(TimelineError::Encoding(_))
        ));
        req.bitrate_kbps = 128;
        let files = block_on(exporter.export(&state_with_clip(), &req)).unwrap();
        assert_eq!(files[0].file_name, "foley_timeline_mixdown_128kbps.mp3");
        assert!(files[0].bytes.starts_with(b"mp3:128:"));
    }

    #[test]
    fn empty_composition_has_nothing_to_export() {
        let req = request(ExportMode::Mixdown, ExportFormat::Wav);
        let err = block_on(exporter().export(&Composition::default(), &req)).unwrap_err();
        assert!(format!("{err}").contains("nothing to export"));
    }
}

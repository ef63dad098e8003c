//! Decoded audio assets, the decoding seam and a coalescing URL cache.

use std::{
    cell::RefCell,
    collections::HashMap,
    io::Read,
    path::Path,
    rc::Rc,
    sync::Arc,
};

use async_trait::async_trait;
use futures::future::{FutureExt, LocalBoxFuture, Shared};

use crate::error::AssetError;

/// Default number of waveform bins.
pub const DEFAULT_PEAK_BINS: usize = 160;

/// Planar PCM produced by a decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn length_samples(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn duration_s(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.length_samples() as f64 / self.sample_rate as f64
    }

    /// Reads a WAV stream, scaling integer samples into `[-1, 1)`.
    pub fn from_wav_reader<R: Read>(reader: hound::WavReader<R>) -> Result<Self, hound::Error> {
        let spec = reader.spec();
        let channel_count = usize::from(spec.channels.max(1));
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max_val))
                    .collect::<Result<_, _>>()?
            }
            hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        };
        let frames = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Ok(Self::new(spec.sample_rate, channels))
    }
}

/// Turns an asset URL into PCM.
#[async_trait(?Send)]
pub trait AssetDecoder {
    async fn decode(&self, url: &str) -> Result<DecodedAudio, AssetError>;
}

/// Decodes WAV files from the local filesystem, treating the URL as a path.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavFileDecoder;

impl WavFileDecoder {
    pub fn read(path: impl AsRef<Path>) -> Result<DecodedAudio, hound::Error> {
        DecodedAudio::from_wav_reader(hound::WavReader::open(path)?)
    }
}

#[async_trait(?Send)]
impl AssetDecoder for WavFileDecoder {
    async fn decode(&self, url: &str) -> Result<DecodedAudio, AssetError> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        Self::read(path).map_err(|err| AssetError::new(url, err.to_string()))
    }
}

type PendingDecode = Shared<LocalBoxFuture<'static, Result<Arc<DecodedAudio>, AssetError>>>;

#[derive(Clone)]
enum CacheEntry {
    Ready(Arc<DecodedAudio>),
    Pending(PendingDecode),
}

/// Decode-once cache keyed by URL.
///
/// Concurrent requests for a URL that is still decoding await the same
/// pending operation. Failed decodes are evicted so a later request retries.
#[derive(Clone)]
pub struct AssetCache {
    decoder: Rc<dyn AssetDecoder>,
    entries: Rc<RefCell<HashMap<String, CacheEntry>>>,
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCache")
            .field("entries", &self.entries.borrow().len())
            .finish()
    }
}

impl AssetCache {
    pub fn new(decoder: Rc<dyn AssetDecoder>) -> Self {
        Self {
            decoder,
            entries: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Already decoded audio for `url`, without starting a decode.
    pub fn cached(&self, url: &str) -> Option<Arc<DecodedAudio>> {
        match self.entries.borrow().get(url) {
            Some(CacheEntry::Ready(audio)) => Some(audio.clone()),
            _ => None,
        }
    }

    pub async fn get(&self, url: &str) -> Result<Arc<DecodedAudio>, AssetError> {
        if url.is_empty() {
            return Err(AssetError::new(url, "clip has no asset url"));
        }
        let pending = {
            let mut entries = self.entries.borrow_mut();
            match entries.get(url) {
                Some(CacheEntry::Ready(audio)) => return Ok(audio.clone()),
                Some(CacheEntry::Pending(pending)) => pending.clone(),
                None => {
                    let decoder = self.decoder.clone();
                    let owned = url.to_string();
                    let pending = async move { decoder.decode(&owned).await.map(Arc::new) }
                        .boxed_local()
                        .shared();
                    entries.insert(url.to_string(), CacheEntry::Pending(pending.clone()));
                    tracing::debug!(url, "decoding asset");
                    pending
                }
            }
        };

        let result = pending.clone().await;
        let mut entries = self.entries.borrow_mut();
        let is_ours =
            matches!(entries.get(url), Some(CacheEntry::Pending(p)) if p.ptr_eq(&pending));
        match &result {
            Ok(audio) if is_ours => {
                entries.insert(url.to_string(), CacheEntry::Ready(audio.clone()));
            }
            Err(err) if is_ours => {
                tracing::warn!(url, reason = %err.reason, "asset decode failed");
                entries.remove(url);
            }
            _ => {}
        }
        result
    }

    /// Warms the cache, swallowing failures.
    pub async fn prefetch(&self, url: &str) -> bool {
        self.get(url).await.is_ok()
    }
}

/// Max-abs peaks of channel 0 over `bins` equal slices, normalized so the
/// loudest bin is 1.
pub fn compute_peaks(audio: &DecodedAudio, bins: usize) -> Arc<[f32]> {
    let bins = bins.max(1);
    let Some(data) = audio.channel(0).filter(|d| !d.is_empty()) else {
        return Arc::from(vec![0.0_f32; bins]);
    };
    let step = data.len().div_ceil(bins).max(1);
    let mut peaks: Vec<f32> = (0..bins)
        .map(|bin| {
            let start = (bin * step).min(data.len());
            let end = (start + step).min(data.len());
            data[start..end].iter().fold(0.0_f32, |acc, &s| acc.max(s.abs()))
        })
        .collect();
    let loudest = peaks.iter().copied().fold(0.0_f32, f32::max).max(1e-9);
    for peak in &mut peaks {
        *peak /= loudest;
    }
    Arc::from(peaks)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;

    use super::*;

    /// In-memory decoder that counts decode calls.
    #[derive(Default)]
    pub struct MemoryDecoder {
        pub assets: RefCell<HashMap<String, DecodedAudio>>,
        pub calls: Cell<usize>,
    }

    impl MemoryDecoder {
        pub fn with(url: &str, audio: DecodedAudio) -> Self {
            let decoder = Self::default();
            decoder.insert(url, audio);
            decoder
        }

        pub fn insert(&self, url: &str, audio: DecodedAudio) {
            self.assets.borrow_mut().insert(url.to_string(), audio);
        }
    }

    #[async_trait(?Send)]
    impl AssetDecoder for MemoryDecoder {
        async fn decode(&self, url: &str) -> Result<DecodedAudio, AssetError> {
            self.calls.set(self.calls.get() + 1);
            self.assets
                .borrow()
                .get(url)
                .cloned()
                .ok_or_else(|| AssetError::new(url, "not found"))
        }
    }

    pub fn constant(sample_rate: u32, seconds: f64, value: f32) -> DecodedAudio {
        let frames = (seconds * sample_rate as f64).round() as usize;
        DecodedAudio::new(sample_rate, vec![vec![value; frames]])
    }

    /// Short decaying bursts at the given times over a quiet floor.
    pub fn bursts(sample_rate: u32, seconds: f64, at: &[f64]) -> DecodedAudio {
        let frames = (seconds * sample_rate as f64) as usize;
        let mut data = vec![0.0_f32; frames];
        for &t in at {
            let start = (t * sample_rate as f64) as usize;
            for k in 0..(sample_rate as usize * 3 / 20) {
                if let Some(sample) = data.get_mut(start + k) {
                    let decay = (-(k as f32) / (sample_rate as f32 * 0.04)).exp();
                    *sample = if k % 2 == 0 { decay } else { -decay };
                }
            }
        }
        DecodedAudio::new(sample_rate, vec![data])
    }
}

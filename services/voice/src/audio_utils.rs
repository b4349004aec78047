use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Opus on the audio line always runs at 48 kHz.
pub const OPUS_SAMPLE_RATE: u32 = 48_000;
/// 20 ms of mono audio at [`OPUS_SAMPLE_RATE`].
pub const OPUS_FRAME_SAMPLES: usize = 960;
/// Largest frame an Opus packet can decode to (120 ms at 48 kHz).
pub const OPUS_MAX_FRAME_SAMPLES: usize = 5760;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,                     // No cutoff frequency, pass all frequencies
        PolynomialDegree::Cubic, // Cubic interpolation for quality
        chunk_size,
        1, // 1 channel (mono)
    )?;
    Ok(resampler)
}

/// Averages interleaved frames down to one channel.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Streams mono audio from one rate to another, buffering input until the
/// resampler has a full chunk. Passes audio through when the rates match.
pub struct StreamResampler {
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(in_rate: u32, out_rate: u32, chunk_size: usize) -> anyhow::Result<Self> {
        let resampler = if in_rate == out_rate {
            None
        } else {
            Some(create_resampler(in_rate as f64, out_rate as f64, chunk_size)?)
        };
        Ok(Self {
            resampler,
            pending: Vec::new(),
        })
    }

    /// Feeds samples in and returns whatever output is ready.
    pub fn process(&mut self, samples: &[f32]) -> anyhow::Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(samples.to_vec());
        };
        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let mut channels = resampler.process(&[chunk], None)?;
            if let Some(mono) = channels.pop() {
                out.extend(mono);
            }
        }
        Ok(out)
    }
}

/// Cuts a continuous sample stream into fixed-size frames.
#[derive(Debug)]
pub struct Framer {
    frame_len: usize,
    buffer: Vec<f32>,
}

impl Framer {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            buffer: Vec::with_capacity(frame_len * 2),
        }
    }

    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend_from_slice(samples);
        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_len {
            frames.push(self.buffer.drain(..self.frame_len).collect());
        }
        frames
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

//! Microphone capture and speaker playback on the default devices.
//!
//! cpal streams are not `Send`, so each stream lives on its own thread and
//! is dropped when that thread receives its shutdown signal.

use crate::audio_utils::downmix_to_mono;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use cpal::{
    FromSample, Sample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use ringbuf::{
    HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
    mpsc as std_mpsc,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use wanda_core::{
    audio::AnalyserTap,
    transport::{AudioChunk, AudioConstraints, MediaDevices, MicrophoneStream},
};

/// How much decoded agent audio may queue up before new audio is dropped.
const PLAYBACK_BUFFER_SECONDS: usize = 2;

pub struct CpalMediaDevices;

#[async_trait]
impl MediaDevices for CpalMediaDevices {
    async fn open_microphone(
        &self,
        constraints: AudioConstraints,
        tap: AnalyserTap,
    ) -> Result<Box<dyn MicrophoneStream>> {
        // Echo cancellation and friends are whatever the platform applies.
        debug!(?constraints, "opening default input device");

        let enabled = Arc::new(AtomicBool::new(true));
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread_enabled = enabled.clone();
        std::thread::Builder::new()
            .name("microphone".into())
            .spawn(move || {
                let stream = match open_input(thread_enabled, tap, frames_tx) {
                    Ok((stream, sample_rate)) => {
                        let _ = ready_tx.send(Ok(sample_rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns once the handle is stopped or dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("microphone stream released");
            })
            .context("failed to spawn microphone thread")?;

        let sample_rate = ready_rx
            .await
            .map_err(|_| anyhow!("microphone thread exited during setup"))??;
        info!(sample_rate, "microphone open");

        Ok(Box::new(CpalMicrophone {
            enabled,
            frames: Some(frames_rx),
            shutdown: Some(shutdown_tx),
        }))
    }
}

fn open_input(
    enabled: Arc<AtomicBool>,
    tap: AnalyserTap,
    frames: mpsc::UnboundedSender<AudioChunk>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("no default input device"))?;
    let supported = device
        .default_input_config()
        .context("failed to query the input device configuration")?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;

    let on_samples = move |interleaved: &[f32]| {
        let mut mono = downmix_to_mono(interleaved, channels);
        if !enabled.load(Ordering::Relaxed) {
            mono.fill(0.0);
        }
        tap.push_f32(&mono);
        let _ = frames.send(AudioChunk {
            samples: mono,
            sample_rate,
        });
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => input_stream::<f32>(&device, &config, on_samples)?,
        cpal::SampleFormat::I16 => input_stream::<i16>(&device, &config, on_samples)?,
        cpal::SampleFormat::U16 => input_stream::<u16>(&device, &config, on_samples)?,
        other => bail!("unsupported microphone sample format {other:?}"),
    };
    stream.play().context("failed to start microphone stream")?;
    Ok((stream, sample_rate))
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut on_samples: impl FnMut(&[f32]) + Send + 'static,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch = Vec::new();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            scratch.clear();
            scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
            on_samples(&scratch);
        },
        |err| error!("Audio capture error: {}", err),
        None,
    )?;
    Ok(stream)
}

pub struct CpalMicrophone {
    enabled: Arc<AtomicBool>,
    frames: Option<mpsc::UnboundedReceiver<AudioChunk>>,
    shutdown: Option<std_mpsc::Sender<()>>,
}

impl MicrophoneStream for CpalMicrophone {
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn take_frames(&mut self) -> Option<mpsc::UnboundedReceiver<AudioChunk>> {
        self.frames.take()
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            // The thread may already be gone if the device disappeared.
            let _ = shutdown.send(());
            info!("microphone stopped");
        }
        Ok(())
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Write side of the speaker's sample queue.
#[derive(Clone)]
pub struct PlaybackQueue {
    producer: Arc<Mutex<HeapProd<f32>>>,
    sample_rate: u32,
}

impl PlaybackQueue {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Queues mono samples. Samples that do not fit are dropped.
    pub fn push(&self, samples: &[f32]) {
        let mut producer = self.producer.lock().unwrap_or_else(|e| e.into_inner());
        let written = producer.push_slice(samples);
        if written < samples.len() {
            warn!(dropped = samples.len() - written, "playback queue full");
        }
    }
}

/// The default output device, playing whatever is pushed to its queue.
pub struct Speaker {
    queue: PlaybackQueue,
    shutdown: Option<std_mpsc::Sender<()>>,
}

impl Speaker {
    pub async fn open() -> Result<Self> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("speaker".into())
            .spawn(move || {
                let stream = match open_output() {
                    Ok((stream, queue)) => {
                        let _ = ready_tx.send(Ok(queue));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("speaker stream released");
            })
            .context("failed to spawn speaker thread")?;

        let queue = ready_rx
            .await
            .map_err(|_| anyhow!("speaker thread exited during setup"))??;
        info!(sample_rate = queue.sample_rate, "speaker open");
        Ok(Self {
            queue,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn queue(&self) -> PlaybackQueue {
        self.queue.clone()
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn open_output() -> Result<(cpal::Stream, PlaybackQueue)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no default output device"))?;
    let supported = device
        .default_output_config()
        .context("failed to query the output device configuration")?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;

    let ring = HeapRb::<f32>::new(sample_rate as usize * PLAYBACK_BUFFER_SECONDS);
    let (producer, consumer) = ring.split();
    let next_sample = {
        let mut consumer = consumer;
        move || consumer.try_pop().unwrap_or(0.0)
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => output_stream::<f32>(&device, &config, next_sample)?,
        cpal::SampleFormat::I16 => output_stream::<i16>(&device, &config, next_sample)?,
        cpal::SampleFormat::U16 => output_stream::<u16>(&device, &config, next_sample)?,
        other => bail!("unsupported speaker sample format {other:?}"),
    };
    stream.play().context("failed to start speaker stream")?;

    let queue = PlaybackQueue {
        producer: Arc::new(Mutex::new(producer)),
        sample_rate,
    };
    Ok((stream, queue))
}

fn output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut next_sample: impl FnMut() -> f32 + Send + 'static,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            // Mono source, copied to every channel.
            for frame in data.chunks_mut(channels) {
                let sample = T::from_sample(next_sample());
                frame.fill(sample);
            }
        },
        |err| error!("Audio playback error: {}", err),
        None,
    )?;
    Ok(stream)
}

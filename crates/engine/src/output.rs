use audition_stream::ReadAheadConfig;
use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};

use crate::{Transport, TransportProcessor};

/// Frames converted per inner pass of the output callback.
const CALLBACK_CHUNK_FRAMES: usize = 2048;

/// Keeps the output stream alive; dropping it closes the device.
pub struct AudioEngineHandle {
    pub sample_rate: u32,
    pub channels: u16,
    _stream: cpal::Stream,
}

/// Open the default output device and drive a new transport from its callback.
pub fn start(config: ReadAheadConfig) -> anyhow::Result<(Transport, AudioEngineHandle)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device found"))?;

    let supported = device.default_output_config()?;
    let sample_rate = supported.sample_rate().0;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();
    let channels = stream_config.channels;

    let (transport, processor) = Transport::new(sample_rate, config);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, processor)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, processor)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, processor)?,
        sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
    };

    stream.play()?;
    log::info!("audio output started: {sample_rate} Hz, {channels} ch, {sample_format}");

    Ok((
        transport,
        AudioEngineHandle {
            sample_rate,
            channels,
            _stream: stream,
        },
    ))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut processor: TransportProcessor,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let output_channels = config.channels as usize;
    let mut buffer = vec![0.0f32; CALLBACK_CHUNK_FRAMES * output_channels];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for chunk in data.chunks_mut(buffer.len()) {
                let block = &mut buffer[..chunk.len()];
                processor.process(block, output_channels);
                for (sample, &value) in chunk.iter_mut().zip(block.iter()) {
                    *sample = T::from_sample(value);
                }
            }
        },
        |err| log::error!("stream error: {err}"),
        None,
    )?;

    Ok(stream)
}

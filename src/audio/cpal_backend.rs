use crate::audio::AudioBackend;
use crate::runtime::NativeSynth;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use std::error::Error;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Pulls rendered blocks from the synth into a cpal output stream.
pub struct CpalBackend {
    device: cpal::Device,
    config: cpal::StreamConfig,
    stream: Option<Stream>,
    synth: Option<Arc<Mutex<NativeSynth>>>,
}

impl CpalBackend {
    /// Picks the output device and its stream format. The synth is attached
    /// later so it can be opened at the device's sample rate.
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let host = cpal::default_host();
        let device = Self::select_output_device(&host)?;
        info!(device = %device.name().unwrap_or_default(), "selected output device");

        let supported = device.default_output_config()?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(format!("unsupported sample format {:?}", supported.sample_format()).into());
        }
        let mut config: cpal::StreamConfig = supported.into();
        config.buffer_size = cpal::BufferSize::Fixed(256);
        Ok(Self {
            device,
            config,
            stream: None,
            synth: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn attach(&mut self, synth: Arc<Mutex<NativeSynth>>) {
        self.synth = Some(synth);
    }

    fn select_output_device(host: &cpal::Host) -> Result<cpal::Device, Box<dyn Error>> {
        if cfg!(target_os = "linux") {
            Self::select_linux_output_device(host)
        } else {
            host.default_output_device()
                .ok_or_else(|| "No output device available".into())
        }
    }

    fn select_linux_output_device(host: &cpal::Host) -> Result<cpal::Device, Box<dyn Error>> {
        let device_names: Vec<String> = host
            .devices()?
            .filter_map(|d| d.name().ok())
            .filter(|name| {
                let lower = name.to_lowercase();
                lower.starts_with("default:") || lower.contains("pipewire")
            })
            .collect();

        if device_names.is_empty() {
            return host
                .default_output_device()
                .ok_or_else(|| "No output device available".into());
        }

        println!("Available output devices:");
        for (i, name) in device_names.iter().enumerate() {
            println!("{}. {}", i + 1, name);
        }

        println!("Select device (default 1): ");
        let mut choice = String::new();
        std::io::stdin().read_line(&mut choice)?;
        let choice = choice
            .trim()
            .parse::<usize>()
            .unwrap_or(1)
            .saturating_sub(1);

        let selected_name = device_names.get(choice).ok_or("Invalid device selection")?;

        host.devices()?
            .find(|d| d.name().map(|n| n == *selected_name).unwrap_or(false))
            .ok_or_else(|| "Selected output device not found".into())
    }

    fn build_stream(&self) -> Result<Stream, Box<dyn Error>> {
        let synth = self.synth.clone().ok_or("no synth attached")?;
        let channels = self.config.channels as usize;
        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match synth.lock() {
                Ok(mut synth) => synth.process(data, channels),
                Err(_) => data.fill(0.0),
            },
            |err| error!(%err, "stream error"),
            None,
        )?;
        Ok(stream)
    }
}

impl AudioBackend for CpalBackend {
    fn start(&mut self) -> Result<(), Box<dyn Error>> {
        let stream = self.build_stream()?;
        stream.play()?;
        info!(
            sample_rate = self.sample_rate(),
            channels = self.config.channels,
            "audio stream started"
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                warn!(%err, "failed to pause stream");
            }
        }
    }
}

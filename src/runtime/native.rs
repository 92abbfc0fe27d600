use crate::audio::{AudioBackend, CpalBackend};
use crate::input::MidiHandler;
use crate::synth::{Synth, SynthConfig};
use clap::Parser;
use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Plays an MT-32 from a MIDI input port.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct HostOptions {
    /// Control ROM image (64 KiB).
    #[arg(long)]
    pub control_rom: PathBuf,
    /// PCM ROM image.
    #[arg(long)]
    pub pcm_rom: PathBuf,
    /// JSON synth configuration.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// MIDI input port index; asked interactively when omitted.
    #[arg(long)]
    pub midi_port: Option<usize>,
}

/// Native runtime synth: drains MIDI before every block.
pub struct NativeSynth {
    synth: Synth,
    midi_receiver: Receiver<u32>,
    buffer: Vec<f32>,
}

impl NativeSynth {
    pub fn new(synth: Synth, midi_receiver: Receiver<u32>) -> Self {
        Self {
            synth,
            midi_receiver,
            buffer: Vec::new(),
        }
    }

    /// Fills an interleaved device buffer with `channels` channels.
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        self.process_midi_events();
        let channels = channels.max(1);
        let frames = output.len() / channels;
        if self.buffer.len() < frames * 2 {
            self.buffer.resize(frames * 2, 0.0);
        }
        let stereo = &mut self.buffer[..frames * 2];
        self.synth.render_f32(stereo);

        for (frame, lr) in output.chunks_mut(channels).zip(stereo.chunks_exact(2)) {
            match frame {
                [mono] => *mono = (lr[0] + lr[1]) * 0.5,
                [left, right, rest @ ..] => {
                    *left = lr[0];
                    *right = lr[1];
                    rest.fill(0.0);
                }
                [] => {}
            }
        }
    }

    fn process_midi_events(&mut self) {
        while let Ok(msg) = self.midi_receiver.try_recv() {
            self.synth.play_msg(msg);
        }
    }

    pub fn synth(&self) -> &Synth {
        &self.synth
    }
}

pub fn run(options: HostOptions) -> Result<(), Box<dyn Error>> {
    let mut config = match &options.config {
        Some(path) => SynthConfig::load(path)?,
        None => SynthConfig::default(),
    };

    let mut audio_backend = CpalBackend::new()?;
    if audio_backend.sample_rate() != config.sample_rate {
        info!(
            configured = config.sample_rate,
            device = audio_backend.sample_rate(),
            "using the device sample rate"
        );
        config.sample_rate = audio_backend.sample_rate();
    }

    let control = BufReader::new(File::open(&options.control_rom)?);
    let pcm = BufReader::new(File::open(&options.pcm_rom)?);
    let synth = Synth::from_roms(config, control, pcm)?;

    let (midi_tx, midi_rx) = channel();
    let synth = Arc::new(Mutex::new(NativeSynth::new(synth, midi_rx)));
    audio_backend.attach(synth);
    audio_backend.start()?;

    let midi_handler = MidiHandler::new(midi_tx, options.midi_port);
    if !midi_handler.is_connected() {
        info!("running without MIDI input");
    }

    println!("Press Enter to quit.");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    audio_backend.stop();
    Ok(())
}

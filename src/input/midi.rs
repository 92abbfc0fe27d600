use crate::synth::event::pack_short_message;
use midir::{MidiInput, MidiInputConnection, MidiInputPort};
use std::error::Error;
use std::io::{stdin, stdout, Write};
use std::sync::mpsc::Sender;
use tracing::{info, warn};

/// Forwards raw short messages from a MIDI input port to the render thread.
pub struct MidiHandler {
    /// Holds the connection to keep it alive
    #[allow(dead_code)]
    connection: Option<MidiInputConnection<()>>,
}

impl MidiHandler {
    /// Connects to `port`, or asks on stdin when it is `None`. MIDI stays
    /// disabled if no port can be opened.
    pub fn new(sender: Sender<u32>, port: Option<usize>) -> Self {
        match Self::try_new(sender, port) {
            Ok(handler) => handler,
            Err(err) => {
                warn!(%err, "failed to initialize MIDI, input disabled");
                Self { connection: None }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn try_new(sender: Sender<u32>, port: Option<usize>) -> Result<Self, Box<dyn Error>> {
        let midi_in = MidiInput::new("mt32synth input")?;
        let port = Self::select_input_port(&midi_in, port)?;
        let port_name = midi_in.port_name(&port)?;

        let connection = midi_in.connect(
            &port,
            "mt32synth-read-input",
            move |_, message, _| {
                // SysEx and other long messages are not forwarded.
                if message.len() > 3 {
                    return;
                }
                if let Some(msg) = pack_short_message(message) {
                    let _ = sender.send(msg);
                }
            },
            (),
        )?;

        info!(port = %port_name, "opened MIDI port");
        Ok(Self {
            connection: Some(connection),
        })
    }

    fn select_input_port(
        midi_in: &MidiInput,
        preset: Option<usize>,
    ) -> Result<MidiInputPort, Box<dyn Error>> {
        let in_ports = midi_in.ports();
        if in_ports.is_empty() {
            return Err("No MIDI input ports found".into());
        }

        let selection = match preset {
            Some(selection) => selection,
            None => {
                println!("Available MIDI input ports:");
                for (i, port) in in_ports.iter().enumerate() {
                    println!("{}: {}", i, midi_in.port_name(port)?);
                }
                print!("Select MIDI input port: ");
                stdout().flush()?;
                let mut input = String::new();
                stdin().read_line(&mut input)?;
                input.trim().parse::<usize>().unwrap_or(0)
            }
        };

        let port = in_ports
            .get(selection)
            .ok_or("Invalid MIDI port selection")?
            .clone();
        Ok(port)
    }
}

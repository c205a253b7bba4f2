use crate::error::{PlayerError, Result};
use crate::hardware::sink::{OutputSink, PortInfo, PortType};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

/// DIN MIDI line rate
pub const MIDI_BAUD_RATE: u32 = 31_250;

/// Raw MIDI over a serial port
///
/// Works with opto-isolated DIN MIDI interfaces at 31250 baud and with
/// USB-serial bridges running at a higher rate (115200 is common).
pub struct SerialMidiSink {
    /// Interface name (serial port path)
    name: String,
    /// Serial port handle
    port: tokio_serial::SerialStream,
}

impl SerialMidiSink {
    /// Open the serial port at `baud_rate`
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        info!("Opening serial MIDI output {} at {} baud", port_name, baud_rate);
        let port = tokio_serial::new(port_name, baud_rate)
            .open_native_async()
            .map_err(|e| PlayerError::Sink(format!("Failed to open serial port {}: {}", port_name, e)))?;

        Ok(Self {
            name: port_name.to_string(),
            port,
        })
    }
}

#[async_trait]
impl OutputSink for SerialMidiSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, message: &[u8]) -> Result<()> {
        self.port
            .write_all(message)
            .await
            .map_err(|e| PlayerError::Sink(format!("Write to {} failed: {}", self.name, e)))?;
        self.port
            .flush()
            .await
            .map_err(|e| PlayerError::Sink(format!("Flush of {} failed: {}", self.name, e)))?;
        Ok(())
    }
}

/// List serial ports that might be MIDI interfaces
pub fn list_serial_ports() -> Vec<PortInfo> {
    let ports = tokio_serial::available_ports().unwrap_or_default();
    debug!("Found {} serial ports", ports.len());

    ports
        .into_iter()
        .map(|p| PortInfo {
            description: Some(format!("Serial port: {}", p.port_name)),
            name: p.port_name,
            port_type: PortType::Serial,
        })
        .collect()
}

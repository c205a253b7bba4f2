use crate::core::event::{silence_messages, MIDI_CHANNELS};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sink shared between the controller and the playback worker
pub type SharedSink = Arc<Mutex<Box<dyn OutputSink>>>;

/// Wrap a sink for sharing with a playback worker
pub fn shared<S: OutputSink + 'static>(sink: S) -> SharedSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// Trait for instrument outputs
///
/// Implementations:
/// - Serial MIDI (DIN MIDI at 31250 baud, or a USB-serial bridge)
/// - Null output that only logs
/// - Mock output for testing
#[async_trait]
pub trait OutputSink: Send {
    /// Get the name/identifier of this output
    fn name(&self) -> &str;

    /// Send one message to the instrument
    async fn send(&mut self, message: &[u8]) -> Result<()>;

    /// Silence every sounding or sustained note on all channels
    async fn reset(&mut self) -> Result<()> {
        for channel in 0..MIDI_CHANNELS {
            for message in silence_messages(channel) {
                self.send(&message).await?;
            }
        }
        Ok(())
    }
}

/// Information about an available output port
#[derive(Debug, Clone, PartialEq)]
pub struct PortInfo {
    /// Port name/identifier
    pub name: String,
    /// Port type
    pub port_type: PortType,
    /// Description
    pub description: Option<String>,
}

/// Type of output port
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PortType {
    /// Serial port (DIN MIDI interface or USB-serial bridge)
    Serial,
    /// Virtual port that discards output
    Virtual,
}

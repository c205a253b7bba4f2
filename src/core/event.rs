use serde::{Deserialize, Serialize};

/// Number of MIDI channels an instrument can listen on
pub const MIDI_CHANNELS: u8 = 16;

/// What a performance event carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// Channel voice/mode message (note on/off, control change, ...)
    Channel(Vec<u8>),
    /// System exclusive message, forwarded verbatim (F0 .. F7)
    SysEx(Vec<u8>),
    /// Tempo change in microseconds per quarter note
    Tempo(u32),
    /// Marker or other text annotation
    Marker(String),
    /// End of a source track
    EndOfTrack,
    /// Any other meta information that only matters to the file
    OtherMeta,
}

/// One timed instruction of a recorded performance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEvent {
    /// Seconds since the previous event
    pub delta_time: f64,

    /// Payload
    pub kind: EventKind,
}

impl PerformanceEvent {
    pub fn new(delta_time: f64, kind: EventKind) -> Self {
        Self {
            delta_time: delta_time.max(0.0),
            kind,
        }
    }

    /// Convenience constructor for a channel message from raw bytes
    pub fn channel(delta_time: f64, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(delta_time, EventKind::Channel(bytes.into()))
    }

    /// Note on, `channel` is 0-based
    pub fn note_on(delta_time: f64, channel: u8, key: u8, velocity: u8) -> Self {
        Self::channel(delta_time, vec![0x90 | (channel & 0x0F), key & 0x7F, velocity & 0x7F])
    }

    /// Note off, `channel` is 0-based
    pub fn note_off(delta_time: f64, channel: u8, key: u8) -> Self {
        Self::channel(delta_time, vec![0x80 | (channel & 0x0F), key & 0x7F, 0])
    }

    /// Tempo/marker events affect timing only and never reach the instrument
    pub fn is_meta(&self) -> bool {
        !matches!(self.kind, EventKind::Channel(_) | EventKind::SysEx(_))
    }

    /// Bytes to put on the wire, `None` for meta events
    pub fn wire_bytes(&self) -> Option<&[u8]> {
        match &self.kind {
            EventKind::Channel(bytes) | EventKind::SysEx(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Get wire bytes as hex string
    pub fn hex_data(&self) -> String {
        self.wire_bytes()
            .unwrap_or_default()
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Messages that silence one channel: sustain pedal up, all sound off, all notes off
pub fn silence_messages(channel: u8) -> [[u8; 3]; 3] {
    let status = 0xB0 | (channel & 0x0F);
    [[status, 64, 0], [status, 120, 0], [status, 123, 0]]
}

/// Parse hex string (`"90 3C 40"`, `"903C40"` or `"0x903C40"`) to bytes
pub fn parse_hex(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.replace(' ', "");
    let hex = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")).unwrap_or(&hex);

    if hex.len() % 2 != 0 {
        return None;
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

use crate::core::{EventKind, PerformanceEvent, Song};
use crate::error::{PlayerError, Result};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::path::Path;
use tracing::debug;

/// Microseconds per quarter note until the first tempo event (120 BPM)
const DEFAULT_TEMPO: u32 = 500_000;

/// Load a Standard MIDI File from disk
pub fn load_midi<P: AsRef<Path>>(path: P) -> Result<Song> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let events = parse_midi(&data)?;
    debug!("Loaded {} events from {}", events.len(), path.display());
    Ok(Song::new(path, events))
}

/// Parse SMF bytes into a single, time-ordered event sequence
///
/// All tracks are merged by absolute tick. Deltas are converted to seconds
/// with the tempo in force at each point, so tempo changes only affect the
/// events that follow them.
pub fn parse_midi(data: &[u8]) -> Result<Vec<PerformanceEvent>> {
    let smf = Smf::parse(data).map_err(|e| PlayerError::Parse(format!("Invalid MIDI file: {}", e)))?;

    // (absolute tick, track, position in track, payload)
    let mut merged: Vec<(u64, usize, usize, EventKind)> = Vec::new();
    for (track_idx, track) in smf.tracks.iter().enumerate() {
        let mut tick: u64 = 0;
        for (pos, event) in track.iter().enumerate() {
            tick += u64::from(event.delta.as_int());
            merged.push((tick, track_idx, pos, convert_kind(&event.kind)));
        }
    }
    merged.sort_by_key(|(tick, track, pos, _)| (*tick, *track, *pos));

    let mut tempo = DEFAULT_TEMPO;
    let mut last_tick = 0u64;
    let mut events = Vec::with_capacity(merged.len());

    for (tick, _, _, kind) in merged {
        let delta_ticks = tick - last_tick;
        last_tick = tick;

        let delta_time = delta_ticks as f64 * seconds_per_tick(smf.header.timing, tempo);
        if let EventKind::Tempo(micros) = kind {
            if micros > 0 {
                tempo = micros;
            }
        }
        events.push(PerformanceEvent::new(delta_time, kind));
    }

    Ok(events)
}

fn seconds_per_tick(timing: Timing, tempo: u32) -> f64 {
    match timing {
        Timing::Metrical(ppq) => {
            let ppq = ppq.as_int().max(1) as f64;
            tempo as f64 / 1_000_000.0 / ppq
        }
        Timing::Timecode(fps, subframes) => {
            1.0 / (fps.as_f32() as f64 * subframes.max(1) as f64)
        }
    }
}

fn convert_kind(kind: &TrackEventKind) -> EventKind {
    match kind {
        TrackEventKind::Midi { channel, message } => {
            EventKind::Channel(encode_channel_message(channel.as_int(), message))
        }
        TrackEventKind::SysEx(data) => {
            let mut bytes = Vec::with_capacity(data.len() + 1);
            bytes.push(0xF0);
            bytes.extend_from_slice(data);
            EventKind::SysEx(bytes)
        }
        TrackEventKind::Escape(data) => EventKind::SysEx(data.to_vec()),
        TrackEventKind::Meta(meta) => match meta {
            MetaMessage::Tempo(micros) => EventKind::Tempo(micros.as_int()),
            MetaMessage::Marker(text) | MetaMessage::CuePoint(text) => {
                EventKind::Marker(String::from_utf8_lossy(text).to_string())
            }
            MetaMessage::EndOfTrack => EventKind::EndOfTrack,
            _ => EventKind::OtherMeta,
        },
    }
}

fn encode_channel_message(channel: u8, message: &MidiMessage) -> Vec<u8> {
    let ch = channel & 0x0F;
    match *message {
        MidiMessage::NoteOff { key, vel } => vec![0x80 | ch, key.as_int(), vel.as_int()],
        MidiMessage::NoteOn { key, vel } => vec![0x90 | ch, key.as_int(), vel.as_int()],
        MidiMessage::Aftertouch { key, vel } => vec![0xA0 | ch, key.as_int(), vel.as_int()],
        MidiMessage::Controller { controller, value } => {
            vec![0xB0 | ch, controller.as_int(), value.as_int()]
        }
        MidiMessage::ProgramChange { program } => vec![0xC0 | ch, program.as_int()],
        MidiMessage::ChannelAftertouch { vel } => vec![0xD0 | ch, vel.as_int()],
        MidiMessage::PitchBend { bend } => {
            let raw = bend.0.as_int();
            vec![0xE0 | ch, (raw & 0x7F) as u8, ((raw >> 7) & 0x7F) as u8]
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Write a variable-length quantity
    fn vlq(mut value: u32, out: &mut Vec<u8>) {
        let mut stack = vec![(value & 0x7F) as u8];
        value >>= 7;
        while value > 0 {
            stack.push(((value & 0x7F) as u8) | 0x80);
            value >>= 7;
        }
        out.extend(stack.iter().rev());
    }

    /// Build a format-0 file with 480 ticks per quarter from (delta, bytes) pairs
    pub(crate) fn build_smf(events: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let mut track = Vec::new();
        for (delta, bytes) in events {
            vlq(*delta, &mut track);
            track.extend_from_slice(bytes);
        }
        vlq(0, &mut track);
        track.extend_from_slice(&[0xFF, 0x2F, 0x00]);

        let mut smf = Vec::new();
        smf.extend_from_slice(b"MThd");
        smf.extend_from_slice(&6u32.to_be_bytes());
        smf.extend_from_slice(&0u16.to_be_bytes());
        smf.extend_from_slice(&1u16.to_be_bytes());
        smf.extend_from_slice(&480u16.to_be_bytes());
        smf.extend_from_slice(b"MTrk");
        smf.extend_from_slice(&(track.len() as u32).to_be_bytes());
        smf.extend_from_slice(&track);
        smf
    }

    #[test]
    fn test_parse_tempo_change_affects_following_deltas() {
        let data = build_smf(&[
            (0, vec![0x90, 60, 100]),
            // one quarter at 120 BPM = 0.5s
            (480, vec![0x80, 60, 0]),
            // switch to 60 BPM (1_000_000 us/quarter)
            (0, vec![0xFF, 0x51, 0x03, 0x0F, 0x42, 0x40]),
            // one quarter at 60 BPM = 1.0s
            (480, vec![0x90, 62, 90]),
        ]);

        let events = parse_midi(&data).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].kind, EventKind::Channel(vec![0x90, 60, 100]));
        assert!((events[1].delta_time - 0.5).abs() < 1e-9);
        assert_eq!(events[2].kind, EventKind::Tempo(1_000_000));
        assert!(events[2].is_meta());
        assert!((events[3].delta_time - 1.0).abs() < 1e-9);
        assert_eq!(events[4].kind, EventKind::EndOfTrack);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_midi(b"not a midi file").unwrap_err();
        assert!(matches!(err, PlayerError::Parse(_)));
    }

    #[test]
    fn test_pitch_bend_encoding() {
        let data = build_smf(&[(0, vec![0xE1, 0x00, 0x40])]);
        let events = parse_midi(&data).unwrap();
        assert_eq!(events[0].kind, EventKind::Channel(vec![0xE1, 0x00, 0x40]));
    }
}

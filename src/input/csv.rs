use crate::core::event::parse_hex;
use crate::core::{EventKind, PerformanceEvent, Song};
use crate::error::{PlayerError, Result};
use std::path::Path;
use tracing::debug;

/// Load a performance from a CSV event list
///
/// Supports flexible column names:
/// - time,data
/// - timestamp,bytes
/// - t,hex,tempo
///
/// Times are absolute seconds from the start of the performance. A row with
/// a non-empty `tempo` column (microseconds per quarter) is a tempo event and
/// its data column may be empty.
pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Song> {
    let path = path.as_ref();
    let rdr = csv::Reader::from_path(path)?;
    let events = read_events(rdr)?;
    debug!("CSV loaded: {} events from {}", events.len(), path.display());
    Ok(Song::new(path, events))
}

/// Parse a CSV event list from memory
pub fn parse_csv(data: &[u8]) -> Result<Vec<PerformanceEvent>> {
    read_events(csv::Reader::from_reader(data))
}

fn read_events<R: std::io::Read>(mut rdr: csv::Reader<R>) -> Result<Vec<PerformanceEvent>> {
    let headers = rdr.headers()?.clone();
    let time_idx = find_column(&headers, &["time", "timestamp", "t", "ts"])?;
    let data_idx = find_column(&headers, &["data", "payload", "hex", "bytes"])?;
    let tempo_idx = find_column(&headers, &["tempo"]).ok();

    let mut events = Vec::new();
    let mut last_time = 0.0;

    for (row, result) in rdr.records().enumerate() {
        let record = result?;

        let time = record
            .get(time_idx)
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|t| t.is_finite())
            .ok_or_else(|| PlayerError::Parse(format!("Row {}: invalid time", row + 1)))?;
        if time < last_time {
            return Err(PlayerError::Parse(format!(
                "Row {}: time {} is before previous event at {}",
                row + 1,
                time,
                last_time
            )));
        }

        let tempo = tempo_idx
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let kind = match tempo {
            Some(tempo) => {
                let micros = tempo
                    .parse::<u32>()
                    .map_err(|_| PlayerError::Parse(format!("Row {}: invalid tempo", row + 1)))?;
                EventKind::Tempo(micros)
            }
            None => {
                let hex = record.get(data_idx).unwrap_or("");
                let bytes = parse_hex(hex)
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| PlayerError::Parse(format!("Row {}: invalid data {:?}", row + 1, hex)))?;
                if bytes[0] == 0xF0 {
                    EventKind::SysEx(bytes)
                } else {
                    EventKind::Channel(bytes)
                }
            }
        };

        events.push(PerformanceEvent::new(time - last_time, kind));
        last_time = time;
    }

    Ok(events)
}

/// Find a column by checking possible names
fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Result<usize> {
    for (idx, header) in headers.iter().enumerate() {
        let header_lower = header.trim().to_lowercase();
        if names.iter().any(|&name| header_lower == name) {
            return Ok(idx);
        }
    }

    Err(PlayerError::Parse(format!("Could not find column with names: {:?}", names)))
}

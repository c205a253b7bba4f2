pub mod csv;
pub mod midi;

pub use self::csv::load_csv;
pub use midi::load_midi;

use crate::core::Song;
use crate::error::{PlayerError, Result};
use std::path::Path;

/// Input format detection result
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputFormat {
    Midi,
    Csv,
    Unknown,
}

/// Detect the format of an input file by checking the file header/magic
pub fn detect_format(data: &[u8]) -> InputFormat {
    if is_midi(data) {
        return InputFormat::Midi;
    }

    if is_csv(data) {
        return InputFormat::Csv;
    }

    InputFormat::Unknown
}

fn is_midi(data: &[u8]) -> bool {
    data.starts_with(b"MThd")
}

fn is_csv(data: &[u8]) -> bool {
    // Look for a header line with a comma in the first 500 bytes
    if data.len() < 4 {
        return false;
    }

    let head = &data[..data.len().min(500)];
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        // the cut may split a multi-byte character
        Err(e) if e.error_len().is_none() => match std::str::from_utf8(&head[..e.valid_up_to()]) {
            Ok(text) => text,
            Err(_) => return false,
        },
        Err(_) => return false,
    };
    text.lines().next().is_some_and(|line| line.contains(','))
}

/// Load a performance from a file, auto-detecting format
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Song> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;

    match detect_format(&data) {
        InputFormat::Midi => load_midi(path),
        InputFormat::Csv => load_csv(path),
        InputFormat::Unknown => Err(PlayerError::UnknownFormat(path.display().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(b"MThd\x00\x00\x00\x06"), InputFormat::Midi);
        assert_eq!(detect_format(b"time,data\n0.0,903C40\n"), InputFormat::Csv);
        assert_eq!(detect_format(&[0xFF, 0xFE, 0x00, 0x01, 0x02]), InputFormat::Unknown);
    }

    #[test]
    fn test_detect_csv_with_character_split_at_sniff_limit() {
        let mut text = String::from("time,data\n");
        while text.len() < 499 {
            text.push('#');
        }
        text.push('é');
        text.push('\n');
        assert_eq!(text.len(), 502);
        assert!(std::str::from_utf8(&text.as_bytes()[..500]).is_err());

        assert_eq!(detect_format(text.as_bytes()), InputFormat::Csv);
    }

    #[test]
    fn test_load_file_dispatches_on_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.dat");
        std::fs::write(&path, midi::tests::build_smf(&[(0, vec![0x90, 60, 1])])).unwrap();

        let song = load_file(&path).unwrap();
        assert_eq!(song.info.title, "song.dat");
        assert_eq!(song.playable_count(), 1);

        let bad = dir.path().join("bad.bin");
        std::fs::write(&bad, [0u8, 1, 2, 3, 4, 5]).unwrap();
        assert!(matches!(load_file(&bad), Err(PlayerError::UnknownFormat(_))));
    }
}

//! Songs found in a directory, with a current selection

use crate::core::{Song, SongInfo};
use crate::error::Result;
use crate::input::load_file;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SONG_EXTENSIONS: [&str; 3] = ["mid", "MID", "csv"];

pub struct Playlist {
    location: PathBuf,
    songs: Vec<Song>,
    current: Option<usize>,
}

impl Playlist {
    /// Load every song file in `dir`, sorted by file name
    ///
    /// Files that fail to load are skipped with a warning.
    pub fn scan<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut playlist = Self {
            location: dir.as_ref().to_path_buf(),
            songs: Vec::new(),
            current: None,
        };
        playlist.refresh()?;
        Ok(playlist)
    }

    /// Re-read the directory, keeping the selection by title if possible
    pub fn refresh(&mut self) -> Result<()> {
        let selected = self.current.and_then(|i| self.songs.get(i)).map(|s| s.info.title.clone());

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.location)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_song_file(path))
            .collect();
        paths.sort();

        self.songs = paths
            .into_iter()
            .filter_map(|path| match load_file(&path) {
                Ok(song) => Some(song),
                Err(e) => {
                    warn!("Skipping unreadable song {}: {}", path.display(), e);
                    None
                }
            })
            .collect();
        info!("Found {} songs in {}", self.songs.len(), self.location.display());

        self.current = None;
        if let Some(title) = selected {
            self.select_title(&title);
        }
        Ok(())
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn infos(&self) -> Vec<&SongInfo> {
        self.songs.iter().map(|s| &s.info).collect()
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    /// Selected position; the first song when nothing was chosen yet
    pub fn current_index(&self) -> Option<usize> {
        match self.current {
            Some(i) => Some(i),
            None if !self.songs.is_empty() => Some(0),
            None => None,
        }
    }

    pub fn current(&self) -> Option<&Song> {
        self.current_index().and_then(|i| self.songs.get(i))
    }

    pub fn select(&mut self, index: usize) -> bool {
        if index < self.songs.len() {
            self.current = Some(index);
            true
        } else {
            false
        }
    }

    pub fn select_title(&mut self, title: &str) -> bool {
        match self.songs.iter().position(|s| s.info.title == title) {
            Some(index) => self.select(index),
            None => false,
        }
    }

    /// Move to the following song; stays on the last one
    pub fn next(&mut self) -> Option<&Song> {
        let index = self.current_index()?;
        self.select((index + 1).min(self.songs.len() - 1));
        self.current()
    }

    /// Move to the preceding song; stays on the first one
    pub fn previous(&mut self) -> Option<&Song> {
        let index = self.current_index()?;
        self.select(index.saturating_sub(1));
        self.current()
    }
}

fn is_song_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SONG_EXTENSIONS.contains(&ext))
}

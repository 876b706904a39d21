//! Music player state for the site-wide audio widget.
//!
//! Exactly one audio instance is live at a time. `source_generation`
//! increments whenever that instance must be torn down and rebuilt for a
//! new track source; pause, seek and volume never bump it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub src: String,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

impl RepeatMode {
    fn next(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerAction {
    Play,
    Pause,
    Toggle,
    Seek(f64),
    SetVolume(f64),
    Next,
    Previous,
    Select(usize),
    ToggleShuffle,
    CycleRepeat,
    Reorder { from: usize, to: usize },
    /// Carries a random value in `0..tracks.len()` used when shuffling.
    TrackEnded { random_index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub tracks: Vec<Track>,
    pub current: usize,
    pub playing: bool,
    pub position_secs: f64,
    pub volume: f64,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub source_generation: u64,
}

/// Restarting the track instead of stepping back happens past this point.
const RESTART_THRESHOLD_SECS: f64 = 3.0;

impl PlayerState {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            current: 0,
            playing: false,
            position_secs: 0.0,
            volume: 1.0,
            shuffle: false,
            repeat: RepeatMode::Off,
            source_generation: 0,
        }
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.tracks.get(self.current)
    }

    pub fn apply(mut self, action: PlayerAction) -> Self {
        if self.tracks.is_empty() {
            if let PlayerAction::SetVolume(v) = action {
                self.volume = clamp_volume(v);
            }
            return self;
        }

        match action {
            PlayerAction::Play => self.playing = true,
            PlayerAction::Pause => self.playing = false,
            PlayerAction::Toggle => self.playing = !self.playing,
            PlayerAction::Seek(secs) => {
                let duration = self.tracks[self.current].duration_secs;
                self.position_secs = clamp_position(secs, duration);
            }
            PlayerAction::SetVolume(v) => self.volume = clamp_volume(v),
            PlayerAction::Next => {
                let next = (self.current + 1) % self.tracks.len();
                self.switch_to(next);
            }
            PlayerAction::Previous => {
                if self.position_secs > RESTART_THRESHOLD_SECS {
                    self.position_secs = 0.0;
                } else {
                    let prev = (self.current + self.tracks.len() - 1) % self.tracks.len();
                    self.switch_to(prev);
                }
            }
            PlayerAction::Select(index) => {
                if index < self.tracks.len() {
                    self.switch_to(index);
                    self.playing = true;
                }
            }
            PlayerAction::ToggleShuffle => self.shuffle = !self.shuffle,
            PlayerAction::CycleRepeat => self.repeat = self.repeat.next(),
            PlayerAction::Reorder { from, to } => self.reorder(from, to),
            PlayerAction::TrackEnded { random_index } => self.on_track_end(random_index),
        }
        self
    }

    fn on_track_end(&mut self, random_index: usize) {
        let len = self.tracks.len();
        match self.repeat {
            RepeatMode::One => {
                // Same source: the live instance is rewound, not rebuilt.
                self.position_secs = 0.0;
            }
            _ if self.shuffle && len > 1 => {
                let mut next = random_index % len;
                if next == self.current {
                    next = (next + 1) % len;
                }
                self.switch_to(next);
            }
            RepeatMode::All => self.switch_to((self.current + 1) % len),
            RepeatMode::Off => {
                if self.current + 1 < len {
                    self.switch_to(self.current + 1);
                } else {
                    self.playing = false;
                    self.position_secs = 0.0;
                }
            }
        }
    }

    fn reorder(&mut self, from: usize, to: usize) {
        let len = self.tracks.len();
        if from >= len || to >= len || from == to {
            return;
        }

        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);

        // The active track keeps playing from wherever it moved to.
        self.current = if self.current == from {
            to
        } else if from < self.current && to >= self.current {
            self.current - 1
        } else if from > self.current && to <= self.current {
            self.current + 1
        } else {
            self.current
        };
    }

    fn switch_to(&mut self, index: usize) {
        let source_changed = self.tracks[index].src != self.tracks[self.current].src;
        if index != self.current || source_changed {
            self.source_generation += 1;
        }
        self.current = index;
        self.position_secs = 0.0;
    }
}

fn clamp_position(secs: f64, duration: f64) -> f64 {
    if secs.is_nan() { 0.0 } else { secs.clamp(0.0, duration.max(0.0)) }
}

fn clamp_volume(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

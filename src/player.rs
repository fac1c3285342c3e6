//! Now-playing context
//!
//! One explicit [`Player`] per app instance holds the current podcast track
//! and playback position. Actual media decoding is someone else's job; this
//! only tracks what the controls show.

use crate::models::PodcastView;

/// Seconds skipped by [`Player::skip_back`]
pub const SKIP_BACK_SECS: u32 = 15;

/// The track being played
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Podcast id
    pub id: String,
    /// Title
    pub title: String,
    /// Creator name
    pub artist: String,
    /// Cover URL
    pub cover_url: String,
    /// Video URL
    pub media_url: Option<String>,
    /// Length in seconds
    pub duration_secs: u32,
}

impl From<&PodcastView> for Track {
    fn from(podcast: &PodcastView) -> Self {
        Self {
            id: podcast.id.clone(),
            title: podcast.title.clone(),
            artist: podcast.artist.clone(),
            cover_url: podcast.cover_url.clone(),
            media_url: podcast.media_url.clone(),
            duration_secs: podcast.duration_secs,
        }
    }
}

/// Playback state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Player {
    current: Option<Track>,
    playing: bool,
    position_secs: u32,
}

impl Player {
    /// Idle player
    pub fn new() -> Self {
        Self::default()
    }

    /// Current track
    pub const fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    /// Whether playback is running
    pub const fn is_playing(&self) -> bool {
        self.playing
    }

    /// Playback position in seconds
    pub const fn position(&self) -> u32 {
        self.position_secs
    }

    /// Start a track from the beginning. Playing the current track again
    /// just resumes it.
    pub fn play(&mut self, track: Track) {
        if self.current.as_ref().is_some_and(|t| t.id == track.id) {
            self.playing = true;
            return;
        }
        tracing::debug!("Now playing {}", track.title);
        self.current = Some(track);
        self.position_secs = 0;
        self.playing = true;
    }

    /// Toggle play/pause; no-op without a track
    pub fn toggle(&mut self) {
        if self.current.is_some() {
            self.playing = !self.playing;
        }
    }

    /// Pause playback
    pub fn pause(&mut self) {
        self.playing = false;
    }

    /// Jump to `secs`, clamped to the track length
    pub fn seek(&mut self, secs: u32) {
        let max = self.current.as_ref().map_or(0, |t| t.duration_secs);
        self.position_secs = secs.min(max);
    }

    /// Advance the clock. Playback stops at the end of the track.
    pub fn tick(&mut self, secs: u32) {
        if !self.playing {
            return;
        }
        self.seek(self.position_secs.saturating_add(secs));
        if self
            .current
            .as_ref()
            .is_some_and(|t| self.position_secs >= t.duration_secs)
        {
            self.playing = false;
        }
    }

    /// Rewind by [`SKIP_BACK_SECS`]
    pub fn skip_back(&mut self) {
        self.seek(self.position_secs.saturating_sub(SKIP_BACK_SECS));
    }

    /// Drop the current track
    pub fn stop(&mut self) {
        *self = Self::default();
    }

    /// `elapsed / total` label
    pub fn progress_label(&self) -> String {
        let total = self.current.as_ref().map_or(0, |t| t.duration_secs);
        format!("{} / {}", format_time(self.position_secs), format_time(total))
    }
}

/// Format seconds as `m:ss`
pub fn format_time(secs: u32) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, duration_secs: u32) -> Track {
        Track {
            id: id.into(),
            title: "Episode".into(),
            artist: "Ada".into(),
            cover_url: String::new(),
            media_url: None,
            duration_secs,
        }
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "0:00");
        assert_eq!(format_time(65), "1:05");
        assert_eq!(format_time(3600), "60:00");
    }

    #[test]
    fn test_seek_is_clamped() {
        let mut player = Player::new();
        player.seek(30);
        assert_eq!(player.position(), 0);

        player.play(track("a", 100));
        player.seek(500);
        assert_eq!(player.position(), 100);
        player.seek(40);
        player.skip_back();
        assert_eq!(player.position(), 25);
        player.seek(10);
        player.skip_back();
        assert_eq!(player.position(), 0);
    }

    #[test]
    fn test_tick_stops_at_end() {
        let mut player = Player::new();
        player.play(track("a", 10));
        player.tick(4);
        assert_eq!(player.progress_label(), "0:04 / 0:10");
        player.tick(20);
        assert_eq!(player.position(), 10);
        assert!(!player.is_playing());
    }

    #[test]
    fn test_replaying_same_track_resumes() {
        let mut player = Player::new();
        player.play(track("a", 100));
        player.tick(30);
        player.toggle();
        assert!(!player.is_playing());

        player.play(track("a", 100));
        assert!(player.is_playing());
        assert_eq!(player.position(), 30);

        player.play(track("b", 50));
        assert_eq!(player.position(), 0);
        assert_eq!(player.current().unwrap().id, "b");
    }
}

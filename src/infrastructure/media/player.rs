//! Opus/OGG audio playback onto an outgoing RTP track
//!
//! Pages are emitted on a fixed 20 ms ticker, one Opus frame per packet.

use super::track::{MediaError, RtpWriter};
use bytes::Bytes;
use rtp::header::Header;
use rtp::packet::Packet;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webrtc::media::io::ogg_reader::OggReader;

/// Negotiated Opus payload type
pub const OPUS_PAYLOAD_TYPE: u8 = 111;
/// Samples per 20 ms frame at 48 kHz
pub const SAMPLES_PER_FRAME: u32 = 960;
pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Opus TOC for a 20 ms CELT frame followed by an empty body
const OPUS_SILENCE_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];
const PLAYER_SSRC: u32 = 1;

/// How a playback call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Stopped,
}

#[derive(Debug, Default)]
struct RtpClock {
    sequence: u16,
    timestamp: u32,
    started: bool,
}

/// Audio player bound to one outgoing track
pub struct AudioPlayer {
    track: Arc<dyn RtpWriter>,
    stop: CancellationToken,
    clock: Mutex<RtpClock>,
}

impl AudioPlayer {
    pub fn new(track: Arc<dyn RtpWriter>) -> Self {
        Self {
            track,
            stop: CancellationToken::new(),
            clock: Mutex::new(RtpClock::default()),
        }
    }

    /// Play an OGG/Opus file once
    pub async fn play_file(&self, path: impl AsRef<Path>) -> Result<PlaybackOutcome, MediaError> {
        let path = path.as_ref();
        if self.is_stopped() {
            return Ok(PlaybackOutcome::Stopped);
        }

        let data = tokio::fs::read(path).await.map_err(|e| MediaError::AudioFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let (mut reader, _header) =
            OggReader::new(Cursor::new(data), false).map_err(|e| MediaError::AudioFile {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        debug!("Playing {}", path.display());

        let mut ticker = tokio::time::interval(FRAME_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frames = 0u64;

        loop {
            let page = match reader.parse_next_page() {
                Ok((page, _page_header)) => page,
                // EOF or a truncated page both end the file
                Err(e) => {
                    debug!("End of {} after {} frames: {}", path.display(), frames, e);
                    break;
                }
            };
            if is_opus_header(&page) {
                continue;
            }

            tokio::select! {
                _ = self.stop.cancelled() => return Ok(PlaybackOutcome::Stopped),
                _ = ticker.tick() => {}
            }

            self.write_frame(page.freeze()).await?;
            frames += 1;
        }

        if frames == 0 {
            return Err(MediaError::AudioFile {
                path: path.display().to_string(),
                reason: "no audio pages".to_string(),
            });
        }
        Ok(PlaybackOutcome::Finished)
    }

    /// Play a file over and over until stopped
    pub async fn play_file_loop(&self, path: impl AsRef<Path>) -> Result<(), MediaError> {
        let path = path.as_ref();
        info!("Looping {}", path.display());
        loop {
            if self.play_file(path).await? == PlaybackOutcome::Stopped {
                return Ok(());
            }
        }
    }

    /// Emit Opus silence for `duration`, or until stopped
    pub async fn play_silence(&self, duration: Duration) -> Result<PlaybackOutcome, MediaError> {
        let frames = (duration.as_millis() / FRAME_INTERVAL.as_millis()).max(1);
        let mut ticker = tokio::time::interval(FRAME_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        for _ in 0..frames {
            tokio::select! {
                _ = self.stop.cancelled() => return Ok(PlaybackOutcome::Stopped),
                _ = ticker.tick() => {}
            }
            self.write_frame(Bytes::from_static(&OPUS_SILENCE_FRAME)).await?;
        }
        Ok(PlaybackOutcome::Finished)
    }

    /// Stop any playback in progress. Idempotent; a stopped player stays stopped.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    async fn write_frame(&self, payload: Bytes) -> Result<(), MediaError> {
        let header = {
            let mut clock = match self.clock.lock() {
                Ok(clock) => clock,
                Err(poisoned) => poisoned.into_inner(),
            };
            if clock.started {
                clock.sequence = clock.sequence.wrapping_add(1);
                clock.timestamp = clock.timestamp.wrapping_add(SAMPLES_PER_FRAME);
            }
            let marker = !clock.started;
            clock.started = true;
            Header {
                version: 2,
                marker,
                payload_type: OPUS_PAYLOAD_TYPE,
                sequence_number: clock.sequence,
                timestamp: clock.timestamp,
                ssrc: PLAYER_SSRC,
                ..Default::default()
            }
        };

        self.track.send_packet(&Packet { header, payload }).await
    }
}

fn is_opus_header(page: &[u8]) -> bool {
    page.starts_with(b"OpusHead") || page.starts_with(b"OpusTags")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::infrastructure::media::track::{loopback_track, RtpReader};
    use std::io::Write;

    fn ogg_page(header_type: u8, sequence: u32, granule: u64, payload: &[u8]) -> Vec<u8> {
        let mut page = Vec::new();
        page.extend_from_slice(b"OggS");
        page.push(0);
        page.push(header_type);
        page.extend_from_slice(&granule.to_le_bytes());
        page.extend_from_slice(&0x1234u32.to_le_bytes());
        page.extend_from_slice(&sequence.to_le_bytes());
        page.extend_from_slice(&0u32.to_le_bytes());
        page.push(1);
        page.push(payload.len() as u8);
        page.extend_from_slice(payload);
        page
    }

    /// Minimal Opus-in-OGG file with `frames` audio pages
    pub(crate) fn write_test_ogg(path: &Path, frames: u8) {
        let mut head = Vec::new();
        head.extend_from_slice(b"OpusHead");
        head.push(1); // version
        head.push(2); // channels
        head.extend_from_slice(&312u16.to_le_bytes());
        head.extend_from_slice(&48_000u32.to_le_bytes());
        head.extend_from_slice(&0u16.to_le_bytes());
        head.push(0);

        let mut tags = Vec::new();
        tags.extend_from_slice(b"OpusTags");
        tags.extend_from_slice(&0u32.to_le_bytes());
        tags.extend_from_slice(&0u32.to_le_bytes());

        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&ogg_page(0x02, 0, 0, &head)).unwrap();
        file.write_all(&ogg_page(0x00, 1, 0, &tags)).unwrap();
        for i in 0..frames {
            let granule = (i as u64 + 1) * SAMPLES_PER_FRAME as u64;
            file.write_all(&ogg_page(0x00, i as u32 + 2, granule, &[0xfc, i, i, i]))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_play_file_skips_headers_and_paces_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("greeting.ogg");
        write_test_ogg(&path, 3);

        let (writer, reader) = loopback_track();
        let player = AudioPlayer::new(writer);

        let outcome = player.play_file(&path).await.unwrap();
        assert_eq!(outcome, PlaybackOutcome::Finished);

        let first = reader.recv_packet().await.unwrap();
        let second = reader.recv_packet().await.unwrap();
        let third = reader.recv_packet().await.unwrap();

        assert_eq!(first.header.payload_type, OPUS_PAYLOAD_TYPE);
        assert_eq!(first.payload.as_ref(), &[0xfc, 0, 0, 0]);
        assert_eq!(third.payload.as_ref(), &[0xfc, 2, 2, 2]);
        assert_eq!(second.header.sequence_number, first.header.sequence_number.wrapping_add(1));
        assert_eq!(third.header.timestamp, first.header.timestamp + 2 * SAMPLES_PER_FRAME);
    }

    #[tokio::test]
    async fn test_clock_continues_across_playbacks() {
        let (writer, reader) = loopback_track();
        let player = AudioPlayer::new(writer);

        player.play_silence(Duration::from_millis(40)).await.unwrap();
        player.play_silence(Duration::from_millis(20)).await.unwrap();

        let mut last: Option<Packet> = None;
        for _ in 0..3 {
            let packet = reader.recv_packet().await.unwrap();
            assert_eq!(packet.payload.as_ref(), &OPUS_SILENCE_FRAME);
            if let Some(prev) = last {
                assert_eq!(packet.header.sequence_number, prev.header.sequence_number + 1);
                assert_eq!(packet.header.timestamp, prev.header.timestamp + SAMPLES_PER_FRAME);
            }
            last = Some(packet);
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_ends_loop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hold.ogg");
        write_test_ogg(&path, 2);

        let (writer, _reader) = loopback_track();
        let player = Arc::new(AudioPlayer::new(writer));

        let looping = {
            let player = player.clone();
            let path = path.clone();
            tokio::spawn(async move { player.play_file_loop(&path).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!player.is_stopped());
        player.stop();
        player.stop();
        assert!(player.is_stopped());

        let result = tokio::time::timeout(Duration::from_secs(1), looping)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());

        assert_eq!(
            player.play_silence(Duration::from_secs(1)).await.unwrap(),
            PlaybackOutcome::Stopped
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let (writer, _reader) = loopback_track();
        let player = AudioPlayer::new(writer);
        let result = player.play_file("/nonexistent/greeting.ogg").await;
        assert!(matches!(result, Err(MediaError::AudioFile { .. })));
    }
}

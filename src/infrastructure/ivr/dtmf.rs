/// DTMF (Dual-Tone Multi-Frequency) extraction from RFC 4733 telephone-events
use crate::infrastructure::media::track::RtpReader;
use rtp::packet::Packet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Digits buffered per call before new ones are dropped
pub const DTMF_BUFFER_SIZE: usize = 32;

/// DTMF digit representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtmfDigit {
    Zero,
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Star,
    Pound,
}

impl DtmfDigit {
    /// Convert to character representation
    pub fn to_char(&self) -> char {
        match self {
            DtmfDigit::Zero => '0',
            DtmfDigit::One => '1',
            DtmfDigit::Two => '2',
            DtmfDigit::Three => '3',
            DtmfDigit::Four => '4',
            DtmfDigit::Five => '5',
            DtmfDigit::Six => '6',
            DtmfDigit::Seven => '7',
            DtmfDigit::Eight => '8',
            DtmfDigit::Nine => '9',
            DtmfDigit::Star => '*',
            DtmfDigit::Pound => '#',
        }
    }

    /// Parse from character
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(DtmfDigit::Zero),
            '1' => Some(DtmfDigit::One),
            '2' => Some(DtmfDigit::Two),
            '3' => Some(DtmfDigit::Three),
            '4' => Some(DtmfDigit::Four),
            '5' => Some(DtmfDigit::Five),
            '6' => Some(DtmfDigit::Six),
            '7' => Some(DtmfDigit::Seven),
            '8' => Some(DtmfDigit::Eight),
            '9' => Some(DtmfDigit::Nine),
            '*' => Some(DtmfDigit::Star),
            '#' => Some(DtmfDigit::Pound),
            _ => None,
        }
    }

    /// Map an RFC 4733 event code (0-9, 10 = '*', 11 = '#')
    pub fn from_event_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DtmfDigit::Zero),
            1 => Some(DtmfDigit::One),
            2 => Some(DtmfDigit::Two),
            3 => Some(DtmfDigit::Three),
            4 => Some(DtmfDigit::Four),
            5 => Some(DtmfDigit::Five),
            6 => Some(DtmfDigit::Six),
            7 => Some(DtmfDigit::Seven),
            8 => Some(DtmfDigit::Eight),
            9 => Some(DtmfDigit::Nine),
            10 => Some(DtmfDigit::Star),
            11 => Some(DtmfDigit::Pound),
            _ => None,
        }
    }
}

impl std::fmt::Display for DtmfDigit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// RFC 4733 telephone-event payload
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// |     event     |E|R| volume    |          duration             |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelephoneEvent {
    pub event: u8,
    pub end: bool,
    pub volume: u8,
    pub duration: u16,
}

impl TelephoneEvent {
    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }
        Some(Self {
            event: payload[0],
            end: payload[1] & 0x80 != 0,
            volume: payload[1] & 0x3f,
            duration: u16::from_be_bytes([payload[2], payload[3]]),
        })
    }

    pub fn digit(&self) -> Option<DtmfDigit> {
        DtmfDigit::from_event_code(self.event)
    }
}

/// Turns telephone-event packets into digits.
///
/// A key press is reported once, on its first end packet; senders repeat the
/// end packet (same RTP timestamp) for redundancy.
#[derive(Debug, Default)]
pub struct DtmfExtractor {
    last_reported: Option<u32>,
}

impl DtmfExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, packet: &Packet) -> Option<DtmfDigit> {
        let event = TelephoneEvent::decode(&packet.payload)?;
        if !event.end {
            return None;
        }
        if self.last_reported == Some(packet.header.timestamp) {
            return None;
        }
        self.last_reported = Some(packet.header.timestamp);
        event.digit()
    }
}

/// Result of offering a digit to the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Buffer full, digit discarded
    Dropped,
    Closed,
}

/// Bounded, lossy per-call digit channel.
///
/// Producers never block: when the buffer is full the digit is dropped.
/// `close` ends the channel; buffered digits can still be received.
pub struct DtmfBuffer {
    tx: Mutex<Option<mpsc::Sender<DtmfDigit>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<DtmfDigit>>,
    dropped: AtomicU64,
}

impl DtmfBuffer {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, digit: DtmfDigit) -> PushOutcome {
        let guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(tx) = guard.as_ref() else {
            return PushOutcome::Closed;
        };
        match tx.try_send(digit) {
            Ok(()) => PushOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("calling_dtmf_dropped_total").increment(1);
                PushOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    /// Next digit; `None` once closed and drained
    pub async fn recv(&self) -> Option<DtmfDigit> {
        self.rx.lock().await.recv().await
    }

    /// Discard digits typed so far
    pub async fn clear(&self) {
        let mut rx = self.rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        let mut guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take();
    }

    pub fn is_closed(&self) -> bool {
        match self.tx.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Digits discarded because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for DtmfBuffer {
    fn default() -> Self {
        Self::new(DTMF_BUFFER_SIZE)
    }
}

/// Read a telephone-event track into the buffer until the buffer closes,
/// the track ends, or `cancel` fires
pub async fn run_dtmf_reader(
    call_id: String,
    track: Arc<dyn RtpReader>,
    buffer: Arc<DtmfBuffer>,
    cancel: CancellationToken,
) {
    let mut extractor = DtmfExtractor::new();
    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => break,
            result = track.recv_packet() => match result {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("DTMF track for call {} ended: {}", call_id, e);
                    break;
                }
            },
        };

        if let Some(digit) = extractor.process(&packet) {
            match buffer.push(digit) {
                PushOutcome::Queued => info!("DTMF digit '{}' received on call {}", digit, call_id),
                PushOutcome::Dropped => debug!("DTMF buffer full on call {}, dropped '{}'", call_id, digit),
                PushOutcome::Closed => break,
            }
        }
        if buffer.is_closed() {
            break;
        }
    }
}

/// Drain the caller's audio track until the bridge takes it over.
///
/// Some senders put telephone-events on the audio SSRC instead of a separate
/// track; those packets are decoded into `buffer` like out-of-band ones.
pub async fn run_audio_drain(
    call_id: String,
    track: Arc<dyn RtpReader>,
    buffer: Arc<DtmfBuffer>,
    event_payload_type: u8,
    bridge_started: CancellationToken,
    shutdown: CancellationToken,
) {
    let mut extractor = DtmfExtractor::new();
    let mut drained = 0u64;
    loop {
        let packet = tokio::select! {
            _ = bridge_started.cancelled() => {
                debug!("Bridge took over audio of call {}", call_id);
                break;
            }
            _ = shutdown.cancelled() => break,
            result = track.recv_packet() => match result {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("Audio track for call {} ended: {}", call_id, e);
                    break;
                }
            },
        };
        drained += 1;

        if packet.header.payload_type == event_payload_type {
            if let Some(digit) = extractor.process(&packet) {
                if buffer.push(digit) == PushOutcome::Queued {
                    info!("In-band DTMF digit '{}' received on call {}", digit, call_id);
                }
            }
        }
    }
    debug!("Audio drain for call {} stopped after {} packets", call_id, drained);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::media::track::loopback_track;
    use bytes::Bytes;
    use rtp::header::Header;

    fn event_packet(code: u8, end: bool, timestamp: u32, seq: u16) -> Packet {
        let flags = if end { 0x80 | 10 } else { 10 };
        Packet {
            header: Header {
                version: 2,
                payload_type: 101,
                sequence_number: seq,
                timestamp,
                ..Default::default()
            },
            payload: Bytes::from(vec![code, flags, 0x03, 0x20]),
        }
    }

    #[test]
    fn test_dtmf_digit_conversion() {
        assert_eq!(DtmfDigit::Zero.to_char(), '0');
        assert_eq!(DtmfDigit::Star.to_char(), '*');
        assert_eq!(DtmfDigit::from_char('#'), Some(DtmfDigit::Pound));
        assert_eq!(DtmfDigit::from_char('x'), None);

        assert_eq!(DtmfDigit::from_event_code(5), Some(DtmfDigit::Five));
        assert_eq!(DtmfDigit::from_event_code(10), Some(DtmfDigit::Star));
        assert_eq!(DtmfDigit::from_event_code(11), Some(DtmfDigit::Pound));
        assert_eq!(DtmfDigit::from_event_code(16), None);
    }

    #[test]
    fn test_decode_telephone_event() {
        let event = TelephoneEvent::decode(&[9, 0x8a, 0x03, 0x20]).unwrap();
        assert_eq!(event.event, 9);
        assert!(event.end);
        assert_eq!(event.volume, 10);
        assert_eq!(event.duration, 800);
        assert_eq!(event.digit(), Some(DtmfDigit::Nine));

        assert!(TelephoneEvent::decode(&[1, 2]).is_none());
    }

    #[test]
    fn test_extractor_reports_once_per_press() {
        let mut extractor = DtmfExtractor::new();

        assert_eq!(extractor.process(&event_packet(4, false, 1000, 1)), None);
        assert_eq!(extractor.process(&event_packet(4, false, 1000, 2)), None);
        assert_eq!(extractor.process(&event_packet(4, true, 1000, 3)), Some(DtmfDigit::Four));
        // redundant end packets
        assert_eq!(extractor.process(&event_packet(4, true, 1000, 4)), None);
        assert_eq!(extractor.process(&event_packet(4, true, 1000, 5)), None);

        // same key pressed again is a new event timestamp
        assert_eq!(extractor.process(&event_packet(4, true, 2600, 6)), Some(DtmfDigit::Four));
    }

    #[test]
    fn test_extractor_ignores_unknown_events() {
        let mut extractor = DtmfExtractor::new();
        assert_eq!(extractor.process(&event_packet(16, true, 10, 1)), None);
    }

    #[tokio::test]
    async fn test_buffer_drops_when_full() {
        let buffer = DtmfBuffer::new(2);
        assert_eq!(buffer.push(DtmfDigit::One), PushOutcome::Queued);
        assert_eq!(buffer.push(DtmfDigit::Two), PushOutcome::Queued);
        assert_eq!(buffer.push(DtmfDigit::Three), PushOutcome::Dropped);
        assert_eq!(buffer.dropped(), 1);

        assert_eq!(buffer.recv().await, Some(DtmfDigit::One));
        assert_eq!(buffer.recv().await, Some(DtmfDigit::Two));
    }

    #[tokio::test]
    async fn test_buffer_close_drains_then_ends() {
        let buffer = DtmfBuffer::default();
        buffer.push(DtmfDigit::Seven);
        buffer.close();
        buffer.close();

        assert!(buffer.is_closed());
        assert_eq!(buffer.push(DtmfDigit::Eight), PushOutcome::Closed);
        assert_eq!(buffer.recv().await, Some(DtmfDigit::Seven));
        assert_eq!(buffer.recv().await, None);
    }

    #[tokio::test]
    async fn test_reader_feeds_buffer_until_track_ends() {
        let (writer, reader) = loopback_track();
        let buffer = Arc::new(DtmfBuffer::default());

        use crate::infrastructure::media::track::RtpWriter;
        writer.send_packet(&event_packet(1, true, 160, 1)).await.unwrap();
        writer.send_packet(&event_packet(1, true, 160, 2)).await.unwrap();
        writer.send_packet(&event_packet(11, true, 960, 3)).await.unwrap();
        writer.close();

        run_dtmf_reader(
            "call-1".to_string(),
            reader,
            buffer.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(buffer.recv().await, Some(DtmfDigit::One));
        assert_eq!(buffer.recv().await, Some(DtmfDigit::Pound));
        buffer.close();
        assert_eq!(buffer.recv().await, None);
    }

    #[tokio::test]
    async fn test_audio_drain_decodes_in_band_events_and_stops_on_bridge() {
        use crate::infrastructure::media::track::RtpWriter;

        let (writer, reader) = loopback_track();
        let buffer = Arc::new(DtmfBuffer::default());
        let bridge_started = CancellationToken::new();

        let mut voice = event_packet(0, false, 0, 1);
        voice.header.payload_type = 111;
        writer.send_packet(&voice).await.unwrap();
        writer.send_packet(&event_packet(3, true, 480, 2)).await.unwrap();

        let drain = tokio::spawn(run_audio_drain(
            "call-2".to_string(),
            reader,
            buffer.clone(),
            101,
            bridge_started.clone(),
            CancellationToken::new(),
        ));

        assert_eq!(buffer.recv().await, Some(DtmfDigit::Three));
        bridge_started.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), drain)
            .await
            .unwrap()
            .unwrap();
    }
}

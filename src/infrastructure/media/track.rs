//! RTP track seams
//!
//! Player, bridge and DTMF reader work against these traits so the same
//! code drives WebRTC tracks and in-process loopback tracks.

use async_trait::async_trait;
use rtp::packet::Packet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

/// Media errors
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("track closed")]
    Closed,

    #[error("RTP read failed: {0}")]
    Read(String),

    #[error("RTP write failed: {0}")]
    Write(String),

    #[error("audio file {path}: {reason}")]
    AudioFile { path: String, reason: String },
}

/// Source of RTP packets
#[async_trait]
pub trait RtpReader: Send + Sync {
    async fn recv_packet(&self) -> Result<Packet, MediaError>;
}

/// Sink for RTP packets
#[async_trait]
pub trait RtpWriter: Send + Sync {
    async fn send_packet(&self, packet: &Packet) -> Result<(), MediaError>;
}

#[async_trait]
impl RtpReader for TrackRemote {
    async fn recv_packet(&self) -> Result<Packet, MediaError> {
        match self.read_rtp().await {
            Ok((packet, _attributes)) => Ok(packet),
            Err(e) => Err(MediaError::Read(e.to_string())),
        }
    }
}

#[async_trait]
impl RtpWriter for TrackLocalStaticRTP {
    async fn send_packet(&self, packet: &Packet) -> Result<(), MediaError> {
        self.write_rtp(packet)
            .await
            .map(|_| ())
            .map_err(|e| MediaError::Write(e.to_string()))
    }
}

/// Writing half of an in-process track
pub struct LoopbackWriter {
    tx: Mutex<Option<mpsc::UnboundedSender<Packet>>>,
}

impl LoopbackWriter {
    /// Close the track; the reader sees end-of-stream after draining
    pub fn close(&self) {
        match self.tx.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
    }
}

#[async_trait]
impl RtpWriter for LoopbackWriter {
    async fn send_packet(&self, packet: &Packet) -> Result<(), MediaError> {
        let guard = self.tx.lock().map_err(|_| MediaError::Closed)?;
        match guard.as_ref() {
            Some(tx) => tx.send(packet.clone()).map_err(|_| MediaError::Closed),
            None => Err(MediaError::Closed),
        }
    }
}

/// Reading half of an in-process track
pub struct LoopbackReader {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
}

#[async_trait]
impl RtpReader for LoopbackReader {
    async fn recv_packet(&self) -> Result<Packet, MediaError> {
        self.rx.lock().await.recv().await.ok_or(MediaError::Closed)
    }
}

/// An unbounded in-process track: what is written on one end is read on the other
pub fn loopback_track() -> (Arc<LoopbackWriter>, Arc<LoopbackReader>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Arc::new(LoopbackWriter {
            tx: Mutex::new(Some(tx)),
        }),
        Arc::new(LoopbackReader {
            rx: tokio::sync::Mutex::new(rx),
        }),
    )
}

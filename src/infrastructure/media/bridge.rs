//! Audio bridge between a caller and an agent
//!
//! Relays RTP both ways without touching it: sequence numbers, timestamps
//! and payloads arrive at the far side exactly as they were read.

use super::track::{RtpReader, RtpWriter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why one direction of the bridge stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegExit {
    /// `stop` was called, or the other direction ended
    Stopped,
    /// Source track ended or failed
    SourceEnded(String),
    /// Destination track rejected a packet
    SinkFailed(String),
}

/// Outcome of a bridge run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeExit {
    pub caller_to_agent: LegExit,
    pub agent_to_caller: LegExit,
}

/// Packet counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub caller_to_agent: u64,
    pub agent_to_caller: u64,
}

/// Media Bridge
///
/// Connects two peer connections and forwards packets between them
pub struct AudioBridge {
    stop: CancellationToken,
    caller_to_agent: Arc<AtomicU64>,
    agent_to_caller: Arc<AtomicU64>,
}

impl AudioBridge {
    pub fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            caller_to_agent: Arc::new(AtomicU64::new(0)),
            agent_to_caller: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run the bridge. Spawns one task per direction and returns once both
    /// have exited; when either direction ends the other is stopped too.
    pub async fn start(
        &self,
        caller_remote: Arc<dyn RtpReader>,
        agent_local: Arc<dyn RtpWriter>,
        agent_remote: Arc<dyn RtpReader>,
        caller_local: Arc<dyn RtpWriter>,
    ) -> BridgeExit {
        info!("Starting audio bridge");
        let run = self.stop.child_token();

        let upstream = tokio::spawn(forward(
            "caller->agent",
            caller_remote,
            agent_local,
            run.clone(),
            self.caller_to_agent.clone(),
        ));
        let downstream = tokio::spawn(forward(
            "agent->caller",
            agent_remote,
            caller_local,
            run,
            self.agent_to_caller.clone(),
        ));

        let (upstream, downstream) = tokio::join!(upstream, downstream);
        let exit = BridgeExit {
            caller_to_agent: upstream.unwrap_or_else(|e| LegExit::SourceEnded(e.to_string())),
            agent_to_caller: downstream.unwrap_or_else(|e| LegExit::SourceEnded(e.to_string())),
        };

        let stats = self.stats();
        info!(
            "Audio bridge finished: {} packets caller->agent, {} packets agent->caller",
            stats.caller_to_agent, stats.agent_to_caller
        );
        exit
    }

    /// Stop both directions. Idempotent.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            debug!("Stopping audio bridge");
        }
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            caller_to_agent: self.caller_to_agent.load(Ordering::Relaxed),
            agent_to_caller: self.agent_to_caller.load(Ordering::Relaxed),
        }
    }
}

impl Default for AudioBridge {
    fn default() -> Self {
        Self::new()
    }
}

async fn forward(
    direction: &'static str,
    src: Arc<dyn RtpReader>,
    dst: Arc<dyn RtpWriter>,
    run: CancellationToken,
    counter: Arc<AtomicU64>,
) -> LegExit {
    let exit = loop {
        let packet = tokio::select! {
            _ = run.cancelled() => break LegExit::Stopped,
            result = src.recv_packet() => match result {
                Ok(packet) => packet,
                Err(e) => break LegExit::SourceEnded(e.to_string()),
            },
        };

        if let Err(e) = dst.send_packet(&packet).await {
            warn!("Bridge {} write failed: {}", direction, e);
            break LegExit::SinkFailed(e.to_string());
        }
        counter.fetch_add(1, Ordering::Relaxed);
    };

    debug!("Bridge {} exited: {:?}", direction, exit);
    // Take the other direction down with us
    run.cancel();
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::media::track::loopback_track;
    use bytes::Bytes;
    use rtp::header::Header;
    use rtp::packet::Packet;
    use std::time::Duration;

    fn packet(seq: u16, ts: u32, body: &[u8]) -> Packet {
        Packet {
            header: Header {
                version: 2,
                payload_type: 111,
                sequence_number: seq,
                timestamp: ts,
                ssrc: 0xdead_beef,
                ..Default::default()
            },
            payload: Bytes::copy_from_slice(body),
        }
    }

    #[tokio::test]
    async fn test_bridge_relays_both_directions_unmodified() {
        let (caller_tx, caller_remote) = loopback_track();
        let (agent_local, agent_rx) = loopback_track();
        let (agent_tx, agent_remote) = loopback_track();
        let (caller_local, caller_rx) = loopback_track();

        let bridge = Arc::new(AudioBridge::new());
        let run = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .start(caller_remote, agent_local, agent_remote, caller_local)
                    .await
            })
        };

        let upstream: Vec<Packet> = (0..5).map(|i| packet(100 + i, 960 * i as u32, &[i as u8; 8])).collect();
        let downstream: Vec<Packet> = (0..5).map(|i| packet(65533u16.wrapping_add(i), 7 + i as u32, &[0xa0 | i as u8])).collect();

        for p in &upstream {
            caller_tx.send_packet(p).await.unwrap();
        }
        for p in &downstream {
            agent_tx.send_packet(p).await.unwrap();
        }

        for expected in &upstream {
            assert_eq!(&agent_rx.recv_packet().await.unwrap(), expected);
        }
        for expected in &downstream {
            assert_eq!(&caller_rx.recv_packet().await.unwrap(), expected);
        }

        bridge.stop();
        let exit = tokio::time::timeout(Duration::from_secs(1), run).await.unwrap().unwrap();
        assert_eq!(exit.caller_to_agent, LegExit::Stopped);
        assert_eq!(exit.agent_to_caller, LegExit::Stopped);
        assert_eq!(
            bridge.stats(),
            BridgeStats {
                caller_to_agent: 5,
                agent_to_caller: 5
            }
        );
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_unblocks_reads() {
        let (_caller_tx, caller_remote) = loopback_track();
        let (agent_local, _agent_rx) = loopback_track();
        let (_agent_tx, agent_remote) = loopback_track();
        let (caller_local, _caller_rx) = loopback_track();

        let bridge = Arc::new(AudioBridge::new());
        let run = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .start(caller_remote, agent_local, agent_remote, caller_local)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        bridge.stop();
        bridge.stop();
        assert!(bridge.is_stopped());

        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_one_side_ending_stops_the_other() {
        let (caller_tx, caller_remote) = loopback_track();
        let (agent_local, _agent_rx) = loopback_track();
        let (agent_tx, agent_remote) = loopback_track();
        let (caller_local, _caller_rx) = loopback_track();

        let bridge = AudioBridge::new();
        // agent hangs up
        agent_tx.close();

        let exit = tokio::time::timeout(
            Duration::from_secs(1),
            bridge.start(caller_remote, agent_local, agent_remote, caller_local),
        )
        .await
        .unwrap();

        assert!(matches!(exit.agent_to_caller, LegExit::SourceEnded(_)));
        assert_eq!(exit.caller_to_agent, LegExit::Stopped);
        drop(caller_tx);
    }
}

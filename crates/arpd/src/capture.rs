//! Per-port packet capture: backend traits and the receive worker.
//!
//! The owner opens a [`CaptureHandle`] through a [`CaptureBackend`] and hands
//! it to an [`RxWorker`], which forwards frames to the rx sink until asked to
//! stop. Stopping is a request/acknowledge exchange: the worker returns the
//! handle on the acknowledge channel and only then may the owner close it.

use crate::error::{ArpdError, Result};
use async_trait::async_trait;
use sonic_types::{IfIndex, MacAddress};
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// LACP slow-protocols EtherType, never delivered to ARP.
pub const LACP_ETHER_TYPE: u16 = 0x8809;

/// An open receive handle on one port.
#[async_trait]
pub trait CaptureHandle: Send {
    /// Next captured frame. `Ok(None)` means the handle reached end of stream.
    ///
    /// Must be cancel-safe: the worker drops the future when a stop request
    /// arrives.
    async fn next_packet(&mut self) -> Result<Option<Vec<u8>>>;

    /// Releases the underlying capture resources.
    fn close(&mut self);
}

/// Opens capture handles.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, if_name: &str, filter: &str) -> Result<Box<dyn CaptureHandle>>;
}

/// Backend for builds without a packet capture facility; every open fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCapture;

impl CaptureBackend for DisabledCapture {
    fn open(&self, if_name: &str, _filter: &str) -> Result<Box<dyn CaptureHandle>> {
        Err(ArpdError::capture(
            if_name,
            "packet capture backend not available",
        ))
    }
}

/// Builds a port's capture filter: drop LACP and frames sourced from the
/// port's own MAC, then apply `extra` (empty for none).
pub fn base_filter(mac: Option<MacAddress>, extra: &str) -> String {
    let mut filter = match mac {
        Some(mac) => format!(
            "(not ether proto {:#06x} and not (ether src {}))",
            LACP_ETHER_TYPE, mac
        ),
        None => format!("(not ether proto {:#06x})", LACP_ETHER_TYPE),
    };
    let extra = extra.trim();
    if !extra.is_empty() {
        filter.push_str(" and ");
        filter.push_str(extra);
    }
    filter
}

/// A frame received on a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxPacket {
    pub port: IfIndex,
    pub data: Vec<u8>,
}

/// Receive worker bound to one port.
pub struct RxWorker {
    port: IfIndex,
    stop_tx: oneshot::Sender<()>,
    ack_rx: oneshot::Receiver<Box<dyn CaptureHandle>>,
    task: JoinHandle<()>,
}

impl fmt::Debug for RxWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxWorker")
            .field("port", &self.port)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

impl RxWorker {
    /// Starts forwarding frames from `handle` to `sink`.
    pub fn spawn(
        port: IfIndex,
        handle: Box<dyn CaptureHandle>,
        sink: mpsc::Sender<RxPacket>,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        let task = tokio::spawn(receive_loop(port, handle, sink, stop_rx, ack_tx));
        Self {
            port,
            stop_tx,
            ack_rx,
            task,
        }
    }

    /// Sends the stop request and waits for the acknowledgement.
    ///
    /// Returns the handle the worker was reading from; the caller closes it.
    pub async fn stop(self) -> Result<Box<dyn CaptureHandle>> {
        // An Err here means the worker already finished; its ack is pending.
        let _ = self.stop_tx.send(());
        let handle = self
            .ack_rx
            .await
            .map_err(|_| ArpdError::ChannelClosed("rx stop acknowledge"))?;
        if let Err(e) = self.task.await {
            warn!(port = %self.port, error = %e, "Receive worker did not exit cleanly");
        }
        Ok(handle)
    }
}

async fn receive_loop(
    port: IfIndex,
    mut handle: Box<dyn CaptureHandle>,
    sink: mpsc::Sender<RxPacket>,
    mut stop_rx: oneshot::Receiver<()>,
    ack_tx: oneshot::Sender<Box<dyn CaptureHandle>>,
) {
    let stopped = loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break true,
            packet = handle.next_packet() => match packet {
                Ok(Some(data)) => {
                    tokio::select! {
                        biased;
                        _ = &mut stop_rx => break true,
                        sent = sink.send(RxPacket { port, data }) => {
                            if sent.is_err() {
                                debug!(%port, "Rx sink closed, idling until stopped");
                                break false;
                            }
                        }
                    }
                }
                Ok(None) => {
                    debug!(%port, "Capture handle reached end of stream");
                    break false;
                }
                Err(e) => {
                    warn!(%port, error = %e, "Capture read failed, idling until stopped");
                    break false;
                }
            },
        }
    };

    if !stopped {
        let _ = stop_rx.await;
    }

    if let Err(mut handle) = ack_tx.send(handle) {
        handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sonic_types::IfType;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct ChannelHandle {
        frames: mpsc::Receiver<Vec<u8>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl CaptureHandle for ChannelHandle {
        async fn next_packet(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.frames.recv().await)
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn channel_handle() -> (mpsc::Sender<Vec<u8>>, Box<dyn CaptureHandle>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel(8);
        let closed = Arc::new(AtomicBool::new(false));
        let handle = ChannelHandle {
            frames: rx,
            closed: closed.clone(),
        };
        (tx, Box::new(handle), closed)
    }

    #[test]
    fn test_base_filter() {
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(
            base_filter(Some(mac), "arp"),
            "(not ether proto 0x8809 and not (ether src 00:11:22:33:44:55)) and arp"
        );
        assert_eq!(base_filter(None, ""), "(not ether proto 0x8809)");
    }

    #[test]
    fn test_disabled_capture_fails_open() {
        let err = DisabledCapture.open("Ethernet0", "arp").err().unwrap();
        assert!(matches!(err, ArpdError::Capture { .. }));
    }

    #[tokio::test]
    async fn test_worker_forwards_frames_and_returns_handle() {
        let port = IfIndex::new(IfType::Port, 1);
        let (frames, handle, closed) = channel_handle();
        let (sink_tx, mut sink_rx) = mpsc::channel(8);

        let worker = RxWorker::spawn(port, handle, sink_tx);
        frames.send(vec![1, 2, 3]).await.unwrap();
        let packet = sink_rx.recv().await.unwrap();
        assert_eq!(
            packet,
            RxPacket {
                port,
                data: vec![1, 2, 3]
            }
        );

        let mut handle = worker.stop().await.unwrap();
        assert!(!closed.load(Ordering::SeqCst));
        handle.close();
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_worker_acks_after_end_of_stream() {
        let port = IfIndex::new(IfType::Port, 2);
        let (frames, handle, _closed) = channel_handle();
        let (sink_tx, _sink_rx) = mpsc::channel(8);

        let worker = RxWorker::spawn(port, handle, sink_tx);
        drop(frames);
        tokio::task::yield_now().await;
        assert!(worker.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_worker_acks_when_sink_closed() {
        let port = IfIndex::new(IfType::Port, 3);
        let (frames, handle, _closed) = channel_handle();
        let (sink_tx, sink_rx) = mpsc::channel(8);
        drop(sink_rx);

        let worker = RxWorker::spawn(port, handle, sink_tx);
        frames.send(vec![0xff]).await.unwrap();
        assert!(worker.stop().await.is_ok());
    }
}

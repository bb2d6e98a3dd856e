use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};

use super::osc::encode_frame;
use super::ProtocolFrame;

/// Standard TUIO port on loopback.
pub const DEFAULT_TUIO_ADDR: &str = "127.0.0.1:3333";

/// Destination for committed protocol frames.
///
/// A failed `send` loses that frame only; the next frame carries the full
/// alive set, so consumers resynchronise without replay.
pub trait CursorSink: Send {
    fn send(&mut self, frame: &ProtocolFrame) -> Result<()>;
}

/// TUIO over UDP, one OSC bundle per datagram.
pub struct UdpSink {
    socket: UdpSocket,
    target: SocketAddr,
    source_name: String,
}

impl UdpSink {
    pub fn connect(target: &str, source_name: &str) -> Result<Self> {
        let target: SocketAddr = target
            .parse()
            .with_context(|| format!("invalid TUIO address '{}'", target))?;
        let bind: SocketAddr = if target.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        let socket = UdpSocket::bind(bind).context("bind TUIO socket")?;
        log::info!("TUIO output to {} as '{}'", target, source_name);
        Ok(Self {
            socket,
            target,
            source_name: source_name.to_string(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl CursorSink for UdpSink {
    fn send(&mut self, frame: &ProtocolFrame) -> Result<()> {
        let bytes = encode_frame(frame, &self.source_name);
        let sent = self
            .socket
            .send_to(&bytes, self.target)
            .with_context(|| format!("send TUIO frame {} to {}", frame.sequence, self.target))?;
        if sent != bytes.len() {
            return Err(anyhow!(
                "short TUIO send: {} of {} bytes",
                sent,
                bytes.len()
            ));
        }
        Ok(())
    }
}

/// Keeps every frame in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<ProtocolFrame>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<ProtocolFrame> {
        self.frames
            .lock()
            .map(|frames| frames.clone())
            .unwrap_or_default()
    }
}

impl CursorSink for MemorySink {
    fn send(&mut self, frame: &ProtocolFrame) -> Result<()> {
        self.frames
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?
            .push(frame.clone());
        Ok(())
    }
}

/// One JSON object per frame, newline separated.
pub struct JsonLinesSink<W: Write + Send> {
    out: W,
    skip_empty: bool,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            skip_empty: false,
        }
    }

    /// Omit frames without events.
    pub fn skip_empty(mut self, skip: bool) -> Self {
        self.skip_empty = skip;
        self
    }
}

impl<W: Write + Send> CursorSink for JsonLinesSink<W> {
    fn send(&mut self, frame: &ProtocolFrame) -> Result<()> {
        if self.skip_empty && frame.events.is_empty() {
            return Ok(());
        }
        serde_json::to_writer(&mut self.out, frame)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuio::osc::decode_bundle;
    use std::time::Duration;

    fn empty_frame(sequence: u64) -> ProtocolFrame {
        ProtocolFrame {
            sequence,
            time: Duration::ZERO,
            events: vec![],
            alive: vec![],
        }
    }

    #[test]
    fn udp_sink_delivers_one_bundle_per_frame() -> Result<()> {
        let receiver = UdpSocket::bind("127.0.0.1:0")?;
        receiver.set_read_timeout(Some(Duration::from_secs(2)))?;
        let addr = receiver.local_addr()?.to_string();

        let mut sink = UdpSink::connect(&addr, "test")?;
        sink.send(&empty_frame(7))?;

        let mut buf = [0u8; 1024];
        let (n, _) = receiver.recv_from(&mut buf)?;
        let messages = decode_bundle(&buf[..n])?;
        assert_eq!(messages.len(), 3);
        Ok(())
    }

    #[test]
    fn udp_sink_rejects_bad_address() {
        assert!(UdpSink::connect("not-an-addr", "test").is_err());
    }

    #[test]
    fn json_lines_sink_skips_empty_frames_when_asked() -> Result<()> {
        let mut out = Vec::new();
        {
            let mut sink = JsonLinesSink::new(&mut out).skip_empty(true);
            sink.send(&empty_frame(1))?;
        }
        assert!(out.is_empty());

        let mut sink = JsonLinesSink::new(&mut out);
        sink.send(&empty_frame(2))?;
        let line = String::from_utf8(out)?;
        assert!(line.starts_with("{\"sequence\":2"));
        assert!(line.ends_with('\n'));
        Ok(())
    }
}

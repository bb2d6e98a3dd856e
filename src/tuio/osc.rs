//! OSC 1.0 encoding of TUIO 1.1 `/tuio/2Dcur` bundles.
//!
//! One committed frame becomes one bundle:
//!
//! ```text
//! #bundle <immediate>
//!   /tuio/2Dcur source <name>
//!   /tuio/2Dcur alive  <s_id>...
//!   /tuio/2Dcur set    <s_id> <x> <y> <X> <Y> <m>   (per ADD/UPDATE)
//!   /tuio/2Dcur fseq   <sequence>
//! ```
//!
//! Removal is implicit: a session id missing from `alive`.

use anyhow::{anyhow, bail, Result};

use super::{CursorEvent, ProtocolFrame};

pub const CURSOR_ADDRESS: &str = "/tuio/2Dcur";
const BUNDLE_TAG: &str = "#bundle";
const IMMEDIATE: u64 = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    fn cursor(args: Vec<OscArg>) -> Self {
        Self {
            address: CURSOR_ADDRESS.to_string(),
            args,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        write_str(out, &self.address);
        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        for arg in &self.args {
            tags.push(match arg {
                OscArg::Int(_) => 'i',
                OscArg::Float(_) => 'f',
                OscArg::Str(_) => 's',
            });
        }
        write_str(out, &tags);
        for arg in &self.args {
            match arg {
                OscArg::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
                OscArg::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
                OscArg::Str(s) => write_str(out, s),
            }
        }
    }
}

/// NUL-terminated, padded to a multiple of four bytes.
fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    let pad = 4 - s.len() % 4;
    out.extend(std::iter::repeat(0u8).take(pad));
}

/// Messages for one frame, in bundle order.
pub fn frame_messages(frame: &ProtocolFrame, source: &str) -> Vec<OscMessage> {
    let mut messages = Vec::with_capacity(frame.events.len() + 3);
    messages.push(OscMessage::cursor(vec![
        OscArg::Str("source".into()),
        OscArg::Str(source.to_string()),
    ]));

    let mut alive = vec![OscArg::Str("alive".into())];
    alive.extend(frame.alive.iter().map(|&id| OscArg::Int(id as i32)));
    messages.push(OscMessage::cursor(alive));

    for event in &frame.events {
        let (session_id, x, y, vx, vy, m) = match *event {
            CursorEvent::Add { session_id, x, y } => {
                // One `set` per id: the UPDATE that follows carries it.
                let updated = frame.events.iter().any(|e| {
                    matches!(e, CursorEvent::Update { session_id: s, .. } if *s == session_id)
                });
                if updated {
                    continue;
                }
                (session_id, x, y, 0.0, 0.0, 0.0)
            }
            CursorEvent::Update {
                session_id,
                x,
                y,
                vx,
                vy,
                acceleration,
            } => (session_id, x, y, vx, vy, acceleration),
            CursorEvent::Remove { .. } => continue,
        };
        messages.push(OscMessage::cursor(vec![
            OscArg::Str("set".into()),
            OscArg::Int(session_id as i32),
            OscArg::Float(x),
            OscArg::Float(y),
            OscArg::Float(vx),
            OscArg::Float(vy),
            OscArg::Float(m),
        ]));
    }

    messages.push(OscMessage::cursor(vec![
        OscArg::Str("fseq".into()),
        OscArg::Int(frame.sequence as i32),
    ]));
    messages
}

pub fn encode_frame(frame: &ProtocolFrame, source: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(512);
    write_str(&mut out, BUNDLE_TAG);
    out.extend_from_slice(&IMMEDIATE.to_be_bytes());
    let mut element = Vec::with_capacity(64);
    for message in frame_messages(frame, source) {
        element.clear();
        message.encode(&mut element);
        out.extend_from_slice(&(element.len() as i32).to_be_bytes());
        out.extend_from_slice(&element);
    }
    out
}

/// Parse a bundle produced by `encode_frame`.
pub fn decode_bundle(bytes: &[u8]) -> Result<Vec<OscMessage>> {
    let mut r = Reader { bytes, pos: 0 };
    if r.read_str()? != BUNDLE_TAG {
        bail!("not an OSC bundle");
    }
    r.take(8)?;
    let mut messages = Vec::new();
    while r.pos < bytes.len() {
        let size = r.read_i32()?;
        let size = usize::try_from(size).map_err(|_| anyhow!("negative element size"))?;
        let end = r.pos + size;
        let address = r.read_str()?;
        let tags = r.read_str()?;
        let mut args = Vec::new();
        for tag in tags.chars().skip(1) {
            args.push(match tag {
                'i' => OscArg::Int(r.read_i32()?),
                'f' => OscArg::Float(f32::from_bits(r.read_i32()? as u32)),
                's' => OscArg::Str(r.read_str()?),
                other => bail!("unsupported OSC type tag '{}'", other),
            });
        }
        if r.pos != end {
            bail!("OSC element size mismatch");
        }
        messages.push(OscMessage { address, args });
    }
    Ok(messages)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| anyhow!("truncated OSC packet"))?;
        self.pos = end;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let raw = self.take(4)?;
        Ok(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_str(&mut self) -> Result<String> {
        let rest = &self.bytes[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| anyhow!("unterminated OSC string"))?;
        let s = std::str::from_utf8(&rest[..len])?.to_string();
        self.take(len + (4 - len % 4))?;
        Ok(s)
    }
}

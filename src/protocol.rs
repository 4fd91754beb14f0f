//! Wire protocol codec: ASCII, colon-separated fields, one numeric kind
//! tag first, messages terminated by `\r\n`.
//!
//! Encoding never fails. Decoding returns an explicit error and never
//! panics; `Incomplete` means the caller should buffer more bytes rather
//! than treat the condition as fatal. Unknown trailing fields are ignored
//! so older decoders keep working against newer encoders.

use thiserror::Error;

use crate::kite::Kite;

/// Message terminator.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Why a byte sequence failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// No terminator yet; hold the bytes and retry once more arrive.
    #[error("message not yet terminated")]
    Incomplete,

    #[error("unknown message kind {0}")]
    UnknownKind(u32),

    #[error("wrong field count for message kind {kind}")]
    FieldCount { kind: u32 },

    #[error("malformed field: {0}")]
    BadField(String),
}

/// One kite's full wire-visible state.
#[derive(Debug, Clone, PartialEq)]
pub struct KiteState {
    pub kite_id: u32,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub color: u32,
    pub texture_id: u32,
    pub is_reversed: bool,
    pub is_active: bool,
}

impl From<&Kite> for KiteState {
    fn from(kite: &Kite) -> Self {
        Self {
            kite_id: kite.id.0,
            x: kite.center.x,
            y: kite.center.y,
            angle: kite.angle,
            color: kite.color,
            texture_id: kite.texture_id,
            is_reversed: kite.is_reversed,
            is_active: kite.is_active,
        }
    }
}

/// Every message kind of the sync protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Liveness/handshake greeting.
    Hello { greeting: String },

    /// A new kite was introduced.
    KiteAdd { client_index: u32, color: u32 },

    /// One kite's full pose, pushed by its owning client.
    KiteUpdate(KiteState),

    /// A kite left.
    ClientDisconnect { kite_id: u32 },

    /// Full snapshot sent to a newly connected client.
    ClientKites { kites: Vec<KiteState> },

    /// Full snapshot broadcast during playback.
    Kites { kites: Vec<KiteState> },

    /// Script progress notification.
    BlockFrameValue {
        script_id: u32,
        block_count: u32,
        block_index: u32,
    },

    /// How many scripts the server has loaded.
    ScriptAmount { count: u32 },

    /// Pause/resume playback.
    ScriptToggle { script_id: u32, running: bool },

    /// Skip to the next block.
    ScriptNext { script_id: u32 },

    /// Jump to a block index.
    ScriptScrub { script_id: u32, block_index: u32 },

    /// Playback reached its terminal state.
    ScriptFinished { script_id: u32 },
}

impl Message {
    /// Numeric kind tag, the first wire field.
    pub fn tag(&self) -> u32 {
        match self {
            Message::Hello { .. } => 0,
            Message::KiteAdd { .. } => 1,
            Message::KiteUpdate(_) => 2,
            Message::ClientDisconnect { .. } => 3,
            Message::ClientKites { .. } => 4,
            Message::Kites { .. } => 5,
            Message::BlockFrameValue { .. } => 6,
            Message::ScriptAmount { .. } => 7,
            Message::ScriptToggle { .. } => 8,
            Message::ScriptNext { .. } => 9,
            Message::ScriptScrub { .. } => 10,
            Message::ScriptFinished { .. } => 11,
        }
    }
}

fn push_kite_state(out: &mut String, k: &KiteState) {
    out.push_str(&format!(
        "{}:({},{}):{}:{}:{}:{}:{}:",
        k.kite_id,
        k.x,
        k.y,
        k.angle,
        k.color,
        k.texture_id,
        k.is_reversed as u8,
        k.is_active as u8,
    ));
}

/// Serialize a message, terminator included.
pub fn encode(message: &Message) -> Vec<u8> {
    let mut out = format!("{}:", message.tag());
    match message {
        Message::Hello { greeting } => {
            out.push_str(greeting);
            out.push(':');
        }
        Message::KiteAdd {
            client_index,
            color,
        } => out.push_str(&format!("{}:{}:", client_index, color)),
        Message::KiteUpdate(state) => push_kite_state(&mut out, state),
        Message::ClientDisconnect { kite_id } => out.push_str(&format!("{}:", kite_id)),
        Message::ClientKites { kites } | Message::Kites { kites } => {
            out.push_str(&format!("{}:", kites.len()));
            for k in kites {
                push_kite_state(&mut out, k);
            }
        }
        Message::BlockFrameValue {
            script_id,
            block_count,
            block_index,
        } => out.push_str(&format!("{}:{}:{}:", script_id, block_count, block_index)),
        Message::ScriptAmount { count } => out.push_str(&format!("{}:", count)),
        Message::ScriptToggle { script_id, running } => {
            out.push_str(&format!("{}:{}:", script_id, *running as u8))
        }
        Message::ScriptNext { script_id } => out.push_str(&format!("{}:", script_id)),
        Message::ScriptScrub {
            script_id,
            block_index,
        } => out.push_str(&format!("{}:{}:", script_id, block_index)),
        Message::ScriptFinished { script_id } => out.push_str(&format!("{}:", script_id)),
    }
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(TERMINATOR);
    bytes
}

struct Fields<'a> {
    kind: u32,
    iter: std::str::Split<'a, char>,
}

impl<'a> Fields<'a> {
    fn next(&mut self) -> Result<&'a str, DecodeError> {
        self.iter
            .next()
            .ok_or(DecodeError::FieldCount { kind: self.kind })
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let f = self.next()?;
        f.parse()
            .map_err(|_| DecodeError::BadField(f.to_string()))
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        let f = self.next()?;
        f.parse()
            .map_err(|_| DecodeError::BadField(f.to_string()))
    }

    fn bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u32()? != 0)
    }

    /// A parenthesized `(x,y)` pair.
    fn position(&mut self) -> Result<(f32, f32), DecodeError> {
        let f = self.next()?;
        let inner = f
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| DecodeError::BadField(f.to_string()))?;
        let (x, y) = inner
            .split_once(',')
            .ok_or_else(|| DecodeError::BadField(f.to_string()))?;
        let x = x
            .parse()
            .map_err(|_| DecodeError::BadField(f.to_string()))?;
        let y = y
            .parse()
            .map_err(|_| DecodeError::BadField(f.to_string()))?;
        Ok((x, y))
    }

    fn kite_state(&mut self) -> Result<KiteState, DecodeError> {
        let kite_id = self.u32()?;
        let (x, y) = self.position()?;
        Ok(KiteState {
            kite_id,
            x,
            y,
            angle: self.f32()?,
            color: self.u32()?,
            texture_id: self.u32()?,
            is_reversed: self.bool()?,
            is_active: self.bool()?,
        })
    }
}

/// Decode the first complete message in `buf`.
///
/// Returns the message plus the number of bytes consumed (terminator
/// included). `Incomplete` when no terminator has arrived yet.
pub fn decode(buf: &[u8]) -> Result<(Message, usize), DecodeError> {
    let end = buf
        .windows(TERMINATOR.len())
        .position(|w| w == TERMINATOR)
        .ok_or(DecodeError::Incomplete)?;
    let consumed = end + TERMINATOR.len();

    let line = std::str::from_utf8(&buf[..end])
        .map_err(|_| DecodeError::BadField("non-ascii bytes".to_string()))?;

    let mut iter = line.split(':');
    let tag_text = iter.next().unwrap_or("");
    let kind: u32 = tag_text
        .parse()
        .map_err(|_| DecodeError::BadField(tag_text.to_string()))?;

    let mut fields = Fields { kind, iter };
    let message = match kind {
        0 => Message::Hello {
            greeting: fields.next()?.to_string(),
        },
        1 => Message::KiteAdd {
            client_index: fields.u32()?,
            color: fields.u32()?,
        },
        2 => Message::KiteUpdate(fields.kite_state()?),
        3 => Message::ClientDisconnect {
            kite_id: fields.u32()?,
        },
        4 | 5 => {
            let count = fields.u32()?;
            let mut kites = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                kites.push(fields.kite_state()?);
            }
            if kind == 4 {
                Message::ClientKites { kites }
            } else {
                Message::Kites { kites }
            }
        }
        6 => Message::BlockFrameValue {
            script_id: fields.u32()?,
            block_count: fields.u32()?,
            block_index: fields.u32()?,
        },
        7 => Message::ScriptAmount {
            count: fields.u32()?,
        },
        8 => Message::ScriptToggle {
            script_id: fields.u32()?,
            running: fields.bool()?,
        },
        9 => Message::ScriptNext {
            script_id: fields.u32()?,
        },
        10 => Message::ScriptScrub {
            script_id: fields.u32()?,
            block_index: fields.u32()?,
        },
        11 => Message::ScriptFinished {
            script_id: fields.u32()?,
        },
        other => return Err(DecodeError::UnknownKind(other)),
    };
    // Remaining fields, if any, belong to a newer protocol revision and
    // are ignored.
    Ok((message, consumed))
}

/// Peel every complete message off the front of a receive buffer.
///
/// Undecodable lines are logged and skipped (the connection stays up);
/// an unterminated tail is left in place for the next read. Returns each
/// message together with its raw bytes for verbatim rebroadcast.
pub fn drain(buf: &mut Vec<u8>) -> Vec<(Message, Vec<u8>)> {
    let mut out = Vec::new();
    let mut offset = 0;
    loop {
        match decode(&buf[offset..]) {
            Ok((message, consumed)) => {
                let raw = buf[offset..offset + consumed].to_vec();
                offset += consumed;
                out.push((message, raw));
            }
            Err(DecodeError::Incomplete) => break,
            Err(err) => {
                // Skip the offending line, keep the connection.
                let skipped = buf[offset..]
                    .windows(TERMINATOR.len())
                    .position(|w| w == TERMINATOR)
                    .map(|p| p + TERMINATOR.len())
                    .unwrap_or(buf.len() - offset);
                log::warn!("dropping undecodable message ({}): {} bytes", err, skipped);
                offset += skipped;
            }
        }
    }
    buf.drain(..offset);
    out
}

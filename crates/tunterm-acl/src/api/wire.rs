//! Binary codec of the control messages.
//!
//! All integers are big-endian. Every message opens with a 6-byte header
//! (`msg_id: u16`, `context: u32`); replies echo the context.
//!
//! ```text
//! AddReplace (1)       is_ipv6 u8 | index u32 | count u32 | rule * count
//!   rule (45 bytes)    sw_if_index u32 | table_id u32 | proto u32 | nh [16]
//!                      | af u8 | dst [16]
//! Delete (2)           index u32
//! InterfaceAddDel (3)  is_add u8 | sw_if_index u32 | index u32
//!
//! replies (101..103)   retval i32 [| index u32 for AddReplace]
//! ```

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tunterm_types::{
    AddressFamily, IpAddress, ParseError, SwIfIndex, TableIndex, WIRE_ADDRESS_LEN,
};

use super::request::{ControlReply, ControlRequest};
use super::status::ApiStatus;
use crate::fib::RoutePathDescriptor;
use crate::table::TunTermRule;

pub const HEADER_LEN: usize = 6;
const ADD_REPLACE_FIXED_LEN: usize = HEADER_LEN + 1 + 4 + 4;
const DELETE_LEN: usize = HEADER_LEN + 4;
const INTERFACE_ADD_DEL_LEN: usize = HEADER_LEN + 1 + 4 + 4;

/// Encoded size of one rule.
pub const RULE_LEN: usize = 4 + 4 + 4 + WIRE_ADDRESS_LEN + 1 + WIRE_ADDRESS_LEN;

const REPLY_ID_OFFSET: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    AddReplace,
    Delete,
    InterfaceAddDel,
}

impl MessageKind {
    pub const fn id(&self) -> u16 {
        match self {
            MessageKind::AddReplace => 1,
            MessageKind::Delete => 2,
            MessageKind::InterfaceAddDel => 3,
        }
    }

    pub const fn reply_id(&self) -> u16 {
        self.id() + REPLY_ID_OFFSET
    }

    pub const fn from_id(id: u16) -> Option<Self> {
        match id {
            1 => Some(MessageKind::AddReplace),
            2 => Some(MessageKind::Delete),
            3 => Some(MessageKind::InterfaceAddDel),
            _ => None,
        }
    }

    pub const fn from_reply_id(id: u16) -> Option<Self> {
        match id.checked_sub(REPLY_ID_OFFSET) {
            Some(req) => Self::from_id(req),
            None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("message of {len} bytes is shorter than {need}")]
    Truncated { len: usize, need: usize },

    #[error("message is {actual} bytes, header and rule count call for at least {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("unhandled message id {0}")]
    UnhandledMessage(u16),

    #[error("address: {0}")]
    Address(#[from] ParseError),
}

/// Header common to requests and replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub kind: MessageKind,
    pub context: u32,
}

impl MessageHeader {
    /// Decodes a request header. Unknown ids fail fast.
    pub fn decode(msg: &[u8]) -> Result<Self, WireError> {
        let mut r = need(msg, HEADER_LEN)?;
        let id = r.read_u16::<BigEndian>().map_err(|_| truncated(msg, HEADER_LEN))?;
        let context = r.read_u32::<BigEndian>().map_err(|_| truncated(msg, HEADER_LEN))?;
        let kind = MessageKind::from_id(id).ok_or(WireError::UnhandledMessage(id))?;
        Ok(Self { kind, context })
    }
}

fn truncated(msg: &[u8], need: usize) -> WireError {
    WireError::Truncated {
        len: msg.len(),
        need,
    }
}

fn need(msg: &[u8], len: usize) -> Result<&[u8], WireError> {
    if msg.len() < len {
        Err(truncated(msg, len))
    } else {
        Ok(msg)
    }
}

/// Decodes a request. The buffer must hold the whole message.
pub fn decode_request(msg: &[u8]) -> Result<ControlRequest, WireError> {
    let header = MessageHeader::decode(msg)?;
    let context = header.context;
    let short = |need: usize| truncated(msg, need);

    match header.kind {
        MessageKind::AddReplace => {
            let mut r = &need(msg, ADD_REPLACE_FIXED_LEN)?[HEADER_LEN..];
            let is_ipv6 = r.read_u8().map_err(|_| short(ADD_REPLACE_FIXED_LEN))? != 0;
            let index = r.read_u32::<BigEndian>().map_err(|_| short(ADD_REPLACE_FIXED_LEN))?;
            let count = r.read_u32::<BigEndian>().map_err(|_| short(ADD_REPLACE_FIXED_LEN))?;

            let expected = (count as usize)
                .checked_mul(RULE_LEN)
                .and_then(|n| n.checked_add(ADD_REPLACE_FIXED_LEN))
                .unwrap_or(usize::MAX);
            // Bytes past the declared rules are ignored.
            if msg.len() < expected {
                return Err(WireError::LengthMismatch {
                    expected,
                    actual: msg.len(),
                });
            }

            let eof = short(expected);
            let rules = (0..count)
                .map(|_| decode_rule(&mut r, &eof))
                .collect::<Result<Vec<_>, _>>()?;

            Ok(ControlRequest::AddReplace {
                context,
                af: AddressFamily::from_is_ipv6(is_ipv6),
                table: TableIndex::from_wire(index),
                rules,
            })
        }
        MessageKind::Delete => {
            let mut r = &need(msg, DELETE_LEN)?[HEADER_LEN..];
            let index = r.read_u32::<BigEndian>().map_err(|_| short(DELETE_LEN))?;
            Ok(ControlRequest::Delete {
                context,
                table: TableIndex::from_wire(index),
            })
        }
        MessageKind::InterfaceAddDel => {
            let mut r = &need(msg, INTERFACE_ADD_DEL_LEN)?[HEADER_LEN..];
            let is_add = r.read_u8().map_err(|_| short(INTERFACE_ADD_DEL_LEN))? != 0;
            let sw_if_index = r.read_u32::<BigEndian>().map_err(|_| short(INTERFACE_ADD_DEL_LEN))?;
            let index = r.read_u32::<BigEndian>().map_err(|_| short(INTERFACE_ADD_DEL_LEN))?;
            Ok(ControlRequest::InterfaceAddDel {
                context,
                sw_if_index: SwIfIndex::from_wire(sw_if_index),
                table: TableIndex::from_wire(index),
                is_add,
            })
        }
    }
}

/// Decodes one rule; a short read reports `eof`.
fn decode_rule(r: &mut &[u8], eof: &WireError) -> Result<TunTermRule, WireError> {
    let sw_if_index = r.read_u32::<BigEndian>().map_err(|_| eof.clone())?;
    let table_id = r.read_u32::<BigEndian>().map_err(|_| eof.clone())?;
    let proto = r.read_u32::<BigEndian>().map_err(|_| eof.clone())?;
    let mut nh = [0u8; WIRE_ADDRESS_LEN];
    r.read_exact(&mut nh).map_err(|_| eof.clone())?;
    let af = r.read_u8().map_err(|_| eof.clone())?;
    let mut dst = [0u8; WIRE_ADDRESS_LEN];
    r.read_exact(&mut dst).map_err(|_| eof.clone())?;

    let proto = u8::try_from(proto).unwrap_or(u8::MAX);
    let next_hop = IpAddress::decode(proto, &nh)?;
    let dst = IpAddress::decode(af, &dst)?;

    Ok(TunTermRule {
        dst,
        paths: vec![RoutePathDescriptor {
            sw_if_index: SwIfIndex::from_wire(sw_if_index),
            table_id,
            next_hop,
        }],
    })
}

fn write_header(out: &mut Vec<u8>, id: u16, context: u32) {
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&context.to_be_bytes());
}

/// Encodes a request. Each rule carries its first path only.
pub fn encode_request(request: &ControlRequest) -> Vec<u8> {
    let mut out = Vec::new();
    match request {
        ControlRequest::AddReplace {
            context,
            af,
            table,
            rules,
        } => {
            out.reserve(ADD_REPLACE_FIXED_LEN + rules.len() * RULE_LEN);
            write_header(&mut out, MessageKind::AddReplace.id(), *context);
            out.push(u8::from(af.is_ipv6()));
            out.extend_from_slice(&TableIndex::to_wire(*table).to_be_bytes());
            out.extend_from_slice(&(rules.len() as u32).to_be_bytes());
            for rule in rules {
                encode_rule(&mut out, rule);
            }
        }
        ControlRequest::Delete { context, table } => {
            write_header(&mut out, MessageKind::Delete.id(), *context);
            out.extend_from_slice(&TableIndex::to_wire(*table).to_be_bytes());
        }
        ControlRequest::InterfaceAddDel {
            context,
            sw_if_index,
            table,
            is_add,
        } => {
            write_header(&mut out, MessageKind::InterfaceAddDel.id(), *context);
            out.push(u8::from(*is_add));
            out.extend_from_slice(&SwIfIndex::to_wire(*sw_if_index).to_be_bytes());
            out.extend_from_slice(&TableIndex::to_wire(*table).to_be_bytes());
        }
    }
    out
}

fn encode_rule(out: &mut Vec<u8>, rule: &TunTermRule) {
    let (sw_if_index, table_id, next_hop) = match rule.paths.first() {
        Some(p) => (p.sw_if_index, p.table_id, p.next_hop),
        None => (None, 0, rule.dst),
    };
    let (proto, nh) = next_hop.encode();
    let (af, dst) = rule.dst.encode();

    out.extend_from_slice(&SwIfIndex::to_wire(sw_if_index).to_be_bytes());
    out.extend_from_slice(&table_id.to_be_bytes());
    out.extend_from_slice(&u32::from(proto).to_be_bytes());
    out.extend_from_slice(&nh);
    out.push(af);
    out.extend_from_slice(&dst);
}

pub fn encode_reply(reply: &ControlReply) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 8);
    // Writes into a Vec cannot fail.
    let _ = out.write_u16::<BigEndian>(reply.kind.reply_id());
    let _ = out.write_u32::<BigEndian>(reply.context);
    let _ = out.write_i32::<BigEndian>(reply.status.retval());
    if reply.kind == MessageKind::AddReplace {
        let _ = out.write_u32::<BigEndian>(TableIndex::to_wire(reply.table));
    }
    out
}

pub fn decode_reply(msg: &[u8]) -> Result<ControlReply, WireError> {
    let mut r = need(msg, HEADER_LEN + 4)?;
    let short = |need: usize| truncated(msg, need);

    let id = r.read_u16::<BigEndian>().map_err(|_| short(HEADER_LEN))?;
    let kind = MessageKind::from_reply_id(id).ok_or(WireError::UnhandledMessage(id))?;
    let context = r.read_u32::<BigEndian>().map_err(|_| short(HEADER_LEN))?;
    let retval = r.read_i32::<BigEndian>().map_err(|_| short(HEADER_LEN + 4))?;
    let status = ApiStatus::from_retval(retval).ok_or(WireError::UnhandledMessage(id))?;
    let table = if kind == MessageKind::AddReplace {
        let index = r.read_u32::<BigEndian>().map_err(|_| short(HEADER_LEN + 8))?;
        TableIndex::from_wire(index)
    } else {
        None
    };

    Ok(ControlReply {
        kind,
        context,
        status,
        table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn add_replace(rules: Vec<TunTermRule>) -> ControlRequest {
        ControlRequest::AddReplace {
            context: 7,
            af: AddressFamily::V4,
            table: None,
            rules,
        }
    }

    fn rule(dst: &str, nh: &str) -> TunTermRule {
        TunTermRule::new(
            dst.parse().unwrap(),
            RoutePathDescriptor::via(SwIfIndex::new(2), nh.parse().unwrap()),
        )
    }

    #[test]
    fn test_rule_len() {
        assert_eq!(RULE_LEN, 45);
        let msg = encode_request(&add_replace(vec![rule("10.0.0.5", "192.168.1.1")]));
        assert_eq!(msg.len(), HEADER_LEN + 9 + 45);
    }

    #[test]
    fn test_add_replace_layout() {
        let msg = encode_request(&add_replace(vec![rule("10.0.0.5", "192.168.1.1")]));
        assert_eq!(&msg[..6], &[0, 1, 0, 0, 0, 7]);
        assert_eq!(msg[6], 0);
        assert_eq!(&msg[7..11], &[0xff; 4]);
        assert_eq!(&msg[11..15], &[0, 0, 0, 1]);
        assert_eq!(&msg[15..19], &[0, 0, 0, 2]);
        assert_eq!(&msg[27..31], &[192, 168, 1, 1]);
        assert_eq!(msg[43], 0);
        assert_eq!(&msg[44..48], &[10, 0, 0, 5]);
    }

    #[test]
    fn test_decode_add_replace() {
        let request = add_replace(vec![
            rule("10.0.0.5", "192.168.1.1"),
            rule("10.0.0.6", "192.168.1.2"),
        ]);
        assert_eq!(decode_request(&encode_request(&request)), Ok(request));
    }

    #[test]
    fn test_short_add_replace() {
        let mut msg = encode_request(&add_replace(vec![rule("10.0.0.5", "192.168.1.1")]));
        msg.pop();
        assert_eq!(
            decode_request(&msg),
            Err(WireError::LengthMismatch {
                expected: HEADER_LEN + 9 + 45,
                actual: HEADER_LEN + 9 + 44,
            })
        );
    }

    #[test]
    fn test_add_replace_ignores_trailing_bytes() {
        let request = add_replace(vec![rule("10.0.0.5", "192.168.1.1")]);
        let mut msg = encode_request(&request);
        msg.extend_from_slice(&[0; 4]);
        assert_eq!(decode_request(&msg), Ok(request));
    }

    #[test]
    fn test_huge_count_rejected() {
        let mut msg = encode_request(&add_replace(vec![]));
        msg[11..15].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            decode_request(&msg),
            Err(WireError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_address_family() {
        let mut msg = encode_request(&add_replace(vec![rule("10.0.0.5", "192.168.1.1")]));
        msg[43] = 9;
        assert_eq!(
            decode_request(&msg),
            Err(WireError::Address(ParseError::UnknownWireFamily(9)))
        );
    }

    #[test]
    fn test_unknown_message() {
        assert_eq!(
            decode_request(&[0, 42, 0, 0, 0, 1]),
            Err(WireError::UnhandledMessage(42))
        );
        assert_eq!(
            decode_request(&[0, 1]),
            Err(WireError::Truncated { len: 2, need: 6 })
        );
    }

    #[test]
    fn test_interface_add_del_sentinels() {
        let msg = [0, 3, 0, 0, 0, 1, 1, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 4];
        assert_eq!(
            decode_request(&msg),
            Ok(ControlRequest::InterfaceAddDel {
                context: 1,
                sw_if_index: None,
                table: Some(TableIndex::new(4)),
                is_add: true,
            })
        );
    }

    #[test]
    fn test_reply_encoding() {
        let reply = ControlReply {
            kind: MessageKind::AddReplace,
            context: 9,
            status: ApiStatus::InvalidValue2,
            table: None,
        };
        let bytes = encode_reply(&reply);
        assert_eq!(
            bytes,
            vec![0, 101, 0, 0, 0, 9, 0xff, 0xff, 0xff, 0xcb, 0xff, 0xff, 0xff, 0xff]
        );
        assert_eq!(decode_reply(&bytes), Ok(reply));

        let delete = ControlReply {
            kind: MessageKind::Delete,
            context: 1,
            status: ApiStatus::ResourceInUse,
            table: None,
        };
        assert_eq!(encode_reply(&delete).len(), 10);
        assert_eq!(decode_reply(&encode_reply(&delete)), Ok(delete));
    }
}

//! The wire message envelope and its typed payloads.
//!
//! Every frame on a peer stream is a 16-byte header (magic, type, size,
//! checksum) followed by the payload. The magic marker is the first 32 bits
//! of SHA-512("") and the checksum is the first 32 bits of SHA-512 over
//! magic, type, size, and payload.

use crate::account::Account;
use crate::block::{Block, MAX_BLOCK_SIZE};
use crate::codec::{read_digest, read_u32, write_digest, write_u32, Encodable};
use crate::digest::{Digest, DIGEST_LEN};
use crate::error::CodecError;
use crate::proposal::ProposalPayload;
use crate::transaction::Transaction;
use once_cell::sync::Lazy;
use std::fmt;

/// Protocol version advertised in VERSION.
pub const PROTOCOL_VERSION: u32 = 1;

/// Size of the wire envelope in bytes.
pub const MESSAGE_HEADER_LEN: usize = 16;

/// Maximum logical payload size (the block upper bound).
pub const MAX_MESSAGE_SIZE: usize = MAX_BLOCK_SIZE;

/// Framing marker: the first 32 bits of SHA-512 of the empty string,
/// interpreted little-endian.
pub static MESSAGE_MAGIC: Lazy<u32> = Lazy::new(|| {
    let digest = pqledger_crypto::hash::sha512(b"").unwrap_or([0u8; 64]);
    let [a, b, c, d, ..] = digest;
    u32::from_le_bytes([a, b, c, d])
});

/// Message types. The numeric value doubles as the processing priority:
/// lower values are handled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageType {
    Version = 0,
    Ack = 1,
    Inventory = 50,
    GetData = 51,
    Transaction = 100,
    Proposal = 101,
    Account = 102,
    Block = 103,
}

impl MessageType {
    pub fn from_u32(v: u32) -> Result<Self, CodecError> {
        match v {
            0 => Ok(MessageType::Version),
            1 => Ok(MessageType::Ack),
            50 => Ok(MessageType::Inventory),
            51 => Ok(MessageType::GetData),
            100 => Ok(MessageType::Transaction),
            101 => Ok(MessageType::Proposal),
            102 => Ok(MessageType::Account),
            103 => Ok(MessageType::Block),
            other => Err(CodecError::InvalidValue(format!(
                "unknown message type: {other}"
            ))),
        }
    }

    /// Processing priority; lower runs first.
    pub fn priority(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Version => "VERSION",
            MessageType::Ack => "ACK",
            MessageType::Inventory => "INVENTORY",
            MessageType::GetData => "GETDATA",
            MessageType::Transaction => "TRANSACTION",
            MessageType::Proposal => "BLOCK_PROPOSAL",
            MessageType::Account => "ACCOUNT",
            MessageType::Block => "BLOCK",
        };
        f.write_str(name)
    }
}

/// Role a peer advertises in VERSION.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Server = 0,
    Validator = 1,
}

impl NodeType {
    pub fn from_u32(v: u32) -> Result<Self, CodecError> {
        match v {
            0 => Ok(NodeType::Server),
            1 => Ok(NodeType::Validator),
            other => Err(CodecError::InvalidValue(format!(
                "unknown node type: {other}"
            ))),
        }
    }
}

/// VERSION payload: protocol version, node role, long-term peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionPayload {
    pub version: u32,
    pub node_type: NodeType,
    pub peer_id: Digest,
}

impl Encodable for VersionPayload {
    fn encoded_len(&self) -> Result<usize, CodecError> {
        Ok(4 + 4 + DIGEST_LEN)
    }

    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        write_u32(buf, offset, self.version)?;
        write_u32(buf, offset, self.node_type as u32)?;
        write_digest(buf, offset, &self.peer_id)
    }

    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        Ok(VersionPayload {
            version: read_u32(buf, offset)?,
            node_type: NodeType::from_u32(read_u32(buf, offset)?)?,
            peer_id: read_digest(buf, offset)?,
        })
    }
}

/// Inventory item kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvKind {
    Block = 0,
    Tx = 1,
    Account = 2,
}

impl InvKind {
    pub fn from_u32(v: u32) -> Result<Self, CodecError> {
        match v {
            0 => Ok(InvKind::Block),
            1 => Ok(InvKind::Tx),
            2 => Ok(InvKind::Account),
            other => Err(CodecError::InvalidValue(format!(
                "unknown inventory kind: {other}"
            ))),
        }
    }
}

/// A compact advertisement that the sender can supply the named object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvItem {
    pub kind: InvKind,
    pub id: Digest,
}

impl Encodable for InvItem {
    fn encoded_len(&self) -> Result<usize, CodecError> {
        Ok(4 + DIGEST_LEN)
    }

    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        write_u32(buf, offset, self.kind as u32)?;
        write_digest(buf, offset, &self.id)
    }

    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        Ok(InvItem {
            kind: InvKind::from_u32(read_u32(buf, offset)?)?,
            id: read_digest(buf, offset)?,
        })
    }
}

fn inv_list_len(items: &[InvItem]) -> usize {
    4 + items.len() * (4 + DIGEST_LEN)
}

fn encode_inv_list(
    items: &[InvItem],
    buf: &mut [u8],
    offset: &mut usize,
) -> Result<(), CodecError> {
    write_u32(buf, offset, items.len() as u32)?;
    for item in items {
        item.encode_into(buf, offset)?;
    }
    Ok(())
}

fn decode_inv_list(buf: &[u8], offset: &mut usize) -> Result<Vec<InvItem>, CodecError> {
    let count = read_u32(buf, offset)? as usize;
    if count > MAX_MESSAGE_SIZE / (4 + DIGEST_LEN) {
        return Err(CodecError::InvalidValue(format!(
            "inventory list claims {count} items"
        )));
    }
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(InvItem::decode_from(buf, offset)?);
    }
    Ok(items)
}

/// A typed message payload.
#[derive(Debug, Clone)]
pub enum Payload {
    Version(VersionPayload),
    Ack,
    Inventory(Vec<InvItem>),
    GetData(Vec<InvItem>),
    Transaction(Transaction),
    Proposal(ProposalPayload),
    Account(Account),
    Block(Block),
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Version(_) => MessageType::Version,
            Payload::Ack => MessageType::Ack,
            Payload::Inventory(_) => MessageType::Inventory,
            Payload::GetData(_) => MessageType::GetData,
            Payload::Transaction(_) => MessageType::Transaction,
            Payload::Proposal(_) => MessageType::Proposal,
            Payload::Account(_) => MessageType::Account,
            Payload::Block(_) => MessageType::Block,
        }
    }

    fn encoded_len(&self) -> Result<usize, CodecError> {
        match self {
            Payload::Version(v) => v.encoded_len(),
            Payload::Ack => Ok(0),
            Payload::Inventory(items) | Payload::GetData(items) => Ok(inv_list_len(items)),
            Payload::Transaction(tx) => tx.encoded_len(),
            Payload::Proposal(p) => p.encoded_len(),
            Payload::Account(a) => a.encoded_len(),
            Payload::Block(b) => b.encoded_len(),
        }
    }

    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        match self {
            Payload::Version(v) => v.encode_into(buf, offset),
            Payload::Ack => Ok(()),
            Payload::Inventory(items) | Payload::GetData(items) => {
                encode_inv_list(items, buf, offset)
            }
            Payload::Transaction(tx) => tx.encode_into(buf, offset),
            Payload::Proposal(p) => p.encode_into(buf, offset),
            Payload::Account(a) => a.encode_into(buf, offset),
            Payload::Block(b) => b.encode_into(buf, offset),
        }
    }

    pub fn decode(msg_type: MessageType, payload: &[u8]) -> Result<Payload, CodecError> {
        let mut offset = 0;
        let decoded = match msg_type {
            MessageType::Version => Payload::Version(VersionPayload::decode_from(payload, &mut offset)?),
            MessageType::Ack => Payload::Ack,
            MessageType::Inventory => Payload::Inventory(decode_inv_list(payload, &mut offset)?),
            MessageType::GetData => Payload::GetData(decode_inv_list(payload, &mut offset)?),
            MessageType::Transaction => {
                Payload::Transaction(Transaction::decode_from(payload, &mut offset)?)
            }
            MessageType::Proposal => {
                Payload::Proposal(ProposalPayload::decode_from(payload, &mut offset)?)
            }
            MessageType::Account => Payload::Account(Account::decode_from(payload, &mut offset)?),
            MessageType::Block => Payload::Block(Block::decode_from(payload, &mut offset)?),
        };
        if offset != payload.len() {
            return Err(CodecError::InvalidValue(
                "payload size does not match its message type".into(),
            ));
        }
        Ok(decoded)
    }
}

/// The 16-byte wire envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: u32,
    pub msg_type: MessageType,
    pub size: u32,
    pub checksum: u32,
}

impl MessageHeader {
    pub fn encode(&self) -> Result<[u8; MESSAGE_HEADER_LEN], CodecError> {
        let mut buf = [0u8; MESSAGE_HEADER_LEN];
        let mut offset = 0;
        write_u32(&mut buf, &mut offset, self.magic)?;
        write_u32(&mut buf, &mut offset, self.msg_type as u32)?;
        write_u32(&mut buf, &mut offset, self.size)?;
        write_u32(&mut buf, &mut offset, self.checksum)?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<MessageHeader, CodecError> {
        let mut offset = 0;
        Ok(MessageHeader {
            magic: read_u32(bytes, &mut offset)?,
            msg_type: MessageType::from_u32(read_u32(bytes, &mut offset)?)?,
            size: read_u32(bytes, &mut offset)?,
            checksum: read_u32(bytes, &mut offset)?,
        })
    }
}

/// First 32 bits of SHA-512 over magic, type, size, and payload.
fn message_checksum(msg_type: MessageType, payload: &[u8]) -> Result<u32, CodecError> {
    let mut covered = Vec::with_capacity(12 + payload.len());
    covered.extend_from_slice(&MESSAGE_MAGIC.to_le_bytes());
    covered.extend_from_slice(&(msg_type as u32).to_le_bytes());
    covered.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    covered.extend_from_slice(payload);
    let digest = pqledger_crypto::hash::sha512(&covered)?;
    let [a, b, c, d, ..] = digest;
    Ok(u32::from_le_bytes([a, b, c, d]))
}

/// A complete wire message.
#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Payload,
}

impl Message {
    pub fn new(payload: Payload) -> Message {
        Message { payload }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Serialize envelope and payload, computing the checksum.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let payload_len = self.payload.encoded_len()?;
        if payload_len > MAX_MESSAGE_SIZE {
            return Err(CodecError::InvalidValue(format!(
                "payload of {payload_len} bytes exceeds the message limit"
            )));
        }
        let mut payload = vec![0u8; payload_len];
        let mut offset = 0;
        self.payload.encode_into(&mut payload, &mut offset)?;

        let header = MessageHeader {
            magic: *MESSAGE_MAGIC,
            msg_type: self.message_type(),
            size: payload_len as u32,
            checksum: message_checksum(self.message_type(), &payload)?,
        };
        let mut frame = Vec::with_capacity(MESSAGE_HEADER_LEN + payload_len);
        frame.extend_from_slice(&header.encode()?);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Rebuild a message from a parsed header and its payload bytes,
    /// verifying size and checksum.
    pub fn decode(header: &MessageHeader, payload: &[u8]) -> Result<Message, CodecError> {
        if header.size as usize != payload.len() {
            return Err(CodecError::InvalidValue(
                "payload length does not match the envelope".into(),
            ));
        }
        if message_checksum(header.msg_type, payload)? != header.checksum {
            return Err(CodecError::ChecksumMismatch);
        }
        Ok(Message {
            payload: Payload::decode(header.msg_type, payload)?,
        })
    }
}

/// How a send request fans out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// To one confirmed peer.
    One(Digest),
    /// To every confirmed peer, optionally excluding the original sender.
    Broadcast { exclude: Option<Digest> },
    /// To every confirmed UNL peer, optionally excluding the original sender.
    UnlCast { exclude: Option<Digest> },
}

/// A send request for the connection manager.
#[derive(Debug, Clone)]
pub struct MessageRequest {
    pub mode: SendMode,
    pub message: Message,
}

/// A dial request for the connection manager.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionRequest {
    pub peer: Digest,
    /// Treat the connection as a UNL link once established.
    pub unl: bool,
}

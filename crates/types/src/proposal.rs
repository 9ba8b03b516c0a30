//! Consensus proposals.
//!
//! A round exchanges two proposal kinds over the same routing slot:
//! transaction-set proposals while positions converge, and block proposals
//! once a node accepts. Signatures cover a digest of the identifying fields,
//! not the carried body.

use crate::block::{BlockBody, BlockHeader};
use crate::codec::{
    read_bytes, read_digest, read_i64, read_u32, write_bytes, write_digest, write_i64, write_u32,
    Encodable,
};
use crate::digest::{Digest, DIGEST_LEN};
use crate::error::CodecError;
use pqledger_crypto::{CryptoError, SignatureScheme};

/// Wire tag distinguishing the two proposal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalKind {
    Block = 0,
    TxSet = 1,
}

impl ProposalKind {
    fn from_u32(v: u32) -> Result<Self, CodecError> {
        match v {
            0 => Ok(ProposalKind::Block),
            1 => Ok(ProposalKind::TxSet),
            other => Err(CodecError::InvalidValue(format!(
                "unknown proposal kind: {other}"
            ))),
        }
    }
}

/// A vote that a fully-formed block should become the next valid block.
#[derive(Debug, Clone, Default)]
pub struct BlockProposal {
    pub issuer: Digest,
    pub block_id: Digest,
    pub signature: Vec<u8>,
    pub header: BlockHeader,
}

impl BlockProposal {
    /// Digest the signature covers: kind, issuer, block id.
    pub fn signing_hash(&self) -> Result<Digest, CodecError> {
        let mut buf = vec![0u8; 4 + 2 * DIGEST_LEN];
        let mut offset = 0;
        write_u32(&mut buf, &mut offset, ProposalKind::Block as u32)?;
        write_digest(&mut buf, &mut offset, &self.issuer)?;
        write_digest(&mut buf, &mut offset, &self.block_id)?;
        Ok(Digest::sha512_of(&buf)?)
    }

    pub fn sign(
        &mut self,
        scheme: &dyn SignatureScheme,
        secret_key: &[u8],
    ) -> Result<(), CodecError> {
        let hash = self.signing_hash()?;
        self.signature = scheme
            .sign(secret_key, hash.as_bytes())
            .map_err(CodecError::from)?;
        Ok(())
    }

    pub fn verify(
        &self,
        scheme: &dyn SignatureScheme,
        public_key: &[u8],
    ) -> Result<(), CryptoError> {
        let hash = self
            .signing_hash()
            .map_err(|e| CryptoError::OperationFailed(e.to_string()))?;
        scheme.verify(public_key, &self.signature, hash.as_bytes())
    }

    /// Structural validity. The carried header must still have a zero
    /// account root: it is proposed before execution.
    pub fn check(&self) -> bool {
        !self.issuer.is_zero()
            && !self.block_id.is_zero()
            && !self.header.previous.is_zero()
            && !self.header.tx_root.is_zero()
            && self.header.account_root.is_zero()
            && self.header.sequence != 0
    }
}

impl Encodable for BlockProposal {
    fn encoded_len(&self) -> Result<usize, CodecError> {
        if self.signature.is_empty() {
            return Err(CodecError::MissingField("signature"));
        }
        Ok(4 + 2 * DIGEST_LEN + 4 + self.signature.len() + BlockHeader::ENCODED_LEN)
    }

    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        if self.signature.is_empty() {
            return Err(CodecError::MissingField("signature"));
        }
        write_u32(buf, offset, ProposalKind::Block as u32)?;
        write_digest(buf, offset, &self.issuer)?;
        write_digest(buf, offset, &self.block_id)?;
        write_u32(buf, offset, self.signature.len() as u32)?;
        write_bytes(buf, offset, &self.signature)?;
        self.header.encode_into(buf, offset)
    }

    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        let kind = ProposalKind::from_u32(read_u32(buf, offset)?)?;
        if kind != ProposalKind::Block {
            return Err(CodecError::InvalidValue("expected a block proposal".into()));
        }
        let issuer = read_digest(buf, offset)?;
        let block_id = read_digest(buf, offset)?;
        let sig_len = read_u32(buf, offset)? as usize;
        let signature = read_bytes(buf, offset, sig_len)?;
        let header = BlockHeader::decode_from(buf, offset)?;
        Ok(BlockProposal {
            issuer,
            block_id,
            signature,
            header,
        })
    }
}

/// A node's current position on the transaction set of the open round.
#[derive(Debug, Clone, Default)]
pub struct TxSetProposal {
    /// Per-issuer, per-round sequence; starts at 0 and increments on each
    /// re-proposal.
    pub seq: u32,
    /// Creation time, seconds since the Unix epoch.
    pub timestamp: i64,
    pub issuer: Digest,
    /// Merkle root of the proposed set: the set id.
    pub set_id: Digest,
    /// Id of the block this proposal builds on.
    pub previous_block: Digest,
    pub signature: Vec<u8>,
    /// The proposed set itself.
    pub body: BlockBody,
}

impl TxSetProposal {
    /// Digest the signature covers: kind, seq, time, issuer, set id,
    /// previous block id.
    pub fn signing_hash(&self) -> Result<Digest, CodecError> {
        let mut buf = vec![0u8; 4 + 4 + 8 + 3 * DIGEST_LEN];
        let mut offset = 0;
        write_u32(&mut buf, &mut offset, ProposalKind::TxSet as u32)?;
        write_u32(&mut buf, &mut offset, self.seq)?;
        write_i64(&mut buf, &mut offset, self.timestamp)?;
        write_digest(&mut buf, &mut offset, &self.issuer)?;
        write_digest(&mut buf, &mut offset, &self.set_id)?;
        write_digest(&mut buf, &mut offset, &self.previous_block)?;
        Ok(Digest::sha512_of(&buf)?)
    }

    pub fn sign(
        &mut self,
        scheme: &dyn SignatureScheme,
        secret_key: &[u8],
    ) -> Result<(), CodecError> {
        let hash = self.signing_hash()?;
        self.signature = scheme
            .sign(secret_key, hash.as_bytes())
            .map_err(CodecError::from)?;
        Ok(())
    }

    pub fn verify(
        &self,
        scheme: &dyn SignatureScheme,
        public_key: &[u8],
    ) -> Result<(), CryptoError> {
        let hash = self
            .signing_hash()
            .map_err(|e| CryptoError::OperationFailed(e.to_string()))?;
        scheme.verify(public_key, &self.signature, hash.as_bytes())
    }

    pub fn check(&self) -> bool {
        !self.issuer.is_zero()
            && self.timestamp != 0
            && !self.set_id.is_zero()
            && !self.previous_block.is_zero()
    }
}

impl Encodable for TxSetProposal {
    fn encoded_len(&self) -> Result<usize, CodecError> {
        if self.signature.is_empty() {
            return Err(CodecError::MissingField("signature"));
        }
        Ok(4 + 4 + 8 + 3 * DIGEST_LEN + 4 + self.signature.len() + self.body.encoded_len()?)
    }

    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        if self.signature.is_empty() {
            return Err(CodecError::MissingField("signature"));
        }
        write_u32(buf, offset, ProposalKind::TxSet as u32)?;
        write_u32(buf, offset, self.seq)?;
        write_i64(buf, offset, self.timestamp)?;
        write_digest(buf, offset, &self.issuer)?;
        write_digest(buf, offset, &self.set_id)?;
        write_digest(buf, offset, &self.previous_block)?;
        write_u32(buf, offset, self.signature.len() as u32)?;
        write_bytes(buf, offset, &self.signature)?;
        self.body.encode_into(buf, offset)
    }

    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        let kind = ProposalKind::from_u32(read_u32(buf, offset)?)?;
        if kind != ProposalKind::TxSet {
            return Err(CodecError::InvalidValue(
                "expected a transaction-set proposal".into(),
            ));
        }
        let seq = read_u32(buf, offset)?;
        let timestamp = read_i64(buf, offset)?;
        let issuer = read_digest(buf, offset)?;
        let set_id = read_digest(buf, offset)?;
        let previous_block = read_digest(buf, offset)?;
        let sig_len = read_u32(buf, offset)? as usize;
        let signature = read_bytes(buf, offset, sig_len)?;
        let body = BlockBody::decode_from(buf, offset)?;
        Ok(TxSetProposal {
            seq,
            timestamp,
            issuer,
            set_id,
            previous_block,
            signature,
            body,
        })
    }
}

/// Either proposal kind, dispatched on the leading tag.
#[derive(Debug, Clone)]
pub enum ProposalPayload {
    Block(BlockProposal),
    TxSet(TxSetProposal),
}

impl ProposalPayload {
    pub fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        let mut peek = *offset;
        match ProposalKind::from_u32(read_u32(buf, &mut peek)?)? {
            ProposalKind::Block => Ok(ProposalPayload::Block(BlockProposal::decode_from(
                buf, offset,
            )?)),
            ProposalKind::TxSet => Ok(ProposalPayload::TxSet(TxSetProposal::decode_from(
                buf, offset,
            )?)),
        }
    }

    pub fn encoded_len(&self) -> Result<usize, CodecError> {
        match self {
            ProposalPayload::Block(p) => p.encoded_len(),
            ProposalPayload::TxSet(p) => p.encoded_len(),
        }
    }

    pub fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        match self {
            ProposalPayload::Block(p) => p.encode_into(buf, offset),
            ProposalPayload::TxSet(p) => p.encode_into(buf, offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::GENESIS_BLOCK_ID;
    use pqledger_crypto::scheme_by_name;

    fn block_proposal() -> BlockProposal {
        let header = BlockHeader {
            version: 1,
            sequence: 1,
            size: 204,
            tx_root: Digest::sha512_of(b"txroot").unwrap(),
            previous: *GENESIS_BLOCK_ID,
            account_root: Digest::ZERO,
        };
        BlockProposal {
            issuer: Digest::sha512_of(b"issuer").unwrap(),
            block_id: header.hash().unwrap(),
            signature: vec![0x77; 64],
            header,
        }
    }

    fn txset_proposal() -> TxSetProposal {
        TxSetProposal {
            seq: 0,
            timestamp: 1_700_000_000,
            issuer: Digest::sha512_of(b"issuer").unwrap(),
            set_id: Digest::sha512_of(b"").unwrap(),
            previous_block: *GENESIS_BLOCK_ID,
            signature: vec![0x99; 64],
            body: BlockBody::default(),
        }
    }

    #[test]
    fn block_proposal_roundtrip() {
        let prop = block_proposal();
        let bytes = prop.encode_to_vec().unwrap();
        let back = BlockProposal::decode_exact(&bytes).unwrap();
        assert_eq!(back.block_id, prop.block_id);
        assert_eq!(back.header, prop.header);
        assert!(back.check());
    }

    #[test]
    fn txset_proposal_roundtrip() {
        let prop = txset_proposal();
        let bytes = prop.encode_to_vec().unwrap();
        let back = TxSetProposal::decode_exact(&bytes).unwrap();
        assert_eq!(back.set_id, prop.set_id);
        assert_eq!(back.seq, prop.seq);
        assert!(back.check());
    }

    #[test]
    fn unsigned_proposal_refuses_to_encode() {
        let mut prop = txset_proposal();
        prop.signature.clear();
        assert!(matches!(
            prop.encode_to_vec(),
            Err(CodecError::MissingField("signature"))
        ));
    }

    #[test]
    fn payload_dispatch_on_tag() {
        let bytes = block_proposal().encode_to_vec().unwrap();
        let mut offset = 0;
        assert!(matches!(
            ProposalPayload::decode_from(&bytes, &mut offset).unwrap(),
            ProposalPayload::Block(_)
        ));

        let bytes = txset_proposal().encode_to_vec().unwrap();
        let mut offset = 0;
        assert!(matches!(
            ProposalPayload::decode_from(&bytes, &mut offset).unwrap(),
            ProposalPayload::TxSet(_)
        ));
    }

    #[test]
    fn proposal_with_filled_account_root_fails_check() {
        let mut prop = block_proposal();
        prop.header.account_root = Digest::sha512_of(b"filled").unwrap();
        assert!(!prop.check());
    }

    #[test]
    fn sign_and_verify() {
        let scheme = scheme_by_name("ed25519").unwrap();
        let (sk, pk) = scheme.generate_keypair().unwrap();
        let mut prop = txset_proposal();
        prop.sign(scheme.as_ref(), &sk).unwrap();
        prop.verify(scheme.as_ref(), &pk).unwrap();

        prop.seq += 1;
        assert!(prop.verify(scheme.as_ref(), &pk).is_err());
    }
}

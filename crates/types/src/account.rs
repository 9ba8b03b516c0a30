//! Account projections.
//!
//! One logical account is stored as two projections so readers pull only
//! what they need: the balance projection feeds consensus and execution,
//! the address projection feeds the connection manager.

use crate::codec::{read_bytes, read_u32, write_bytes, write_u32, Encodable};
use crate::digest::Digest;
use crate::error::CodecError;
use pqledger_crypto::CryptoError;

/// Maximum number of endpoint strings kept for one account.
pub const MAX_ACCOUNT_ADDRESSES: usize = 10;

/// Balance projection: public key, balance, last executed sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountBalance {
    pub public_key: Vec<u8>,
    pub balance: u32,
    pub tx_sequence: u32,
}

impl AccountBalance {
    /// The account id is the digest of the account's public key.
    pub fn account_id(&self) -> Result<Digest, CryptoError> {
        Digest::sha512_of(&self.public_key)
    }
}

impl Encodable for AccountBalance {
    fn encoded_len(&self) -> Result<usize, CodecError> {
        if self.public_key.is_empty() {
            return Err(CodecError::MissingField("public key"));
        }
        Ok(4 + self.public_key.len() + 4 + 4)
    }

    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        if self.public_key.is_empty() {
            return Err(CodecError::MissingField("public key"));
        }
        write_u32(buf, offset, self.public_key.len() as u32)?;
        write_bytes(buf, offset, &self.public_key)?;
        write_u32(buf, offset, self.balance)?;
        write_u32(buf, offset, self.tx_sequence)
    }

    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        let key_len = read_u32(buf, offset)? as usize;
        let public_key = read_bytes(buf, offset, key_len)?;
        Ok(AccountBalance {
            public_key,
            balance: read_u32(buf, offset)?,
            tx_sequence: read_u32(buf, offset)?,
        })
    }
}

/// Address projection: up to [`MAX_ACCOUNT_ADDRESSES`] endpoint strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountAddresses {
    pub addresses: Vec<String>,
}

impl AccountAddresses {
    /// Addresses past the cap are not serialized.
    fn capped(&self) -> &[String] {
        self.addresses
            .get(..MAX_ACCOUNT_ADDRESSES.min(self.addresses.len()))
            .unwrap_or(&[])
    }
}

impl Encodable for AccountAddresses {
    fn encoded_len(&self) -> Result<usize, CodecError> {
        let mut len = 4usize;
        for addr in self.capped() {
            len = len
                .checked_add(4 + addr.len())
                .ok_or(CodecError::BufferTooSmall)?;
        }
        Ok(len)
    }

    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        let capped = self.capped();
        write_u32(buf, offset, capped.len() as u32)?;
        for addr in capped {
            write_u32(buf, offset, addr.len() as u32)?;
            write_bytes(buf, offset, addr.as_bytes())?;
        }
        Ok(())
    }

    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        let count = read_u32(buf, offset)? as usize;
        if count > MAX_ACCOUNT_ADDRESSES {
            return Err(CodecError::InvalidValue(format!(
                "account claims {count} addresses, cap is {MAX_ACCOUNT_ADDRESSES}"
            )));
        }
        let mut addresses = Vec::with_capacity(count);
        for _ in 0..count {
            let len = read_u32(buf, offset)? as usize;
            let bytes = read_bytes(buf, offset, len)?;
            let addr = String::from_utf8(bytes)
                .map_err(|e| CodecError::InvalidValue(format!("address is not utf-8: {e}")))?;
            addresses.push(addr);
        }
        Ok(AccountAddresses { addresses })
    }
}

/// Both projections joined, as carried by the ACCOUNT wire message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Account {
    pub balance: AccountBalance,
    pub addresses: AccountAddresses,
}

impl Account {
    pub fn account_id(&self) -> Result<Digest, CryptoError> {
        self.balance.account_id()
    }
}

impl Encodable for Account {
    fn encoded_len(&self) -> Result<usize, CodecError> {
        Ok(self.balance.encoded_len()? + self.addresses.encoded_len()?)
    }

    fn encode_into(&self, buf: &mut [u8], offset: &mut usize) -> Result<(), CodecError> {
        self.balance.encode_into(buf, offset)?;
        self.addresses.encode_into(buf, offset)
    }

    fn decode_from(buf: &[u8], offset: &mut usize) -> Result<Self, CodecError> {
        Ok(Account {
            balance: AccountBalance::decode_from(buf, offset)?,
            addresses: AccountAddresses::decode_from(buf, offset)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_account(n_addrs: usize) -> Account {
        Account {
            balance: AccountBalance {
                public_key: vec![0x42; 33],
                balance: 10_000,
                tx_sequence: 3,
            },
            addresses: AccountAddresses {
                addresses: (0..n_addrs).map(|i| format!("10.0.0.{i}")).collect(),
            },
        }
    }

    #[test]
    fn roundtrip_both_projections() {
        let acc = sample_account(3);
        let bytes = acc.encode_to_vec().unwrap();
        assert_eq!(Account::decode_exact(&bytes).unwrap(), acc);
    }

    #[test]
    fn empty_public_key_refuses_to_encode() {
        let mut acc = sample_account(0);
        acc.balance.public_key.clear();
        assert!(acc.encode_to_vec().is_err());
    }

    #[test]
    fn addresses_truncate_at_cap_on_encode() {
        let acc = sample_account(14);
        let bytes = acc.addresses.encode_to_vec().unwrap();
        let back = AccountAddresses::decode_exact(&bytes).unwrap();
        assert_eq!(back.addresses.len(), MAX_ACCOUNT_ADDRESSES);
    }

    #[test]
    fn decode_rejects_count_above_cap() {
        // Hand-build a projection claiming 11 entries.
        let mut buf = vec![0u8; 4];
        let mut offset = 0;
        crate::codec::write_u32(&mut buf, &mut offset, 11).unwrap();
        assert!(AccountAddresses::decode_exact(&buf).is_err());
    }

    #[test]
    fn account_id_is_key_digest() {
        let acc = sample_account(0);
        let expected = Digest::sha512_of(&acc.balance.public_key).unwrap();
        assert_eq!(acc.account_id().unwrap(), expected);
    }
}

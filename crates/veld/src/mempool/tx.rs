// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 veld contributors

//! Transactions as the mempool sees them.
//!
//! The core treats transaction contents as opaque: what matters is the
//! stable id, the fee (priority), the cached byte size (budget
//! accounting), and the submit/expiry clock. Equality and ordering come
//! from (fee DESC, txId ASC) so ties break deterministically.
//!
//! Timestamps are explicit `now_ms` parameters throughout, so tests own
//! the clock.

use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Transaction wire/decode failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    /// Buffer ended before a declared field.
    Truncated,
    /// A field violates its constraint.
    Malformed(&'static str),
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::Truncated => write!(f, "truncated transaction"),
            TxError::Malformed(field) => write!(f, "malformed transaction: {}", field),
        }
    }
}

impl std::error::Error for TxError {}

/// A pending transaction.
#[derive(Debug, Clone)]
pub struct Transaction {
    tx_id: String,
    sender: String,
    fee: u64,
    submit_ms: u64,
    expire_ms: u64,
    payload: Vec<u8>,
    /// Cached encoded size; budget accounting reads this constantly.
    size: usize,
}

impl Transaction {
    /// Fixed wire overhead: id len (2) + sender len (2) + fee (8) +
    /// submit (8) + expire (8) + payload len (4).
    const WIRE_OVERHEAD: usize = 2 + 2 + 8 + 8 + 8 + 4;

    /// Build a transaction. `tx_id` must be non-empty.
    pub fn new(
        tx_id: impl Into<String>,
        sender: impl Into<String>,
        fee: u64,
        submit_ms: u64,
        expire_ms: u64,
        payload: Vec<u8>,
    ) -> Result<Self, TxError> {
        let tx_id = tx_id.into();
        let sender = sender.into();
        if tx_id.is_empty() {
            return Err(TxError::Malformed("txId"));
        }
        if tx_id.len() > u16::MAX as usize || sender.len() > u16::MAX as usize {
            return Err(TxError::Malformed("field length"));
        }

        let size = Self::WIRE_OVERHEAD + tx_id.len() + sender.len() + payload.len();
        Ok(Self {
            tx_id,
            sender,
            fee,
            submit_ms,
            expire_ms,
            payload,
            size,
        })
    }

    /// Stable transaction id.
    #[must_use]
    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    /// Raw id bytes (shard hashing input).
    #[must_use]
    pub fn tx_id_bytes(&self) -> &[u8] {
        self.tx_id.as_bytes()
    }

    /// Submitting account.
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Priority fee.
    #[must_use]
    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// Submit timestamp (ms since epoch).
    #[must_use]
    pub fn submit_ms(&self) -> u64 {
        self.submit_ms
    }

    /// Cached byte size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Opaque payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the transaction expired as of `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.submit_ms.saturating_add(self.expire_ms)
    }

    /// Priority key for ordered containers.
    #[must_use]
    pub fn key(&self) -> TxKey {
        TxKey {
            fee: self.fee,
            tx_id: self.tx_id.clone(),
        }
    }

    /// Encode for the wire (big-endian, length-prefixed strings).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size);
        buf.extend_from_slice(&(self.tx_id.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.tx_id.as_bytes());
        buf.extend_from_slice(&(self.sender.len() as u16).to_be_bytes());
        buf.extend_from_slice(self.sender.as_bytes());
        buf.extend_from_slice(&self.fee.to_be_bytes());
        buf.extend_from_slice(&self.submit_ms.to_be_bytes());
        buf.extend_from_slice(&self.expire_ms.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode one transaction from bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, TxError> {
        fn take<'a>(buf: &'a [u8], off: &mut usize, n: usize) -> Result<&'a [u8], TxError> {
            let end = off.checked_add(n).ok_or(TxError::Truncated)?;
            if end > buf.len() {
                return Err(TxError::Truncated);
            }
            let slice = &buf[*off..end];
            *off = end;
            Ok(slice)
        }

        let mut off = 0;
        let id_len = u16::from_be_bytes(take(buf, &mut off, 2)?.try_into().unwrap_or_default());
        let tx_id = std::str::from_utf8(take(buf, &mut off, id_len as usize)?)
            .map_err(|_| TxError::Malformed("txId"))?
            .to_string();
        let sender_len = u16::from_be_bytes(take(buf, &mut off, 2)?.try_into().unwrap_or_default());
        let sender = std::str::from_utf8(take(buf, &mut off, sender_len as usize)?)
            .map_err(|_| TxError::Malformed("sender"))?
            .to_string();
        let fee = u64::from_be_bytes(take(buf, &mut off, 8)?.try_into().unwrap_or_default());
        let submit_ms = u64::from_be_bytes(take(buf, &mut off, 8)?.try_into().unwrap_or_default());
        let expire_ms = u64::from_be_bytes(take(buf, &mut off, 8)?.try_into().unwrap_or_default());
        let payload_len =
            u32::from_be_bytes(take(buf, &mut off, 4)?.try_into().unwrap_or_default());
        let payload = take(buf, &mut off, payload_len as usize)?.to_vec();

        if off != buf.len() {
            return Err(TxError::Malformed("trailing bytes"));
        }
        Self::new(tx_id, sender, fee, submit_ms, expire_ms, payload)
    }
}

/// Mempool equality: (fee, txId).
impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.fee == other.fee && self.tx_id == other.tx_id
    }
}

impl Eq for Transaction {}

/// Priority ordering key: fee DESC, txId ASC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxKey {
    fee: u64,
    tx_id: String,
}

impl TxKey {
    /// The transaction id half of the key.
    #[must_use]
    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    /// The fee half of the key.
    #[must_use]
    pub fn fee(&self) -> u64 {
        self.fee
    }
}

impl Ord for TxKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fee
            .cmp(&self.fee)
            .then_with(|| self.tx_id.cmp(&other.tx_id))
    }
}

impl PartialOrd for TxKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str, fee: u64) -> Transaction {
        Transaction::new(id, "alice", fee, 1000, 400, vec![0u8; 16]).unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let t = Transaction::new("tx-1", "bob", 77, 123456, 400, vec![9, 8, 7]).unwrap();
        let decoded = Transaction::decode(&t.encode()).unwrap();
        assert_eq!(decoded.tx_id(), "tx-1");
        assert_eq!(decoded.sender(), "bob");
        assert_eq!(decoded.fee(), 77);
        assert_eq!(decoded.submit_ms(), 123456);
        assert_eq!(decoded.payload(), &[9, 8, 7]);
        assert_eq!(decoded.size(), t.size());
    }

    #[test]
    fn test_size_is_encoded_length() {
        let t = tx("tx-size", 1);
        assert_eq!(t.size(), t.encode().len());
    }

    #[test]
    fn test_decode_rejects_truncation_everywhere() {
        let wire = tx("tx-cut", 5).encode();
        for cut in 0..wire.len() {
            assert!(Transaction::decode(&wire[..cut]).is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn test_empty_id_rejected() {
        assert_eq!(
            Transaction::new("", "a", 1, 0, 0, vec![]).unwrap_err(),
            TxError::Malformed("txId")
        );
    }

    #[test]
    fn test_expiry_clock() {
        let t = Transaction::new("tx-e", "a", 1, 1000, 400, vec![]).unwrap();
        assert!(!t.is_expired(1399));
        assert!(t.is_expired(1400));
        assert!(t.is_expired(9999));
    }

    #[test]
    fn test_key_orders_fee_desc_then_id_asc() {
        let high = tx("zzz", 100).key();
        let low_a = tx("aaa", 10).key();
        let low_b = tx("bbb", 10).key();

        let mut keys = vec![low_b.clone(), high.clone(), low_a.clone()];
        keys.sort();
        assert_eq!(keys, vec![high, low_a, low_b]);
    }

    #[test]
    fn test_equality_is_fee_and_id() {
        let a = tx("same", 5);
        let b = Transaction::new("same", "other-sender", 5, 9, 9, vec![1]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, tx("same", 6));
        assert_ne!(a, tx("different", 5));
    }
}

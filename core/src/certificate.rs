// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::block::{Height, Id};
use crate::error::{ConsensusError, ConsensusResult};

/// The hybrid certificate the overlay emits per finalized target: a
/// classical BLS aggregate and a post-quantum threshold certificate over the
/// same commit digest.
///
/// Wire layout, big-endian:
/// `len(bls_agg): u16 | bls_agg | len(pq_cert): u32 | pq_cert | target: 32 | height: u64`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertBundle {
    pub bls_agg: Bytes,
    pub pq_cert: Bytes,
    pub target: Id,
    pub height: Height,
}

impl CertBundle {
    pub fn encode(&self) -> ConsensusResult<Bytes> {
        if self.bls_agg.len() > u16::MAX as usize {
            return Err(ConsensusError::MalformedCertificate(format!(
                "bls aggregate of {} bytes does not fit the frame",
                self.bls_agg.len()
            )));
        }
        if self.pq_cert.len() > u32::MAX as usize {
            return Err(ConsensusError::MalformedCertificate(format!(
                "pq certificate of {} bytes does not fit the frame",
                self.pq_cert.len()
            )));
        }
        let mut buffer = BytesMut::with_capacity(2 + self.bls_agg.len() + 4 + self.pq_cert.len() + 40);
        buffer.put_u16(self.bls_agg.len() as u16);
        buffer.put_slice(&self.bls_agg);
        buffer.put_u32(self.pq_cert.len() as u32);
        buffer.put_slice(&self.pq_cert);
        buffer.put_slice(self.target.as_bytes());
        buffer.put_u64(self.height);
        Ok(buffer.freeze())
    }

    pub fn decode(encoded: &[u8]) -> ConsensusResult<Self> {
        let mut buffer = encoded;
        if buffer.remaining() < 2 {
            return Err(truncated("the bls aggregate length"));
        }
        let bls_len = buffer.get_u16() as usize;
        if buffer.remaining() < bls_len {
            return Err(truncated("the bls aggregate"));
        }
        let bls_agg = Bytes::copy_from_slice(&buffer[..bls_len]);
        buffer.advance(bls_len);

        if buffer.remaining() < 4 {
            return Err(truncated("the pq certificate length"));
        }
        let pq_len = buffer.get_u32() as usize;
        if buffer.remaining() < pq_len {
            return Err(truncated("the pq certificate"));
        }
        let pq_cert = Bytes::copy_from_slice(&buffer[..pq_len]);
        buffer.advance(pq_len);

        if buffer.remaining() != 32 + 8 {
            return Err(ConsensusError::MalformedCertificate(format!(
                "{} bytes left for target and height",
                buffer.remaining()
            )));
        }
        let mut target = [0; 32];
        buffer.copy_to_slice(&mut target);
        let height = buffer.get_u64();
        Ok(Self {
            bls_agg,
            pq_cert,
            target: Id::new(target),
            height,
        })
    }
}

fn truncated(field: &str) -> ConsensusError {
    ConsensusError::MalformedCertificate(format!("truncated inside {field}"))
}

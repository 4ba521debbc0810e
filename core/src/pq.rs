// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use fastcrypto::hash::HashFunction;
use lux_config::{DefaultHashFunction, NodeId};

use crate::error::{ConsensusError, ConsensusResult};

/// Post-quantum threshold signature scheme the overlay is parametric over
/// (Ringtail, ML-DSA based constructions, or equivalent). Implementations own
/// their key material; the overlay only moves opaque bytes.
pub trait PqScheme: Send + Sync + 'static {
    /// Produces the given validator's signature share over the message.
    fn sign_share(&self, node: &NodeId, message: &[u8]) -> ConsensusResult<Bytes>;

    /// Combines at least a threshold of shares into a certificate. Fails if
    /// a share does not verify or too few are present.
    fn finalize(&self, message: &[u8], shares: &[(NodeId, Bytes)]) -> ConsensusResult<Bytes>;

    /// Verifies a certificate against the scheme's group key.
    fn verify(&self, message: &[u8], certificate: &[u8]) -> bool;

    /// Canonical encoding of the group public key.
    fn group_key(&self) -> Bytes;
}

/// Deterministic stand-in scheme for tests: shares and certificates are
/// keyed hashes. Provides no security whatsoever.
pub struct TestPqScheme {
    secret: [u8; 32],
    threshold: usize,
}

impl TestPqScheme {
    pub fn new(secret: [u8; 32], threshold: usize) -> Self {
        assert!(threshold >= 1);
        Self { secret, threshold }
    }

    fn digest(&self, domain: &[u8], parts: &[&[u8]]) -> [u8; 32] {
        let mut hasher = DefaultHashFunction::new();
        hasher.update(self.secret);
        hasher.update(domain);
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().into()
    }
}

impl PqScheme for TestPqScheme {
    fn sign_share(&self, node: &NodeId, message: &[u8]) -> ConsensusResult<Bytes> {
        Ok(Bytes::copy_from_slice(&self.digest(
            b"share",
            &[node.as_bytes(), message],
        )))
    }

    fn finalize(&self, message: &[u8], shares: &[(NodeId, Bytes)]) -> ConsensusResult<Bytes> {
        if shares.len() < self.threshold {
            return Err(ConsensusError::MalformedCertificate(format!(
                "{} shares are under the threshold {}",
                shares.len(),
                self.threshold
            )));
        }
        for (node, share) in shares {
            let expected = self.digest(b"share", &[node.as_bytes(), message]);
            if share.as_ref() != expected {
                return Err(ConsensusError::MalformedCertificate(format!(
                    "share from {node} does not verify"
                )));
            }
        }
        Ok(Bytes::copy_from_slice(&self.digest(b"cert", &[message])))
    }

    fn verify(&self, message: &[u8], certificate: &[u8]) -> bool {
        certificate == self.digest(b"cert", &[message])
    }

    fn group_key(&self) -> Bytes {
        Bytes::copy_from_slice(&self.digest(b"group", &[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_finalize_and_verify() {
        let scheme = TestPqScheme::new([7; 32], 2);
        let message = b"finalized-target";
        let n1 = NodeId::new([1; 32]);
        let n2 = NodeId::new([2; 32]);

        let shares = vec![
            (n1, scheme.sign_share(&n1, message).unwrap()),
            (n2, scheme.sign_share(&n2, message).unwrap()),
        ];
        let certificate = scheme.finalize(message, &shares).unwrap();
        assert!(scheme.verify(message, &certificate));
        assert!(!scheme.verify(b"other-target", &certificate));
    }

    #[test]
    fn finalize_needs_threshold_and_valid_shares() {
        let scheme = TestPqScheme::new([7; 32], 2);
        let message = b"finalized-target";
        let n1 = NodeId::new([1; 32]);

        let one_share = vec![(n1, scheme.sign_share(&n1, message).unwrap())];
        assert!(scheme.finalize(message, &one_share).is_err());

        let forged = vec![
            (n1, scheme.sign_share(&n1, message).unwrap()),
            (NodeId::new([2; 32]), Bytes::from_static(&[0; 32])),
        ];
        assert!(scheme.finalize(message, &forged).is_err());
    }
}

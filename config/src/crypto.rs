// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Here we select the cryptographic types that are used by default in the code base.
//! The whole code base should only:
//! - refer to those aliases and not use the individual scheme implementations
//! - not use the schemes in a way that break genericity (e.g. using their Struct impl functions)
//! - swap one of those aliases to point to another type if necessary
//!
//! The post-quantum half of the hybrid certificate is deliberately not chosen
//! here: the core is parametric over it through its `PqScheme` port.

use fastcrypto::{
    bls12381, ed25519,
    error::FastCryptoError,
    hash::{Blake2b256, HashFunction},
    traits::{AggregateAuthenticator as _, KeyPair as _, Signer as _, ToFromBytes as _,
        VerifyingKey as _},
};
use serde::{Deserialize, Serialize};

/// Network key is the identity of a validator on the wire; node ids are its
/// public bytes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkPublicKey(ed25519::Ed25519PublicKey);
pub struct NetworkKeyPair(ed25519::Ed25519KeyPair);

impl NetworkPublicKey {
    pub fn new(key: ed25519::Ed25519PublicKey) -> Self {
        Self(key)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0 .0.to_bytes()
    }

    pub fn verify(
        &self,
        message: &[u8],
        signature: &NetworkKeySignature,
    ) -> Result<(), FastCryptoError> {
        self.0.verify(message, &signature.0)
    }
}

impl NetworkKeyPair {
    pub fn new(keypair: ed25519::Ed25519KeyPair) -> Self {
        Self(keypair)
    }

    pub fn generate<R: rand::Rng + fastcrypto::traits::AllowedRng>(rng: &mut R) -> Self {
        Self(ed25519::Ed25519KeyPair::generate(rng))
    }

    pub fn public(&self) -> NetworkPublicKey {
        NetworkPublicKey(self.0.public().clone())
    }

    pub fn sign(&self, message: &[u8]) -> NetworkKeySignature {
        NetworkKeySignature(self.0.sign(message))
    }
}

impl Clone for NetworkKeyPair {
    fn clone(&self) -> Self {
        Self(self.0.copy())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkKeySignature(ed25519::Ed25519Signature);

/// Authority key signs certificate commits; min-pk BLS so that aggregate
/// signatures are 96-byte compressed G2 points.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorityPublicKey(bls12381::min_pk::BLS12381PublicKey);
pub struct AuthorityKeyPair(bls12381::min_pk::BLS12381KeyPair);

impl AuthorityPublicKey {
    pub fn new(key: bls12381::min_pk::BLS12381PublicKey) -> Self {
        Self(key)
    }

    pub fn inner(&self) -> &bls12381::min_pk::BLS12381PublicKey {
        &self.0
    }

    pub fn to_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn verify(
        &self,
        message: &[u8],
        signature: &AuthoritySignature,
    ) -> Result<(), FastCryptoError> {
        self.0.verify(message, &signature.0)
    }
}

impl AuthorityKeyPair {
    pub fn new(keypair: bls12381::min_pk::BLS12381KeyPair) -> Self {
        Self(keypair)
    }

    pub fn generate<R: rand::Rng + fastcrypto::traits::AllowedRng>(rng: &mut R) -> Self {
        Self(bls12381::min_pk::BLS12381KeyPair::generate(rng))
    }

    pub fn public(&self) -> AuthorityPublicKey {
        AuthorityPublicKey(self.0.public().clone())
    }

    pub fn sign(&self, message: &[u8]) -> AuthoritySignature {
        AuthoritySignature(self.0.sign(message))
    }
}

impl Clone for AuthorityKeyPair {
    fn clone(&self) -> Self {
        Self(self.0.copy())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthoritySignature(bls12381::min_pk::BLS12381Signature);

impl AuthoritySignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FastCryptoError> {
        Ok(Self(bls12381::min_pk::BLS12381Signature::from_bytes(bytes)?))
    }

    pub fn to_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Aggregate of authority signatures over the same message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorityAggregateSignature(bls12381::min_pk::BLS12381AggregateSignature);

impl AuthorityAggregateSignature {
    pub fn aggregate(signatures: &[AuthoritySignature]) -> Result<Self, FastCryptoError> {
        Ok(Self(bls12381::min_pk::BLS12381AggregateSignature::aggregate(
            signatures.iter().map(|s| &s.0).collect::<Vec<_>>(),
        )?))
    }

    pub fn verify(
        &self,
        public_keys: &[AuthorityPublicKey],
        message: &[u8],
    ) -> Result<(), FastCryptoError> {
        let public_keys = public_keys.iter().map(|pk| pk.0.clone()).collect::<Vec<_>>();
        self.0.verify(&public_keys, message)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FastCryptoError> {
        Ok(Self(bls12381::min_pk::BLS12381AggregateSignature::from_bytes(bytes)?))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }
}

/// Defines algorithm and format of item and proposal digests.
pub type DefaultHashFunction = Blake2b256;
pub const DIGEST_LENGTH: usize = DefaultHashFunction::OUTPUT_SIZE;

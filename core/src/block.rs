// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{
    cell::OnceCell,
    fmt,
    hash::{Hash, Hasher},
};

use bytes::Bytes;
use fastcrypto::hash::HashFunction;
use lux_config::{DefaultHashFunction, DIGEST_LENGTH};
use serde::{Deserialize, Serialize};

/// Height of a block or vertex. Genesis items have height 0.
pub type Height = u64;

/// Poll round of a consensus instance.
pub type Round = u32;

/// Item timestamp in milliseconds.
pub type TimestampMs = u64;

/// 32-byte identifier of a block, vertex, or any other digest-addressed
/// value. Ids order lexicographically over their bytes; this ordering is what
/// every externally visible enumeration uses.
#[derive(Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Id([u8; DIGEST_LENGTH]);

impl Id {
    /// The distinguished "none" value.
    pub const EMPTY: Id = Id([0; DIGEST_LENGTH]);

    pub const MIN: Id = Id([u8::MIN; DIGEST_LENGTH]);
    pub const MAX: Id = Id([u8::MAX; DIGEST_LENGTH]);

    pub const NUM_BITS: usize = DIGEST_LENGTH * 8;

    pub const fn new(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// The i-th bit, most significant first, so that bit order agrees with
    /// the lexicographic order of ids.
    pub fn bit(&self, index: usize) -> u8 {
        (self.0[index / 8] >> (7 - (index % 8))) & 1
    }
}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(&self.0[..8]);
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "{}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, self.0)
        )
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{self:?}")
    }
}

/// A block of the linear chain. Its id is the digest of its contents, so a
/// block cannot be tampered with without changing identity.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct Block {
    parent: Id,
    height: Height,
    timestamp_ms: TimestampMs,
    payload: Bytes,

    #[serde(skip)]
    id: OnceCell<Id>,
}

impl Block {
    pub fn new(parent: Id, height: Height, timestamp_ms: TimestampMs, payload: Bytes) -> Self {
        Self {
            parent,
            height,
            timestamp_ms,
            payload,
            id: OnceCell::new(),
        }
    }

    /// The genesis block anchoring a chain.
    pub fn genesis() -> Self {
        Self::new(Id::EMPTY, 0, 0, Bytes::new())
    }

    pub fn id(&self) -> Id {
        *self.id.get_or_init(|| {
            let mut hasher = DefaultHashFunction::new();
            hasher.update(bcs::to_bytes(&self).expect("Serialization should not fail"));
            Id(hasher.finalize().into())
        })
    }

    pub fn parent(&self) -> Id {
        self.parent
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn timestamp_ms(&self) -> TimestampMs {
        self.timestamp_ms
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "B{}({},{})", self.height, self.id(), self.parent)
    }
}

/// Test builder for blocks, creating payloads that only need to differ per
/// test case.
pub struct TestBlock {
    block: Block,
}

impl TestBlock {
    pub fn new(parent: Id, height: Height) -> Self {
        Self {
            block: Block::new(parent, height, height * 10_000, Bytes::new()),
        }
    }

    pub fn set_timestamp_ms(mut self, timestamp_ms: TimestampMs) -> Self {
        self.block.timestamp_ms = timestamp_ms;
        self
    }

    pub fn set_payload(mut self, payload: Vec<u8>) -> Self {
        self.block.payload = payload.into();
        self
    }

    pub fn build(self) -> Block {
        Block {
            id: OnceCell::new(),
            ..self.block
        }
    }
}

// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{cell::OnceCell, fmt};

use bytes::Bytes;
use fastcrypto::hash::HashFunction;
use lux_config::DefaultHashFunction;
use serde::{Deserialize, Serialize};

use crate::block::{Height, Id, TimestampMs};

/// Reference to an unspent transaction output. Two vertices conflict iff
/// their input sets share a Utxo.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Utxo {
    pub tx: Id,
    pub index: u32,
}

impl Utxo {
    pub fn new(tx: Id, index: u32) -> Self {
        Self { tx, index }
    }
}

/// A vertex of the DAG. Vertices reference one or more parents and claim a
/// set of Utxo inputs; the id is the digest of the contents.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct Vertex {
    parents: Vec<Id>,
    height: Height,
    timestamp_ms: TimestampMs,
    inputs: Vec<Utxo>,
    outputs: Vec<Utxo>,
    payload: Bytes,

    #[serde(skip)]
    id: OnceCell<Id>,
}

impl Vertex {
    pub fn new(
        parents: Vec<Id>,
        height: Height,
        timestamp_ms: TimestampMs,
        inputs: Vec<Utxo>,
        outputs: Vec<Utxo>,
        payload: Bytes,
    ) -> Self {
        Self {
            parents,
            height,
            timestamp_ms,
            inputs,
            outputs,
            payload,
            id: OnceCell::new(),
        }
    }

    pub fn id(&self) -> Id {
        *self.id.get_or_init(|| {
            let mut hasher = DefaultHashFunction::new();
            hasher.update(bcs::to_bytes(&self).expect("Serialization should not fail"));
            Id::new(hasher.finalize().into())
        })
    }

    pub fn parents(&self) -> &[Id] {
        &self.parents
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn timestamp_ms(&self) -> TimestampMs {
        self.timestamp_ms
    }

    pub fn inputs(&self) -> &[Utxo] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Utxo] {
        &self.outputs
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

impl fmt::Debug for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "V{}({},{} parents)",
            self.height,
            self.id(),
            self.parents.len()
        )
    }
}

/// Test builder for vertices.
pub struct TestVertex {
    vertex: Vertex,
}

impl TestVertex {
    pub fn new(parents: Vec<Id>, height: Height) -> Self {
        Self {
            vertex: Vertex::new(parents, height, height * 10_000, vec![], vec![], Bytes::new()),
        }
    }

    pub fn set_inputs(mut self, inputs: Vec<Utxo>) -> Self {
        self.vertex.inputs = inputs;
        self
    }

    pub fn set_outputs(mut self, outputs: Vec<Utxo>) -> Self {
        self.vertex.outputs = outputs;
        self
    }

    pub fn set_payload(mut self, payload: Vec<u8>) -> Self {
        self.vertex.payload = payload.into();
        self
    }

    pub fn build(self) -> Vertex {
        Vertex {
            id: OnceCell::new(),
            ..self.vertex
        }
    }
}

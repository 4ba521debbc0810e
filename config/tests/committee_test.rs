// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use lux_config::{local_committee_and_keys, NodeId, Stake};

#[test]
fn committee_builder() {
    // GIVEN a committee of 9 validators with distinct stakes.
    let stakes = (1..=9).collect::<Vec<Stake>>();
    let (committee, key_pairs) = local_committee_and_keys(100, stakes);

    // THEN the committee fields are populated correctly.
    assert_eq!(committee.epoch(), 100);
    assert_eq!(committee.size(), 9);
    assert_eq!(committee.total_stake(), 45);
    assert_eq!(key_pairs.len(), 9);

    // AND enumeration is NodeId-ascending and consistent with lookups.
    let node_ids = committee.node_ids();
    let mut sorted = node_ids.clone();
    sorted.sort();
    assert_eq!(node_ids, sorted);
    for (node_id, authority) in committee.authorities() {
        assert_eq!(NodeId::from(&authority.network_key), *node_id);
        assert_eq!(committee.stake(node_id), Some(authority.stake));
        assert!(committee.contains(node_id));
    }

    // AND an unknown node is absent.
    assert!(!committee.contains(&NodeId::new([7; 32])));
    assert_eq!(committee.stake(&NodeId::new([7; 32])), None);
}

#[test]
fn node_id_tracks_network_key() {
    let (committee, key_pairs) = local_committee_and_keys(0, vec![1; 4]);
    for ((node_id, _), (network_keypair, _)) in committee.authorities().zip(key_pairs.iter()) {
        assert_eq!(*node_id.as_bytes(), network_keypair.public().to_bytes());
    }
}

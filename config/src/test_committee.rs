// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use rand::{rngs::StdRng, SeedableRng as _};

use crate::{AuthorityKeyPair, Committee, CommitteeBuilder, Epoch, NetworkKeyPair, Stake};

/// Creates a committee for local testing, and the corresponding key pairs for
/// the validators, in committee (NodeId-ascending) order.
pub fn local_committee_and_keys(
    epoch: Epoch,
    stakes: Vec<Stake>,
) -> (Committee, Vec<(NetworkKeyPair, AuthorityKeyPair)>) {
    let mut rng = StdRng::from_seed([0; 32]);
    let mut builder = CommitteeBuilder::new(epoch);
    let mut key_pairs = vec![];
    for (i, stake) in stakes.into_iter().enumerate() {
        let network_keypair = NetworkKeyPair::generate(&mut rng);
        let authority_keypair = AuthorityKeyPair::generate(&mut rng);
        builder.add_authority(
            stake,
            format!("test_host_{i}").to_string(),
            network_keypair.public(),
            authority_keypair.public(),
        );
        key_pairs.push((network_keypair, authority_keypair));
    }

    let committee = builder.build();
    // Committee iteration is id-ordered; report the key pairs the same way.
    key_pairs.sort_by_key(|(network, _)| network.public().to_bytes());
    (committee, key_pairs)
}

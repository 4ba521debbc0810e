// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use tokio::sync::broadcast;

use crate::block::Id;

const SIGNAL_CHANNEL_CAPACITY: usize = 1024;

/// Signals emitted by an engine when items reach a terminal state.
/// Accept signals for parents always precede their children's; rejected
/// siblings are signalled in id order.
pub struct CoreSignals {
    accepted_sender: broadcast::Sender<Id>,
    rejected_sender: broadcast::Sender<Id>,
}

impl CoreSignals {
    pub fn new() -> (Self, CoreSignalsReceivers) {
        let (accepted_sender, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        let (rejected_sender, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);

        let me = Self {
            accepted_sender: accepted_sender.clone(),
            rejected_sender: rejected_sender.clone(),
        };
        let receivers = CoreSignalsReceivers {
            accepted_sender,
            rejected_sender,
        };
        (me, receivers)
    }

    pub(crate) fn item_accepted(&self, id: Id) {
        // Failing to send only means nobody subscribed.
        self.accepted_sender.send(id).ok();
    }

    pub(crate) fn item_rejected(&self, id: Id) {
        self.rejected_sender.send(id).ok();
    }
}

/// Subscription side of [`CoreSignals`].
pub struct CoreSignalsReceivers {
    accepted_sender: broadcast::Sender<Id>,
    rejected_sender: broadcast::Sender<Id>,
}

impl CoreSignalsReceivers {
    pub fn accepted_receiver(&self) -> broadcast::Receiver<Id> {
        self.accepted_sender.subscribe()
    }

    pub fn rejected_receiver(&self) -> broadcast::Receiver<Id> {
        self.rejected_sender.subscribe()
    }
}

// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Round clock and poll lifecycle: samples a committee, fires the queries,
//! collects replies into a bag, and delivers the bag into the engine when
//! the poll completes or its deadline expires.
//!
//! The engine itself is synchronous; this task owns all the awaiting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lux_config::NodeId;
use parking_lot::RwLock;
use tokio::{
    sync::{mpsc, watch},
    time::{sleep_until, Instant},
};
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::emitter::Emitter;
use crate::engine::Engine;
use crate::error::ConsensusError;
use crate::network::{NetworkClient, QueryEvent, RequestId};
use crate::vote_bag::VoteBag;

/// Starting per-request timeout before any latency has been observed.
const INITIAL_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Headroom over the observed p95 latency.
const TIMEOUT_P95_MULTIPLIER: f64 = 1.25;
/// Latency observations kept for the percentile estimate.
const TIMEOUT_WINDOW: usize = 64;

/// Handle to the scheduling task. Dropping it without calling
/// [`Scheduler::stop`] aborts the task.
pub struct Scheduler {
    shutdown_sender: watch::Sender<bool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns the round clock over the given engine. `replies` is the
    /// transport's inbound event channel.
    pub fn start<E: Engine, C: NetworkClient>(
        context: Arc<Context>,
        engine: Arc<RwLock<E>>,
        emitter: Arc<Emitter>,
        network: Arc<C>,
        replies: mpsc::UnboundedReceiver<QueryEvent>,
    ) -> Self {
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let task = SchedulerTask {
            context,
            engine,
            emitter,
            network,
            timeout: AdaptiveTimeout::new(
                INITIAL_REQUEST_TIMEOUT,
                MIN_REQUEST_TIMEOUT,
                MAX_REQUEST_TIMEOUT,
            ),
            polls: HashMap::new(),
            next_request_id: 1,
            round: 0,
        };
        let handle = tokio::spawn(task.run(replies, shutdown_receiver));
        Self {
            shutdown_sender,
            handle: Some(handle),
        }
    }

    /// Cancels outstanding poll timers and waits for in-flight poll handling
    /// to drain. Idempotent.
    pub async fn stop(&mut self) {
        self.shutdown_sender.send(true).ok();
        if let Some(handle) = self.handle.take() {
            handle.await.ok();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// One outstanding poll: the request fanned out to a committee.
struct PollSet {
    bag: VoteBag,
    /// Peers still expected to answer, with the query send time.
    pending: HashMap<NodeId, Instant>,
    deadline: Instant,
}

struct SchedulerTask<E: Engine, C: NetworkClient> {
    context: Arc<Context>,
    engine: Arc<RwLock<E>>,
    emitter: Arc<Emitter>,
    network: Arc<C>,
    timeout: AdaptiveTimeout,
    polls: HashMap<RequestId, PollSet>,
    next_request_id: RequestId,
    round: u64,
}

impl<E: Engine, C: NetworkClient> SchedulerTask<E, C> {
    async fn run(
        mut self,
        mut replies: mpsc::UnboundedReceiver<QueryEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut round_interval =
            tokio::time::interval(self.context.parameters.min_round_interval.max(
                Duration::from_millis(1),
            ));
        round_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let next_deadline = self.polls.values().map(|poll| poll.deadline).min();
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Scheduler is shutting down");
                    return;
                }
                _ = round_interval.tick() => {
                    if self.start_round().await.is_err() {
                        return;
                    }
                }
                event = replies.recv() => {
                    let Some(event) = event else {
                        info!("Reply channel closed, scheduler is shutting down");
                        return;
                    };
                    if self.handle_event(event).is_err() {
                        return;
                    }
                }
                _ = sleep_until_or_forever(next_deadline) => {
                    if self.expire_polls().is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Starts one poll round: sample a committee, fan out the query for our
    /// current preference. Skipped while `concurrent_repolls` polls are in
    /// flight or there is nothing processing.
    async fn start_round(&mut self) -> Result<(), ()> {
        if self.polls.len() >= self.context.parameters.concurrent_repolls as usize {
            return Ok(());
        }
        let (target, processing, height) = {
            let engine = self.engine.read();
            (engine.preference(), engine.num_processing(), engine.height())
        };
        if processing == 0 {
            return Ok(());
        }

        self.round += 1;
        self.context.metrics.current_round.set(self.round as i64);
        let committee = match self.emitter.emit(self.context.parameters.k, self.round, height) {
            Ok(committee) => committee,
            Err(ConsensusError::InsufficientPeers { found, required }) => {
                warn!("Skipping round {}: {found} peers of {required} required", self.round);
                self.context.metrics.insufficient_peer_rounds.inc();
                return Ok(());
            }
            Err(error) => {
                error!("Emitter failed: {error}");
                return Err(());
            }
        };

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let now = Instant::now();
        let mut poll = PollSet {
            bag: VoteBag::new(),
            pending: HashMap::new(),
            deadline: now + self.timeout.current(),
        };
        debug!(
            "Round {} polls {} peers about {target} with request {request_id}",
            self.round,
            committee.len()
        );
        for peer in committee {
            match self
                .network
                .send_query(peer, self.context.chain, request_id, target)
                .await
            {
                Ok(()) => {
                    poll.pending.insert(peer, now);
                }
                Err(error) => {
                    debug!("Query to {peer} failed to send: {error}");
                    self.emitter.report(peer, false);
                }
            }
        }

        if poll.pending.is_empty() {
            return self.deliver(request_id, poll.bag);
        }
        self.polls.insert(request_id, poll);
        Ok(())
    }

    fn handle_event(&mut self, event: QueryEvent) -> Result<(), ()> {
        let request_id = match &event {
            QueryEvent::Reply { request_id, .. } | QueryEvent::Dropped { request_id, .. } => {
                *request_id
            }
        };
        match event {
            QueryEvent::Reply {
                peer,
                request_id,
                preference,
            } => {
                let Some(poll) = self.polls.get_mut(&request_id) else {
                    // Late or unknown reply; the poll already completed.
                    return Ok(());
                };
                let Some(sent_at) = poll.pending.remove(&peer) else {
                    return Ok(());
                };
                let latency = sent_at.elapsed();
                self.timeout.observe(latency);
                self.context
                    .metrics
                    .query_latency
                    .observe(latency.as_secs_f64());
                self.emitter.observe_latency(peer, latency.as_secs_f64() * 1000.0);
                self.emitter.report(peer, true);
                poll.bag.add(preference);
            }
            QueryEvent::Dropped { peer, request_id } => {
                let Some(poll) = self.polls.get_mut(&request_id) else {
                    return Ok(());
                };
                if poll.pending.remove(&peer).is_some() {
                    self.emitter.report(peer, false);
                }
            }
        }

        if self
            .polls
            .get(&request_id)
            .is_some_and(|poll| poll.pending.is_empty())
        {
            let poll = self.polls.remove(&request_id).expect("Poll was just found");
            return self.deliver(request_id, poll.bag);
        }
        Ok(())
    }

    /// Completes every poll whose deadline passed with the votes gathered so
    /// far; peers that never answered count as timeouts.
    fn expire_polls(&mut self) -> Result<(), ()> {
        let now = Instant::now();
        let expired: Vec<RequestId> = self
            .polls
            .iter()
            .filter(|(_, poll)| poll.deadline <= now)
            .map(|(request_id, _)| *request_id)
            .collect();
        for request_id in expired {
            let poll = self.polls.remove(&request_id).expect("Expired poll exists");
            for peer in poll.pending.keys() {
                debug!("Request {request_id} to {peer} timed out");
                self.context.metrics.poll_timeouts.inc();
                self.emitter.report(*peer, false);
            }
            // A timeout is also a latency signal, pushing the deadline out.
            self.timeout.observe(self.timeout.current());
            self.deliver(request_id, poll.bag)?;
        }
        Ok(())
    }

    /// Hands a completed poll's bag to the engine. A storage failure halts
    /// this instance.
    fn deliver(&mut self, request_id: RequestId, bag: VoteBag) -> Result<(), ()> {
        match self.engine.write().record_poll(request_id, bag) {
            Ok(_) => Ok(()),
            Err(error) => {
                error!("Engine failed on poll {request_id}, halting: {error}");
                Err(())
            }
        }
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

/// Per-request timeout controller targeting the p95 of observed latencies.
struct AdaptiveTimeout {
    samples: Vec<Duration>,
    next_slot: usize,
    current: Duration,
    min: Duration,
    max: Duration,
}

impl AdaptiveTimeout {
    fn new(initial: Duration, min: Duration, max: Duration) -> Self {
        Self {
            samples: Vec::with_capacity(TIMEOUT_WINDOW),
            next_slot: 0,
            current: initial.clamp(min, max),
            min,
            max,
        }
    }

    fn current(&self) -> Duration {
        self.current
    }

    fn observe(&mut self, sample: Duration) {
        if self.samples.len() < TIMEOUT_WINDOW {
            self.samples.push(sample);
        } else {
            self.samples[self.next_slot] = sample;
        }
        self.next_slot = (self.next_slot + 1) % TIMEOUT_WINDOW;

        let mut sorted = self.samples.clone();
        sorted.sort();
        let p95 = sorted[(sorted.len() * 95 / 100).min(sorted.len() - 1)];
        self.current = p95.mul_f64(TIMEOUT_P95_MULTIPLIER).clamp(self.min, self.max);
    }
}

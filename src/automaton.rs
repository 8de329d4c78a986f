use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Debug, Display};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::{MetricEvent, Metrics};

/// An effect requested by an [`Automaton`] while handling a message.
pub enum Outgoing<K, M, T> {
    /// Deliver a message to a peer (which may be the sender itself). Sends
    /// are fire-and-forget: completion is only ever observed through a
    /// message the receiver sends back.
    Send(K, M),
    /// Contribute a fixed-size array to the global reduction named by the
    /// tag. The reduction completes when every peer in the group has
    /// contributed, and its elementwise sum is then delivered to every peer
    /// as a message built by [`Automaton::reduced`].
    Contribute(T, Vec<f64>),
}

/// Order in which the executor delivers queued messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    /// First in, first out.
    Fifo,
    /// Any queued message may be delivered next, chosen by a seeded random
    /// number generator.
    Shuffled { seed: u64 },
    /// In rounds: every peer with queued messages handles them on the Rayon
    /// thread pool, then the resulting sends are queued for the next round.
    Parallel,
}

/// An agent in a group of peers that communicate only by passing messages.
/// Peers own their data; a message transfers ownership of its contents to
/// the recipient, and nothing is shared between peers. Each peer is a state
/// machine: the executor calls [`Automaton::start`] once on every peer,
/// then delivers messages one at a time until no messages remain, at which
/// point every peer must report that it is finished.
///
/// Errors returned from `start` or `receive` abandon the whole run.
///
pub trait Automaton: Sized {
    /// The type of the key to uniquely identify this automaton within a
    /// group.
    type Key: Clone + Ord + Display;

    /// The type of a message to be passed between the automata.
    type Message;

    /// The type of the tag naming a global reduction.
    type Tag: Clone + Ord + Debug;

    /// The type of the value yielded by this automaton when the run ends.
    type Value;

    /// Return the key to uniquely identify this automaton within the group.
    fn key(&self) -> Self::Key;

    /// Begin executing. This is called on every peer before any message is
    /// delivered.
    fn start(&mut self) -> Result<Vec<Outgoing<Self::Key, Self::Message, Self::Tag>>>;

    /// Handle one message, returning the effects it triggers.
    fn receive(&mut self, message: Self::Message) -> Result<Vec<Outgoing<Self::Key, Self::Message, Self::Tag>>>;

    /// Wrap the result of a completed reduction in a message.
    fn reduced(tag: Self::Tag, values: &[f64]) -> Self::Message;

    /// Whether this peer has reached a terminal state.
    fn is_finished(&self) -> bool;

    /// Consume the peer, yielding its result.
    fn value(self) -> Self::Value;
}

type Effects<A> = Vec<Outgoing<<A as Automaton>::Key, <A as Automaton>::Message, <A as Automaton>::Tag>>;




/**
 * Run a group of automata to completion, delivering messages in the given
 * order. Reductions are summed in key order, so every delivery order
 * produces the same reduced values. Values are returned in key order.
 */
pub fn execute<A>(group: Vec<A>, delivery: Delivery, metrics: &Arc<Metrics>) -> Result<Vec<A::Value>>
where
    A: Automaton + Send,
    A::Key: Send + Sync,
    A::Message: Send,
    A::Tag: Send,
{
    let result = run(group, delivery, metrics);

    if let Err(error) = &result {
        log::error!("execution abandoned: {}", error);
    }
    result
}

fn run<A>(group: Vec<A>, delivery: Delivery, metrics: &Arc<Metrics>) -> Result<Vec<A::Value>>
where
    A: Automaton + Send,
    A::Key: Send + Sync,
    A::Message: Send,
    A::Tag: Send,
{
    let mut coordinator = Coordinator::new(group, metrics);
    let mut initial = Vec::new();

    for slot in 0..coordinator.peers.len() {
        let effects = coordinator.peers[slot].start()?;
        initial.extend(coordinator.dispatch(slot, effects)?);
    }
    log::debug!("starting {} peers with {:?} delivery", coordinator.peers.len(), delivery);

    match delivery {
        Delivery::Fifo => {
            let mut queue: VecDeque<_> = initial.into();

            while let Some((slot, message)) = queue.pop_front() {
                let effects = coordinator.peers[slot].receive(message)?;
                queue.extend(coordinator.dispatch(slot, effects)?);
            }
        }
        Delivery::Shuffled { seed } => {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut queue = initial;

            while !queue.is_empty() {
                let (slot, message) = queue.swap_remove(rng.gen_range(0..queue.len()));
                let effects = coordinator.peers[slot].receive(message)?;
                queue.extend(coordinator.dispatch(slot, effects)?);
            }
        }
        Delivery::Parallel => {
            let mut queue = initial;

            while !queue.is_empty() {
                let mut inboxes: Vec<Vec<A::Message>> = coordinator.peers.iter().map(|_| Vec::new()).collect();

                for (slot, message) in queue.drain(..) {
                    inboxes[slot].push(message)
                }
                for (slot, effects) in deliver_par(&mut coordinator.peers, inboxes)? {
                    queue.extend(coordinator.dispatch(slot, effects)?);
                }
            }
        }
    }
    coordinator.finish()
}

/// Deliver each peer's inbox on the Rayon pool. Effects are gathered
/// through a channel and returned in slot order.
fn deliver_par<A>(peers: &mut [A], inboxes: Vec<Vec<A::Message>>) -> Result<Vec<(usize, Effects<A>)>>
where
    A: Automaton + Send,
    A::Key: Send + Sync,
    A::Message: Send,
    A::Tag: Send,
{
    use rayon::prelude::*;

    let (sink, source) = crossbeam_channel::unbounded();

    peers
        .par_iter_mut()
        .zip(inboxes.into_par_iter())
        .enumerate()
        .filter(|(_, (_, inbox))| !inbox.is_empty())
        .for_each_with(sink, |sink, (slot, (peer, inbox))| {
            let mut effects = Vec::new();
            let mut result = Ok(());

            for message in inbox {
                match peer.receive(message) {
                    Ok(e) => effects.extend(e),
                    Err(error) => {
                        result = Err(error);
                        break;
                    }
                }
            }
            // The receiver outlives the pool.
            let _ = sink.send((slot, result.map(|_| effects)));
        });

    let mut delivered: Vec<_> = source.into_iter().collect();
    delivered.sort_by_key(|(slot, _)| *slot);
    delivered.into_iter().map(|(slot, effects)| Ok((slot, effects?))).collect()
}




/**
 * Routes the effects of each delivery: sends become queue entries and
 * contributions are accumulated until their reduction completes.
 */
struct Coordinator<A: Automaton> {
    peers: Vec<A>,
    slots: BTreeMap<A::Key, usize>,
    reductions: BTreeMap<A::Tag, BTreeMap<A::Key, Vec<f64>>>,
    metrics: Arc<Metrics>,
}




// ============================================================================
impl<A: Automaton> Coordinator<A> {


    fn new(mut peers: Vec<A>, metrics: &Arc<Metrics>) -> Self {
        peers.sort_by_key(|a| a.key());
        let slots = peers.iter().enumerate().map(|(n, a)| (a.key(), n)).collect();
        Self {
            peers,
            slots,
            reductions: BTreeMap::new(),
            metrics: Arc::clone(metrics),
        }
    }

    fn dispatch(&mut self, from: usize, effects: Effects<A>) -> Result<Vec<(usize, A::Message)>> {
        let mut queued = Vec::new();

        for effect in effects {
            match effect {
                Outgoing::Send(key, message) => {
                    let slot = *self.slots.get(&key).ok_or_else(|| Error::UnknownBlock(key.to_string()))?;
                    self.metrics.record(MetricEvent::MessageSent);
                    queued.push((slot, message));
                }
                Outgoing::Contribute(tag, values) => {
                    if let Some(sum) = self.contribute(from, tag.clone(), values)? {
                        self.metrics.record(MetricEvent::ReductionCompleted);
                        log::debug!("reduction {:?} complete: {:?}", tag, sum);

                        for slot in 0..self.peers.len() {
                            queued.push((slot, A::reduced(tag.clone(), &sum)));
                        }
                    }
                }
            }
        }
        Ok(queued)
    }

    fn contribute(&mut self, from: usize, tag: A::Tag, values: Vec<f64>) -> Result<Option<Vec<f64>>> {
        let key = self.peers[from].key();
        let open = self.reductions.entry(tag.clone()).or_default();

        if open.contains_key(&key) {
            return Err(Error::DuplicateContribution(key.to_string(), format!("{:?}", tag)));
        }
        open.insert(key, values);

        if open.len() < self.peers.len() {
            return Ok(None);
        }
        let mut sum: Vec<f64> = Vec::new();

        for values in self.reductions.remove(&tag).into_iter().flat_map(|open| open.into_values()) {
            if sum.len() < values.len() {
                sum.resize(values.len(), 0.0);
            }
            for (s, v) in sum.iter_mut().zip(values) {
                *s += v
            }
        }
        Ok(Some(sum))
    }

    fn finish(self) -> Result<Vec<A::Value>> {
        let unfinished = self.peers.iter().filter(|a| !a.is_finished()).count();

        if unfinished > 0 {
            return Err(Error::Stalled(unfinished));
        }
        Ok(self.peers.into_iter().map(Automaton::value).collect())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    /// Each peer passes a token around a ring `laps` times, then all peers
    /// sum their keys in a reduction and finish.
    struct Ring {
        key: u32,
        size: u32,
        laps: u32,
        seen: u32,
        total: Option<f64>,
    }

    enum RingMessage {
        Token,
        Total(f64),
    }

    impl Automaton for Ring {
        type Key = u32;
        type Message = RingMessage;
        type Tag = &'static str;
        type Value = (u32, u32, f64);

        fn key(&self) -> u32 {
            self.key
        }

        fn start(&mut self) -> Result<Vec<Outgoing<u32, RingMessage, &'static str>>> {
            Ok(vec![Outgoing::Send((self.key + 1) % self.size, RingMessage::Token)])
        }

        fn receive(&mut self, message: RingMessage) -> Result<Vec<Outgoing<u32, RingMessage, &'static str>>> {
            match message {
                RingMessage::Token => {
                    self.seen += 1;
                    if self.seen < self.laps {
                        Ok(vec![Outgoing::Send((self.key + 1) % self.size, RingMessage::Token)])
                    } else if self.seen == self.laps {
                        Ok(vec![Outgoing::Contribute("keys", vec![self.key as f64, 1.0])])
                    } else {
                        Ok(vec![])
                    }
                }
                RingMessage::Total(total) => {
                    self.total = Some(total);
                    Ok(vec![])
                }
            }
        }

        fn reduced(_: &'static str, values: &[f64]) -> RingMessage {
            RingMessage::Total(values[0] / values[1])
        }

        fn is_finished(&self) -> bool {
            self.total.is_some()
        }

        fn value(self) -> (u32, u32, f64) {
            (self.key, self.seen, self.total.unwrap_or(f64::NAN))
        }
    }

    fn ring(size: u32, laps: u32) -> Vec<Ring> {
        (0..size).rev().map(|key| Ring { key, size, laps, seen: 0, total: None }).collect()
    }

    #[test]
    fn every_delivery_order_gives_the_same_result() {
        let metrics = Metrics::new();
        let expected: Vec<_> = (0..10).map(|k| (k, 3, 4.5)).collect();

        for &delivery in &[Delivery::Fifo, Delivery::Shuffled { seed: 42 }, Delivery::Parallel] {
            assert_eq!(execute(ring(10, 3), delivery, &metrics).unwrap(), expected);
        }
        assert_eq!(metrics.snapshot().reductions, 3);
    }

    #[test]
    fn message_to_unknown_peer_is_an_error() {
        let mut peers = ring(4, 1);
        peers.retain(|p| p.key != 2);
        assert!(matches!(execute(peers, Delivery::Fifo, &Metrics::new()), Err(Error::UnknownBlock(_))));
    }

    #[test]
    fn unfinished_peers_are_reported_as_stalled() {
        // Both peers send to peer 0, so peer 1 never contributes.
        let peers = vec![
            Ring { key: 0, size: 1, laps: 5, seen: 0, total: None },
            Ring { key: 1, size: 1, laps: 5, seen: 0, total: None },
        ];
        assert!(matches!(execute(peers, Delivery::Fifo, &Metrics::new()), Err(Error::Stalled(2))));
    }

    #[test]
    fn contributing_twice_is_an_error() {
        struct Greedy(u32);

        impl Automaton for Greedy {
            type Key = u32;
            type Message = ();
            type Tag = u8;
            type Value = ();

            fn key(&self) -> u32 {
                self.0
            }
            fn start(&mut self) -> Result<Vec<Outgoing<u32, (), u8>>> {
                Ok(vec![Outgoing::Contribute(0, vec![1.0]), Outgoing::Contribute(0, vec![1.0])])
            }
            fn receive(&mut self, _: ()) -> Result<Vec<Outgoing<u32, (), u8>>> {
                Ok(vec![])
            }
            fn reduced(_: u8, _: &[f64]) {}
            fn is_finished(&self) -> bool {
                true
            }
            fn value(self) {}
        }
        let peers = vec![Greedy(0), Greedy(1)];
        assert!(matches!(execute(peers, Delivery::Fifo, &Metrics::new()), Err(Error::DuplicateContribution(..))));
    }
}

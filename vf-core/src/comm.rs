//! Worker communicator
//!
//! Cooperating workers each own a disjoint spatial partition and exchange
//! data only through explicit point-to-point messages plus a few collective
//! reductions. Workers are driven on separate threads and wired together with
//! one dedicated crossbeam channel per ordered rank pair; every collective is
//! entered by all ranks in lockstep and receives exactly one message per
//! peer, so channel FIFO order keeps successive collectives aligned even when
//! a slow rank is still draining an earlier one.

use crate::common::Float;
use crate::packing::TransferUnit;
use crossbeam_channel::{unbounded, Receiver, Sender};

/// One worker's endpoint of the communicator.
pub struct Communicator {
    /// This worker's rank.
    rank: usize,

    /// Total number of workers.
    size: usize,

    /// `senders[dest]` is this rank's private channel into `dest` (the self
    /// slot is unused).
    senders: Vec<Sender<Vec<TransferUnit>>>,

    /// `receivers[src]` carries messages sent by `src` to this rank.
    receivers: Vec<Receiver<Vec<TransferUnit>>>,
}

impl Communicator {
    /// Creates a fully connected set of `size` communicator endpoints, one
    /// per worker rank.
    ///
    /// * `size` - Number of workers.
    pub fn create(size: usize) -> Vec<Communicator> {
        assert!(size > 0);

        let mut senders: Vec<Vec<Sender<Vec<TransferUnit>>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut receivers: Vec<Vec<Receiver<Vec<TransferUnit>>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        for src in 0..size {
            for dest in 0..size {
                let (tx, rx) = unbounded();
                senders[src].push(tx);
                receivers[dest].push(rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| Communicator {
                rank,
                size,
                senders,
                receivers,
            })
            .collect()
    }

    /// This worker's rank.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Total number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Exchanges one packed payload with every other rank. `outgoing[r]` is
    /// sent to rank `r` (the self slot is returned untouched); the result is
    /// indexed by source rank.
    ///
    /// This is a synchronization point: every rank must call it. One message
    /// is received per peer channel, so a message from a rank that has
    /// already moved on to a later collective stays queued on its own channel
    /// and cannot be mistaken for this one.
    ///
    /// * `outgoing` - Per-destination payloads, length `size`.
    pub fn all_to_all(&self, mut outgoing: Vec<Vec<TransferUnit>>) -> Vec<Vec<TransferUnit>> {
        assert_eq!(outgoing.len(), self.size);

        let mut incoming: Vec<Vec<TransferUnit>> = (0..self.size).map(|_| Vec::new()).collect();
        incoming[self.rank] = std::mem::take(&mut outgoing[self.rank]);

        for (dest, words) in outgoing.into_iter().enumerate() {
            if dest != self.rank {
                self.senders[dest].send(words).expect("worker channel closed");
            }
        }
        for (src, incoming) in incoming.iter_mut().enumerate() {
            if src != self.rank {
                *incoming = self.receivers[src].recv().expect("worker channel closed");
            }
        }
        incoming
    }

    /// Sums a scalar across all workers. Deterministic: contributions are
    /// added in rank order on every rank.
    ///
    /// * `value` - This worker's contribution.
    pub fn sum_float(&self, value: Float) -> Float {
        self.sum_floats(&[value])[0]
    }

    /// Sums a vector of scalars element-wise across all workers, in rank
    /// order for reproducible floating point results.
    ///
    /// * `values` - This worker's contributions.
    pub fn sum_floats(&self, values: &[Float]) -> Vec<Float> {
        let gathered = self.all_gather(values.iter().map(|v| v.to_bits()).collect());

        let mut totals = vec![0.0; values.len()];
        for contribution in &gathered {
            debug_assert_eq!(contribution.len(), values.len(), "reduction size mismatch");
            for (total, word) in totals.iter_mut().zip(contribution) {
                *total += Float::from_bits(*word);
            }
        }
        totals
    }

    /// Sums an unsigned counter across all workers.
    ///
    /// * `value` - This worker's contribution.
    pub fn sum_count(&self, value: u64) -> u64 {
        self.all_gather(vec![value]).iter().map(|words| words[0]).sum()
    }

    /// Gathers one payload from every rank, indexed by source rank.
    ///
    /// * `words` - This worker's payload.
    fn all_gather(&self, words: Vec<TransferUnit>) -> Vec<Vec<TransferUnit>> {
        let outgoing = (0..self.size).map(|_| words.clone()).collect();
        self.all_to_all(outgoing)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn run_workers<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(Communicator) -> R + Send + Sync + Copy,
        R: Send,
    {
        let comms = Communicator::create(size);
        thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn all_to_all_routes_by_rank() {
        let results = run_workers(3, |comm| {
            let outgoing = (0..comm.size())
                .map(|dest| vec![(comm.rank() * 10 + dest) as TransferUnit])
                .collect();
            comm.all_to_all(outgoing)
        });

        for (rank, incoming) in results.iter().enumerate() {
            for (src, words) in incoming.iter().enumerate() {
                assert_eq!(words, &vec![(src * 10 + rank) as TransferUnit]);
            }
        }
    }

    #[test]
    fn successive_exchanges_never_mix() {
        // Ranks run many back-to-back exchanges with round-tagged payloads of
        // varying length; a message leaking across rounds or sources would
        // surface as a tag mismatch on some rank.
        run_workers(3, |comm| {
            for round in 0..5000u64 {
                let outgoing = (0..comm.size())
                    .map(|dest| {
                        let mut words = vec![round, comm.rank() as u64, dest as u64];
                        words.resize(3 + (round as usize + dest) % 4, round);
                        words
                    })
                    .collect();
                let incoming = comm.all_to_all(outgoing);
                for (src, words) in incoming.iter().enumerate() {
                    assert_eq!(words[0], round);
                    assert_eq!(words[1], src as u64);
                    assert_eq!(words[2], comm.rank() as u64);
                    assert_eq!(words.len(), 3 + (round as usize + comm.rank()) % 4);
                }
            }
        });
    }

    #[test]
    fn sum_reductions_agree_on_all_ranks() {
        let results = run_workers(4, |comm| {
            let total = comm.sum_float((comm.rank() + 1) as Float);
            let count = comm.sum_count(comm.rank() as u64);
            (total, count)
        });

        for (total, count) in results {
            assert_eq!(total, 10.0);
            assert_eq!(count, 6);
        }
    }
}

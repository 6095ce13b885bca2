// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Message passing between the SPMD partitions.
//!
//! The partitions run as peer threads without shared mutable state; all
//! cross-partition traffic goes through a full mesh of channels carrying
//! bincode-encoded payloads. The collectives are sequence-numbered: since
//! every rank issues the same collectives in the same order, the sequence
//! number is enough to pair messages that belong to the same call.
use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug)]
enum Packet {
    Data {
        from: usize,
        seq: u64,
        payload: Vec<u8>,
    },
    /// Sent to every peer when an endpoint is dropped, so that a partition
    /// blocked on a peer that will never answer fails instead of hanging.
    /// Channels are FIFO per sender: a poison can only be reached once all
    /// the data its sender ever produced has been consumed.
    Poison { from: usize },
}

/// One rank's endpoint of the partition mesh.
#[derive(Debug)]
pub struct Comm {
    rank: usize,
    size: usize,
    seq: u64,
    senders: Vec<Sender<Packet>>,
    receiver: Receiver<Packet>,
    /// Packets received ahead of the collective that consumes them.
    pending: Vec<Packet>,
    /// Ranks whose endpoint is gone.
    dead: Vec<usize>,
}

impl Drop for Comm {
    fn drop(&mut self) {
        for (to, sender) in self.senders.iter().enumerate() {
            if to != self.rank {
                // A peer that is already gone is not an error here.
                let _ = sender.send(Packet::Poison { from: self.rank });
            }
        }
    }
}

impl Comm {
    /// Builds a full mesh of endpoints for the given number of ranks.
    pub fn mesh(size: usize) -> Vec<Comm> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| Comm {
                rank,
                size,
                seq: 0,
                senders: senders.clone(),
                receiver,
                pending: Vec::new(),
                dead: Vec::new(),
            })
            .collect()
    }

    /// Returns the rank of this endpoint.
    pub const fn rank(&self) -> usize {
        self.rank
    }

    /// Returns the number of ranks in the mesh.
    pub const fn size(&self) -> usize {
        self.size
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn post(&self, to: usize, seq: u64, payload: Vec<u8>) -> Result<()> {
        self.senders[to]
            .send(Packet::Data {
                from: self.rank,
                seq,
                payload,
            })
            .map_err(|_| anyhow!("partition {to} stopped receiving"))
    }

    /// Returns the payload sent by `from` for the collective `seq`, blocking
    /// until it arrives. Packets for other collectives are buffered.
    ///
    /// Fails when the awaited endpoint is gone: everything it ever sent has
    /// been consumed, so the awaited packet can no longer arrive.
    fn take(&mut self, from: usize, seq: u64) -> Result<Vec<u8>> {
        if let Some(i) = self.pending.iter().position(
            |p| matches!(p, Packet::Data { from: f, seq: s, .. } if *f == from && *s == seq),
        ) {
            let Packet::Data { payload, .. } = self.pending.swap_remove(i) else {
                unreachable!();
            };
            return Ok(payload);
        }
        if self.dead.contains(&from) {
            bail!("partition {from} aborted");
        }
        loop {
            let packet = self
                .receiver
                .recv()
                .with_context(|| format!("partition {} lost its peers", self.rank))?;
            match packet {
                Packet::Data {
                    from: f,
                    seq: s,
                    payload,
                } if f == from && s == seq => return Ok(payload),
                data @ Packet::Data { .. } => self.pending.push(data),
                Packet::Poison { from: f } => {
                    self.dead.push(f);
                    if f == from {
                        bail!("partition {f} aborted");
                    }
                }
            }
        }
    }

    /// Gathers one value per rank, on every rank. The result is indexed by
    /// rank.
    pub fn all_gather<T>(&mut self, value: &T) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let seq = self.next_seq();
        let payload = bincode::serialize(value).context("failed to encode collective payload")?;
        for to in 0..self.size {
            if to != self.rank {
                self.post(to, seq, payload.clone())?;
            }
        }
        let mut values = Vec::with_capacity(self.size);
        for from in 0..self.size {
            let bytes = if from == self.rank {
                payload.clone()
            } else {
                self.take(from, seq)?
            };
            values.push(
                bincode::deserialize(&bytes).context("failed to decode collective payload")?,
            );
        }
        Ok(values)
    }

    /// Gathers one value per rank on the root rank. Returns `Some` with the
    /// values indexed by rank on the root, `None` elsewhere.
    pub fn gather<T>(&mut self, root: usize, value: &T) -> Result<Option<Vec<T>>>
    where
        T: Serialize + DeserializeOwned,
    {
        let seq = self.next_seq();
        if self.rank != root {
            let payload = bincode::serialize(value).context("failed to encode gather payload")?;
            self.post(root, seq, payload)?;
            return Ok(None);
        }
        let mut values = Vec::with_capacity(self.size);
        for from in 0..self.size {
            if from == self.rank {
                let payload = bincode::serialize(value)?;
                values.push(bincode::deserialize(&payload)?);
            } else {
                let bytes = self.take(from, seq)?;
                values.push(
                    bincode::deserialize(&bytes).context("failed to decode gather payload")?,
                );
            }
        }
        Ok(Some(values))
    }

    /// Blocks until every rank has reached the barrier.
    pub fn barrier(&mut self) -> Result<()> {
        self.all_gather(&0u8).map(|_| ())
    }

    /// All-to-all exchange: sends `outboxes[p]` to rank `p` and returns
    /// everything addressed to this rank, in rank order.
    pub fn exchange<T>(&mut self, outboxes: Vec<Vec<T>>) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        debug_assert_eq!(outboxes.len(), self.size);
        let seq = self.next_seq();
        let mut inbox = Vec::new();
        for (to, outbox) in outboxes.into_iter().enumerate() {
            if to == self.rank {
                inbox = outbox;
            } else {
                let payload =
                    bincode::serialize(&outbox).context("failed to encode exchange payload")?;
                self.post(to, seq, payload)?;
            }
        }
        let mut received = Vec::new();
        for from in 0..self.size {
            if from == self.rank {
                received.append(&mut inbox);
            } else {
                let bytes = self.take(from, seq)?;
                let mut values: Vec<T> = bincode::deserialize(&bytes)
                    .context("failed to decode exchange payload")?;
                received.append(&mut values);
            }
        }
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn on_mesh<F, T>(size: usize, func: F) -> Vec<T>
    where
        F: Fn(Comm) -> T + Copy + Send,
        T: Send,
    {
        let mesh = Comm::mesh(size);
        thread::scope(|scope| {
            let handles: Vec<_> = mesh
                .into_iter()
                .map(|comm| scope.spawn(move || func(comm)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn all_gather_test() {
        let results = on_mesh(3, |mut comm| comm.all_gather(&(comm.rank() as u64)).unwrap());
        for values in results {
            assert_eq!(values, vec![0, 1, 2]);
        }
    }

    #[test]
    fn gather_test() {
        let results = on_mesh(3, |mut comm| {
            comm.gather(1, &format!("rank {}", comm.rank())).unwrap()
        });
        assert_eq!(results[0], None);
        assert_eq!(
            results[1],
            Some(vec![
                "rank 0".to_owned(),
                "rank 1".to_owned(),
                "rank 2".to_owned()
            ])
        );
        assert_eq!(results[2], None);
    }

    #[test]
    fn exchange_test() {
        // Every rank sends `(from, to)` to every rank, itself included.
        let results = on_mesh(3, |mut comm| {
            let rank = comm.rank();
            let outboxes = (0..3).map(|to| vec![(rank, to)]).collect();
            comm.exchange::<(usize, usize)>(outboxes).unwrap()
        });
        for (to, received) in results.into_iter().enumerate() {
            assert_eq!(received, vec![(0, to), (1, to), (2, to)]);
        }
    }

    #[test]
    fn interleaved_collectives_test() {
        // Sequence numbers keep successive collectives apart even when a
        // fast rank runs ahead.
        let results = on_mesh(2, |mut comm| {
            let first = comm.all_gather(&comm.rank()).unwrap();
            let second = comm.all_gather(&(comm.rank() * 10)).unwrap();
            (first, second)
        });
        for (first, second) in results {
            assert_eq!(first, vec![0, 1]);
            assert_eq!(second, vec![0, 10]);
        }
    }

    #[test]
    fn aborted_peer_test() {
        let mut mesh = Comm::mesh(2);
        let mut survivor = mesh.pop().unwrap();
        // Rank 0 dies before the collective: rank 1 must fail, not hang.
        drop(mesh);
        assert!(survivor.all_gather(&1u8).is_err());
    }

    #[test]
    fn single_rank_test() {
        let results = on_mesh(1, |mut comm| {
            comm.barrier().unwrap();
            comm.all_gather(&7u32).unwrap()
        });
        assert_eq!(results, vec![vec![7]]);
    }
}

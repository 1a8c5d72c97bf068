//! In-process pool: one thread per rank, rendezvous channels between the
//! coordinator and each worker.
//!
//! Channels have zero capacity, so a send completes only once the peer has
//! received it. Ranks share nothing but these channels.

use crate::error::CommError;
use crate::traits::Communicator;
use crate::ROOT;
use crossbeam_channel::{bounded, Receiver, Sender};

enum Link {
    Coordinator {
        to_workers: Vec<Sender<Vec<u8>>>,
        from_workers: Vec<Receiver<Vec<u8>>>,
    },
    Worker {
        from_root: Receiver<Vec<u8>>,
        to_root: Sender<Vec<u8>>,
    },
}

/// Endpoint of one rank in a [`LocalCluster`].
pub struct LocalComm {
    rank: usize,
    size: usize,
    link: Link,
}

/// Factory for in-process pools.
pub struct LocalCluster;

impl LocalCluster {
    /// Create the endpoints of a pool of `size` ranks, indexed by rank.
    ///
    /// A pool needs a coordinator and at least one worker.
    pub fn new(size: usize) -> Result<Vec<LocalComm>, CommError> {
        if size < 2 {
            return Err(CommError::InvalidPool(format!(
                "pool size must be at least 2 (one coordinator, one worker), got {size}"
            )));
        }

        let mut to_workers = Vec::with_capacity(size - 1);
        let mut from_workers = Vec::with_capacity(size - 1);
        let mut workers = Vec::with_capacity(size - 1);

        for rank in 1..size {
            let (down_tx, down_rx) = bounded(0);
            let (up_tx, up_rx) = bounded(0);
            to_workers.push(down_tx);
            from_workers.push(up_rx);
            workers.push(LocalComm {
                rank,
                size,
                link: Link::Worker {
                    from_root: down_rx,
                    to_root: up_tx,
                },
            });
        }

        let mut comms = Vec::with_capacity(size);
        comms.push(LocalComm {
            rank: ROOT,
            size,
            link: Link::Coordinator {
                to_workers,
                from_workers,
            },
        });
        comms.extend(workers);
        Ok(comms)
    }
}

impl LocalComm {
    fn misuse(&self, message: &str) -> CommError {
        CommError::Misuse {
            rank: self.rank,
            message: message.to_string(),
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast_bytes(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>, CommError> {
        match (&self.link, payload) {
            (Link::Coordinator { to_workers, .. }, Some(bytes)) => {
                for (i, tx) in to_workers.iter().enumerate() {
                    tx.send(bytes.clone())
                        .map_err(|_| CommError::Disconnected { rank: i + 1 })?;
                }
                Ok(bytes)
            }
            (Link::Worker { from_root, .. }, None) => from_root
                .recv()
                .map_err(|_| CommError::Disconnected { rank: ROOT }),
            (Link::Coordinator { .. }, None) => {
                Err(self.misuse("coordinator must supply the broadcast payload"))
            }
            (Link::Worker { .. }, Some(_)) => {
                Err(self.misuse("only the coordinator may supply a broadcast payload"))
            }
        }
    }

    fn gather_bytes(&self, payload: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        match &self.link {
            Link::Coordinator { from_workers, .. } => {
                let mut all = Vec::with_capacity(self.size);
                all.push(payload);
                for (i, rx) in from_workers.iter().enumerate() {
                    let bytes = rx
                        .recv()
                        .map_err(|_| CommError::Disconnected { rank: i + 1 })?;
                    all.push(bytes);
                }
                Ok(Some(all))
            }
            Link::Worker { to_root, .. } => {
                to_root
                    .send(payload)
                    .map_err(|_| CommError::Disconnected { rank: ROOT })?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_pool_ranks() {
        let comms = LocalCluster::new(4).unwrap();
        let ranks: Vec<usize> = comms.iter().map(|c| c.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        assert!(comms[0].is_root());
        assert!(!comms[3].is_root());
        assert!(comms.iter().all(|c| c.size() == 4));
    }

    #[test]
    fn test_pool_too_small() {
        assert!(matches!(
            LocalCluster::new(1),
            Err(CommError::InvalidPool(_))
        ));
    }

    #[test]
    fn test_broadcast_to_dropped_worker_is_fatal() {
        let mut comms = LocalCluster::new(3).unwrap();
        let root = comms.remove(0);
        drop(comms);

        let err = root.broadcast_bytes(Some(vec![1, 2, 3])).unwrap_err();
        assert!(matches!(err, CommError::Disconnected { rank: 1 }));
    }

    #[test]
    fn test_worker_sees_dropped_coordinator() {
        let mut comms = LocalCluster::new(2).unwrap();
        let worker = comms.pop().unwrap();
        drop(comms);

        let err = worker.broadcast_bytes(None).unwrap_err();
        assert!(matches!(err, CommError::Disconnected { rank: 0 }));
    }

    #[test]
    fn test_worker_cannot_originate_broadcast() {
        let mut comms = LocalCluster::new(2).unwrap();
        let worker = comms.pop().unwrap();
        let err = worker.broadcast_bytes(Some(vec![0])).unwrap_err();
        assert!(matches!(err, CommError::Misuse { rank: 1, .. }));
    }

    #[test]
    fn test_round_trip_bytes() {
        let mut comms = LocalCluster::new(2).unwrap();
        let root = comms.remove(0);
        let worker = comms.pop().unwrap();

        let handle = thread::spawn(move || {
            let got = worker.broadcast_bytes(None).unwrap();
            worker.gather_bytes(got.iter().map(|b| b * 2).collect()).unwrap()
        });

        root.broadcast_bytes(Some(vec![1, 2, 3])).unwrap();
        let all = root.gather_bytes(Vec::new()).unwrap().unwrap();
        assert_eq!(all, vec![Vec::new(), vec![2, 4, 6]]);
        assert!(handle.join().unwrap().is_none());
    }
}

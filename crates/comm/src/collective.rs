use crate::error::CommError;
use crate::traits::Communicator;
use serde::de::DeserializeOwned;
use serde::Serialize;

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CommError> {
    bincode::serialize(value).map_err(|e| CommError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CommError> {
    bincode::deserialize(bytes).map_err(|e| CommError::Decode(e.to_string()))
}

/// Broadcast a typed value from the coordinator to every rank.
///
/// The coordinator must pass `Some(value)` and workers `None`.
pub fn broadcast<C, T>(comm: &C, value: Option<&T>) -> Result<T, CommError>
where
    C: Communicator + ?Sized,
    T: Serialize + DeserializeOwned,
{
    let payload = match value {
        Some(v) => Some(encode(v)?),
        None => None,
    };
    let bytes = comm.broadcast_bytes(payload)?;
    decode(&bytes)
}

/// Gather one typed value per rank on the coordinator, ordered by rank.
pub fn gather<C, T>(comm: &C, value: &T) -> Result<Option<Vec<T>>, CommError>
where
    C: Communicator + ?Sized,
    T: Serialize + DeserializeOwned,
{
    match comm.gather_bytes(encode(value)?)? {
        Some(all) => all.iter().map(|b| decode(b)).collect::<Result<Vec<_>, _>>().map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalCluster;
    use std::thread;

    #[test]
    fn test_broadcast_typed_value() {
        let mut comms = LocalCluster::new(3).unwrap();
        let root = comms.remove(0);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| thread::spawn(move || broadcast::<_, Vec<f64>>(&c, None).unwrap()))
            .collect();

        let sent = vec![0.5, 1.5, 2.5];
        let echoed = broadcast(&root, Some(&sent)).unwrap();
        assert_eq!(echoed, sent);
        for h in handles {
            assert_eq!(h.join().unwrap(), sent);
        }
    }

    #[test]
    fn test_gather_orders_by_rank() {
        let mut comms = LocalCluster::new(4).unwrap();
        let root = comms.remove(0);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| {
                thread::spawn(move || {
                    let label = format!("worker-{}", c.rank());
                    gather(&c, &label).unwrap()
                })
            })
            .collect();

        let all = gather(&root, &"root".to_string()).unwrap().unwrap();
        assert_eq!(all, vec!["root", "worker-1", "worker-2", "worker-3"]);
        for h in handles {
            assert!(h.join().unwrap().is_none());
        }
    }
}

use rustc_hash::FxHashMap;
use tokio::sync::{Mutex, MutexGuard};

use crate::utils::BUCKET_LENGTH;

/// Gate keeping ingestion streams that share a snapshot table in step.
///
/// No stream may write bucket `T + BUCKET_LENGTH` before every registered
/// stream has arrived at bucket `T`. The same lock also serializes the
/// read-modify-write of a bucket across streams, so callers keep the guard
/// while they load, update and commit a snapshot.
pub struct NetworkBarrier {
    state: Mutex<BarrierState>,
}

#[derive(Debug)]
pub struct BarrierState {
    /// First bucket that is not yet open to every stream. Zero until two
    /// streams have reported.
    target: i64,
    /// First report received while the target is still unknown.
    provisional: Option<(String, i64)>,
    arrived: FxHashMap<String, bool>,
}

impl NetworkBarrier {
    pub fn new<I, S>(streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let arrived = streams.into_iter().map(|s| (s.into(), false)).collect();
        Self {
            state: Mutex::new(BarrierState {
                target: 0,
                provisional: None,
                arrived,
            }),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().await
    }
}

impl BarrierState {
    /// Report that `stream` wants to write the bucket at `timestamp`.
    ///
    /// Returns true when the stream may go ahead. When false the stream must
    /// stop at this bucket and report again on a later pass.
    pub fn arrive_at(&mut self, stream: &str, timestamp: i64) -> bool {
        if self.arrived.len() <= 1 {
            return true;
        }

        if self.target == 0 {
            match &self.provisional {
                Some((first, first_ts)) if first != stream => {
                    self.target = timestamp.min(*first_ts);
                    self.provisional = None;
                }
                Some(_) => return false,
                None => {
                    self.provisional = Some((stream.to_string(), timestamp));
                    return false;
                }
            }
        }

        if timestamp < self.target {
            return true;
        }

        let Some(arrived) = self.arrived.get_mut(stream) else {
            // Unregistered streams never hold others back.
            return true;
        };

        if !*arrived {
            *arrived = true;
            return false;
        }

        if self.arrived.values().all(|a| *a) {
            self.target += BUCKET_LENGTH;
            self.arrived.values_mut().for_each(|a| *a = false);

            if timestamp < self.target {
                return true;
            }
            // Still ahead of the next round: stays counted as arrived.
            if let Some(arrived) = self.arrived.get_mut(stream) {
                *arrived = true;
            }
        }

        false
    }

    pub fn target(&self) -> i64 {
        self.target
    }
}

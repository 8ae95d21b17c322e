//! In-process partitioned bus.
//!
//! [`MemoryBroker`] keeps a log per topic partition and the committed
//! positions of every consumer group. It is designed to be cloned freely;
//! all clones share the same logs.
//!
//! Commits are tracked per message, not as a single high-water mark: a
//! message whose handler failed stays uncommitted even after later
//! messages in the same partition are committed, and a new subscription
//! for the group starts again from it.
//!
//! Records every group has committed are discarded. Each partition also
//! retains at most `max_retained` records; when the cap is exceeded the
//! oldest records are discarded even if a group never committed them, and
//! that group's position moves past them.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::commits::PartitionCommits;
use crate::error::TransportError;
use crate::message::{Ack, BusMessage};
use crate::transport::{BusConsumer, BusProducer};

/// Default cap on records retained per partition.
pub const DEFAULT_MAX_RETAINED: usize = 4096;

struct Record {
    key: Vec<u8>,
    value: Vec<u8>,
}

/// One partition's records. Offsets are absolute; `base` is the offset of
/// the oldest retained record.
#[derive(Default)]
struct PartitionLog {
    base: u64,
    records: VecDeque<Record>,
}

impl PartitionLog {
    fn end(&self) -> u64 {
        self.base + self.records.len() as u64
    }

    fn get(&self, offset: u64) -> Option<&Record> {
        let index = offset.checked_sub(self.base)?;
        self.records.get(usize::try_from(index).ok()?)
    }

    fn push(&mut self, record: Record) -> u64 {
        self.records.push_back(record);
        self.end() - 1
    }

    fn discard_below(&mut self, offset: u64) {
        while self.base < offset && self.records.pop_front().is_some() {
            self.base += 1;
        }
    }
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<PartitionLog>>,
    /// Keyed by `(topic, group)`, one entry per partition.
    groups: HashMap<(String, String), Vec<PartitionCommits>>,
    closed: bool,
}

impl BrokerState {
    /// Apply retention to one partition.
    fn trim(&mut self, topic: &str, partition: usize, max_retained: usize) {
        let Some(log) = self.topics.get_mut(topic).and_then(|p| p.get_mut(partition)) else {
            return;
        };

        let floor = self
            .groups
            .iter()
            .filter(|((t, _), _)| t == topic)
            .filter_map(|(_, commits)| commits.get(partition))
            .map(|c| c.low)
            .min();
        if let Some(floor) = floor {
            log.discard_below(floor);
        }

        let overflow = log.records.len().saturating_sub(max_retained);
        if overflow == 0 {
            return;
        }
        let base = log.base + overflow as u64;
        log.discard_below(base);

        for ((t, group), commits) in self.groups.iter_mut() {
            if t != topic {
                continue;
            }
            let Some(c) = commits.get_mut(partition) else {
                continue;
            };
            let abandoned = c.skip_to(base);
            if abandoned > 0 {
                tracing::warn!(
                    topic,
                    group = %group,
                    partition,
                    abandoned,
                    "Retention limit reached, discarding uncommitted messages",
                );
            }
        }
    }
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    appended: Notify,
    max_retained: usize,
}

impl BrokerInner {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // The state stays consistent across a panicking holder: every
        // mutation completes before the guard is released.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared in-process broker.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_MAX_RETAINED)
    }

    /// Broker retaining at most `max_retained` records per partition.
    pub fn with_retention(max_retained: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                appended: Notify::new(),
                max_retained: max_retained.max(1),
            }),
        }
    }

    /// Create `topic` with `partitions` partitions. Existing topics are kept.
    pub fn create_topic(&self, topic: &str, partitions: u32) {
        let mut state = self.inner.lock();
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| (0..partitions.max(1)).map(|_| PartitionLog::default()).collect());
    }

    /// Join `group` on `topic`, resuming at the group's oldest uncommitted
    /// message in each partition. A new group starts at the oldest
    /// retained record.
    pub fn subscribe(&self, topic: &str, group: &str) -> Result<MemoryConsumer, TransportError> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        let bases: Vec<u64> = state
            .topics
            .get(topic)
            .map(|logs| logs.iter().map(|log| log.base).collect())
            .ok_or_else(|| TransportError::Permanent(format!("unknown topic {topic}")))?;
        let partitions = bases.len();

        let commits = state
            .groups
            .entry((topic.to_string(), group.to_string()))
            .or_insert_with(|| bases.iter().copied().map(PartitionCommits::starting_at).collect());
        let positions = commits.iter().map(|c| c.low).collect();

        tracing::debug!(topic, group, partitions, "Consumer subscribed");
        Ok(MemoryConsumer {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            group: group.to_string(),
            positions,
            next_partition: 0,
        })
    }

    /// Shut the broker down. Pending and future fetches return `Closed`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.inner.appended.notify_waiters();
        tracing::info!("In-process bus closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Whether `group` has committed `offset` of `topic`/`partition`.
    pub fn is_committed(&self, topic: &str, group: &str, partition: u32, offset: u64) -> bool {
        let state = self.inner.lock();
        state
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .and_then(|p| p.get(partition as usize))
            .is_some_and(|c| c.is_committed(offset))
    }

    /// Number of retained messages in `topic` that `group` has not committed.
    pub fn uncommitted(&self, topic: &str, group: &str) -> usize {
        let state = self.inner.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return 0;
        };
        let commits = state.groups.get(&(topic.to_string(), group.to_string()));

        partitions
            .iter()
            .enumerate()
            .map(|(p, log)| {
                (log.base..log.end())
                    .filter(|offset| {
                        !commits
                            .and_then(|c| c.get(p))
                            .is_some_and(|c| c.is_committed(*offset))
                    })
                    .count()
            })
            .sum()
    }

    /// Number of records currently held for `topic`, across partitions.
    pub fn retained(&self, topic: &str) -> usize {
        let state = self.inner.lock();
        state
            .topics
            .get(topic)
            .map(|logs| logs.iter().map(|log| log.records.len()).sum())
            .unwrap_or(0)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn partition_for(key: &[u8], partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

#[async_trait]
impl BusProducer for MemoryBroker {
    async fn publish(&self, topic: &str, key: &[u8], value: &[u8]) -> Result<Ack, TransportError> {
        let ack = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(TransportError::Closed);
            }
            let partitions = state
                .topics
                .get_mut(topic)
                .ok_or_else(|| TransportError::Permanent(format!("unknown topic {topic}")))?;

            let partition = partition_for(key, partitions.len());
            let offset = partitions[partition].push(Record {
                key: key.to_vec(),
                value: value.to_vec(),
            });
            state.trim(topic, partition, self.inner.max_retained);
            Ack {
                partition: partition as u32,
                offset,
            }
        };

        self.inner.appended.notify_waiters();
        Ok(ack)
    }
}

/// A group member reading one topic from a [`MemoryBroker`].
pub struct MemoryConsumer {
    inner: Arc<BrokerInner>,
    topic: String,
    group: String,
    /// Next offset to examine, per partition.
    positions: Vec<u64>,
    next_partition: usize,
}

impl MemoryConsumer {
    /// Take the next deliverable message without waiting.
    fn try_next(&mut self) -> Result<Option<BusMessage>, TransportError> {
        let state = self.inner.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        let partitions = state
            .topics
            .get(&self.topic)
            .ok_or_else(|| TransportError::Permanent(format!("unknown topic {}", self.topic)))?;
        let commits = state.groups.get(&(self.topic.clone(), self.group.clone()));

        let count = self.positions.len();
        for step in 0..count {
            let p = (self.next_partition + step) % count;
            let log = &partitions[p];

            // Discarded records are gone for good.
            self.positions[p] = self.positions[p].max(log.base);

            // Skip messages another member of the group already committed.
            while self.positions[p] < log.end()
                && commits
                    .and_then(|c| c.get(p))
                    .is_some_and(|c| c.is_committed(self.positions[p]))
            {
                self.positions[p] += 1;
            }

            let offset = self.positions[p];
            if let Some(record) = log.get(offset) {
                self.positions[p] += 1;
                self.next_partition = (p + 1) % count;
                return Ok(Some(BusMessage {
                    topic: self.topic.clone(),
                    partition: p as u32,
                    offset,
                    key: record.key.clone(),
                    value: record.value.clone(),
                }));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl BusConsumer for MemoryConsumer {
    async fn fetch(&mut self, wait: Duration) -> Result<Option<BusMessage>, TransportError> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            // Register for wakeups before looking, so an append between the
            // check and the wait is not missed.
            let inner = Arc::clone(&self.inner);
            let appended = inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(message) = self.try_next()? {
                return Ok(Some(message));
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self, message: &BusMessage) -> Result<(), TransportError> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        let partition = message.partition as usize;
        let commits = state
            .groups
            .get_mut(&(self.topic.clone(), self.group.clone()))
            .and_then(|p| p.get_mut(partition))
            .ok_or_else(|| {
                TransportError::Permanent(format!(
                    "partition {} not assigned to this consumer",
                    message.partition
                ))
            })?;
        commits.commit(message.offset);
        state.trim(&self.topic, partition, self.inner.max_retained);
        Ok(())
    }
}

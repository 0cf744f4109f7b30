use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{atomic::{AtomicBool, AtomicUsize, Ordering}, Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use hashring::HashRing;
use indexmap::IndexMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{
    broker::{Cluster, ControlConnection, Record, RecordReader, RecordWriter, TopicDescriptor},
    config::MessengerConfig,
    error::BrokerError,
};



/// In-process cluster.
///
/// Brokers are plain addresses that can be taken up and down, the first one
/// is the controller. Topics keep their partitions in memory, keyed records
/// land on a partition picked by a hash ring and unkeyed ones round robin.
/// Consumer groups share committed offsets and start from the earliest record.
///
/// Clones share the same cluster. Failures can be queued per operation to
/// exercise error paths.
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Default)]
struct State {
    // address -> reachable
    nodes: IndexMap<String, bool>,
    topics: IndexMap<String, Topic>,
    // (group, topic) -> next offset per partition
    offsets: HashMap<(String, String), Vec<usize>>,
    faults: Faults,

    writes: usize,
    creations: usize,
    writer_closes: usize,
    reader_closes: usize,
}

#[derive(Default)]
struct Faults {
    metadata: VecDeque<BrokerError>,
    create: VecDeque<BrokerError>,
    write: VecDeque<BrokerError>,
    read: VecDeque<BrokerError>,
    close: VecDeque<BrokerError>,
}

struct Topic {
    partitions: Vec<Vec<Record>>,
    ring: HashRing<usize>,
    round_robin: usize,
}

impl Topic {
    fn new(partitions: usize) -> Self {
        let mut ring = HashRing::new();
        for index in 0..partitions {
            ring.add(index);
        }

        Topic {
            partitions: vec![Vec::new(); partitions],
            ring,
            round_robin: 0,
        }
    }

    fn append(&mut self, mut record: Record) {
        let index = if record.key.is_empty() {
            let i = self.round_robin % self.partitions.len();
            self.round_robin = self.round_robin.wrapping_add(1);
            i
        } else {
            self.ring.get(&record.key).copied().unwrap_or(0)
        };

        let log = &mut self.partitions[index];
        record.partition = index as i32;
        record.offset = log.len() as i64;
        log.push(record);
    }
}


impl MemoryCluster {

    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = State {
            nodes: addresses.into_iter().map(|a| (a.into(), true)).collect(),
            ..State::default()
        };

        MemoryCluster {
            inner: Arc::new(Inner { state: Mutex::new(state), notify: Notify::new() }),
        }
    }

    #[inline]
    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.lock()
    }


    pub fn set_reachable(&self, address: &str, reachable: bool) {
        if let Some(up) = self.state().nodes.get_mut(address) {
            *up = reachable;
        }
    }

    pub fn partition_count(&self, topic: &str) -> Option<usize> {
        self.state().topics.get(topic).map(|t| t.partitions.len())
    }

    /// Everything stored in `topic`, partition by partition
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.state()
            .topics
            .get(topic)
            .map(|t| t.partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Records `group` has consumed from `topic`
    pub fn committed(&self, group: &str, topic: &str) -> usize {
        self.state()
            .offsets
            .get(&(group.to_owned(), topic.to_owned()))
            .map(|o| o.iter().sum())
            .unwrap_or(0)
    }

    /// Number of `write_records` calls that reached the cluster
    pub fn writes(&self) -> usize {
        self.state().writes
    }

    pub fn topic_creations(&self) -> usize {
        self.state().creations
    }

    /// Number of `close` calls on writers and readers handed out so far
    pub fn closes(&self) -> (usize, usize) {
        let state = self.state();
        (state.writer_closes, state.reader_closes)
    }


    pub fn fail_next_metadata(&self, err: BrokerError) {
        self.state().faults.metadata.push_back(err);
    }

    pub fn fail_next_create(&self, err: BrokerError) {
        self.state().faults.create.push_back(err);
    }

    pub fn fail_next_write(&self, err: BrokerError) {
        self.state().faults.write.push_back(err);
    }

    pub fn fail_next_reads(&self, errs: impl IntoIterator<Item = BrokerError>) {
        self.state().faults.read.extend(errs);
        self.inner.notify.notify_waiters();
    }

    /// Applies to whichever writer or reader closes next
    pub fn fail_next_close(&self, err: BrokerError) {
        self.state().faults.close.push_back(err);
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}


#[async_trait]
impl Cluster for MemoryCluster {

    async fn dial(&self, address: &str) -> Result<Box<dyn ControlConnection>, BrokerError> {
        match self.state().nodes.get(address) {
            Some(true) => Ok(Box::new(MemoryControl { inner: self.inner.clone() })),
            Some(false) => Err(BrokerError::transport(
                io::ErrorKind::ConnectionRefused,
                format!("dial tcp {address}: connection refused"),
            )),
            None => Err(BrokerError::transport(
                io::ErrorKind::ConnectionRefused,
                format!("dial tcp {address}: no such host"),
            )),
        }
    }

    fn writer(&self, config: &MessengerConfig) -> Result<Arc<dyn RecordWriter>, BrokerError> {
        Ok(Arc::new(MemoryWriter {
            inner: self.inner.clone(),
            topic: config.topic.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn reader(&self, config: &MessengerConfig) -> Result<Arc<dyn RecordReader>, BrokerError> {
        Ok(Arc::new(MemoryReader {
            inner: self.inner.clone(),
            topic: config.topic.clone(),
            group: config.group_id.clone(),
            cursor: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }))
    }
}




struct MemoryControl {
    inner: Arc<Inner>,
}

#[async_trait]
impl ControlConnection for MemoryControl {

    async fn controller(&self) -> Result<String, BrokerError> {
        self.inner
            .lock()
            .nodes
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| BrokerError::Protocol("cluster has no brokers".to_owned()))
    }

    async fn read_partitions(&self, topic: &str) -> Result<Vec<i32>, BrokerError> {
        let mut state = self.inner.lock();

        if let Some(e) = state.faults.metadata.pop_front() {
            return Err(e);
        }

        match state.topics.get(topic) {
            Some(t) => Ok((0..t.partitions.len() as i32).collect()),
            None => Err(BrokerError::UnknownTopicOrPartition(topic.to_owned())),
        }
    }

    async fn create_topic(&self, descriptor: &TopicDescriptor) -> Result<(), BrokerError> {
        let mut state = self.inner.lock();

        if let Some(e) = state.faults.create.pop_front() {
            return Err(e);
        }

        if state.topics.contains_key(&descriptor.topic) {
            return Err(BrokerError::TopicAlreadyExists(descriptor.topic.clone()));
        }

        if descriptor.partitions <= 0 {
            return Err(BrokerError::Protocol(format!("invalid partition count {}", descriptor.partitions)));
        }

        if descriptor.replication_factor <= 0 || descriptor.replication_factor as usize > state.nodes.len() {
            return Err(BrokerError::Protocol(format!(
                "replication factor {} larger than available brokers {}",
                descriptor.replication_factor,
                state.nodes.len()
            )));
        }

        state.topics.insert(descriptor.topic.clone(), Topic::new(descriptor.partitions as usize));
        state.creations += 1;
        Ok(())
    }
}




struct MemoryWriter {
    inner: Arc<Inner>,
    topic: String,
    closed: AtomicBool,
}

#[async_trait]
impl RecordWriter for MemoryWriter {

    async fn write_records(&self, records: Vec<Record>) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }

        {
            let mut state = self.inner.lock();

            if let Some(e) = state.faults.write.pop_front() {
                return Err(e);
            }

            state.writes += 1;

            let topic = state
                .topics
                .get_mut(&self.topic)
                .ok_or_else(|| BrokerError::UnknownTopicOrPartition(self.topic.clone()))?;

            for record in records {
                topic.append(record);
            }
        }

        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::Release);

        let mut state = self.inner.lock();
        state.writer_closes += 1;

        match state.faults.close.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}




struct MemoryReader {
    inner: Arc<Inner>,
    topic: String,
    group: String,
    // partition to look at first, rotates to avoid starving partitions
    cursor: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryReader {

    /// None when nothing is ready yet
    fn try_next(&self) -> Option<Result<Record, BrokerError>> {
        if self.closed.load(Ordering::Acquire) {
            return Some(Err(BrokerError::Closed));
        }

        let mut state = self.inner.lock();

        if let Some(e) = state.faults.read.pop_front() {
            return Some(Err(e));
        }

        let State { topics, offsets, .. } = &mut *state;

        let topic = topics.get(&self.topic)?;
        let count = topic.partitions.len();

        let committed = offsets
            .entry((self.group.clone(), self.topic.clone()))
            .or_insert_with(|| vec![0; count]);

        let start = self.cursor.fetch_add(1, Ordering::Relaxed);

        for step in 0..count {
            let index = (start + step) % count;
            if let Some(record) = topic.partitions[index].get(committed[index]) {
                // auto commit
                committed[index] += 1;
                return Some(Ok(record.clone()));
            }
        }

        None
    }
}

#[async_trait]
impl RecordReader for MemoryReader {

    async fn read_next(&self, token: &CancellationToken) -> Result<Record, BrokerError> {
        loop {
            if token.is_cancelled() {
                return Err(BrokerError::Cancelled);
            }

            // register before looking so a concurrent write can't slip by
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(res) = self.try_next() {
                return res;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(BrokerError::Cancelled),
                _ = &mut notified => (),
            }
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();

        let mut state = self.inner.lock();
        state.reader_closes += 1;

        match state.faults.close.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

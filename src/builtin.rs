
/// In-process cluster, always available
pub mod memory_cluster;



#[cfg(feature = "kafka")]
pub mod kafka_cluster;

#[cfg(feature = "kafka")]
pub mod kafka_writer;

#[cfg(feature = "kafka")]
pub mod kafka_reader;

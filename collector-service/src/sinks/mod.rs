pub mod questdb_ilp;
pub mod snapshot;
pub mod tee;

pub use questdb_ilp::QuestDbIlpSink;
pub use snapshot::{SensorBoard, SensorSnapshotSink};
pub use tee::TeeSink;

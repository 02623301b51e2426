// parquedb-cdc - Change data capture
//
// A producer bound to a (system, database, collection) source stamps every
// record with a monotone sequence and a nanosecond timestamp. Consumers
// filter by sequence, operation and timestamp, and advance a cursor as
// records are handled. Delta interop maps CDC operation codes onto Delta
// Lake change types and back.

pub mod consumer;
pub mod delta;
pub mod producer;
pub mod record;

pub use consumer::{CdcConsumer, ConsumerOptions};
pub use delta::{cdc_to_delta, delta_to_cdc, DeltaChangeType, DeltaRecord};
pub use producer::CdcProducer;
pub use record::{CdcOp, CdcRecord, CdcSource};

pub mod logger;
pub mod record;

pub use logger::{append_result, EventSink, JsonlEventLog, LogEvent, MemoryEventLog};
pub use record::{parse_line, parse_timestamp, EventKind, EventRecord};

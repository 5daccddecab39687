//! Call bounded context - lifecycle of provider calls

pub mod call_log;
pub mod event;
pub mod value_object;

pub use call_log::{CallLog, CallLogRepository};
pub use event::{CallEvent, CallEventError, CallEventKind};
pub use value_object::{CallDirection, CallStatus, TransferStatus};

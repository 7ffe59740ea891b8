//! Thread-per-worker message passing
//!
//! A worker runs a script on its own OS thread, in its own script context.
//! It shares nothing with its owner except a `WorkerMessagePort`: two
//! mutex-protected queues of serialized messages and a termination flag.
//!
//! Everything is polled. The owner pumps its workers' outbound queues once per
//! host tick; each worker thread loops over intervals, its inbound queue and
//! its own sub-workers until it is terminated.

mod error;
mod handle;
mod interval;
mod message;
mod port;
mod queue;
mod registry;
mod spawn;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{SerializationError, WorkerCreationError, WorkerError, WorkerResult};
pub use handle::WorkerHandle;
pub use interval::{DEFAULT_PERIOD, IntervalId, IntervalRegistry};
pub use message::{Message, message_event};
pub use port::{WorkerId, WorkerMessagePort};
pub use queue::{DEFAULT_POST_WAIT, MessageQueue};
pub use registry::{WorkerRegistry, pump_owner_messages};
pub use spawn::{Spawner, WorkerConfig, check_constructor_args};

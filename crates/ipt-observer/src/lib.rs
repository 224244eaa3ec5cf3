#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]

//! Observer dispatch for trace decoders.
//!
//! A decoder reports three kinds of progress while it walks a trace:
//!
//! - **Tick**: the trace time advanced. Tick observers name the time at which
//!   they want to hear about it next and are kept sorted by that limit.
//! - **State**: tracing was enabled, disabled, or decode had to resync.
//! - **Ip**: the instruction pointer changed.
//!
//! # Reentrancy
//!
//! Callbacks get mutable access to their own [`Subscription`]. Whatever they
//! change there takes effect right after the callback returns, also on the
//! other two channels, and also when the callback fails:
//!
//! - clearing the channel flag leaves the queue,
//! - moving the tick limit forward re-sorts the observer into the part of
//!   the queue not visited yet, so it fires again if the new limit was
//!   reached as well,
//! - moving the tick limit back re-queues the observer once the pass is done.
//!
//! # Fast Path
//!
//! [`ObserverCollection::tick_limit`] is the lowest tick limit. The gated
//! [`ObserverCollection::tick`] returns right away below it, so calling it for
//! every packet is cheap.

mod arena;
mod collection;
mod error;
mod id;
mod observer;
mod queue;

pub use collection::ObserverCollection;
pub use error::{CallbackError, ErrorKind, ObserverError, ObserverResult};
pub use id::{Generation, ObserverId};
pub use observer::{Channel, DecodeState, Observer, Subscription, Tick};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Channel, DecodeState, Observer, ObserverCollection, ObserverError, ObserverId,
        ObserverResult, Subscription, Tick,
    };
}

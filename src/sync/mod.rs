pub mod clock;
pub mod confirm;
pub mod poller;
pub mod transport;

pub use clock::{Clock, TokioClock};
pub use confirm::{ActionConfirmer, ConfirmOptions, Confirmation, PendingAction};
pub use poller::{AdaptivePoller, Backoff, PollerHandle, PollerOptions};
pub use transport::{RetryPolicy, RetryingTransport, TransportError};

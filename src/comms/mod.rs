mod comms;
mod router;
mod transport;

pub use comms::CommsAccess;
pub use transport::Transport;

pub(crate) use comms::Comms;

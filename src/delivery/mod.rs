mod resend;
mod status;
mod store;
mod tracker;

pub(crate) use resend::ResendQueue;
pub use status::MessageDeliveryStatus;
pub use store::{DeliveryStatusStore, FileDeliveryStatusStore, MemoryDeliveryStatusStore};
pub use tracker::MessageDeliveryTracker;

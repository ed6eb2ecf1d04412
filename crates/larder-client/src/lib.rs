pub mod backoff;
pub mod bus;
pub mod coordinator;
pub mod credentials;
pub mod echo;
pub mod manager;

pub use backoff::{Backoff, Policy};
pub use bus::EventBus;
pub use coordinator::{CoordinatorConfig, DeliveryCoordinator, DeliveryNotice, DeliveryPath};
pub use credentials::{CredentialProvider, StaticCredential};
pub use echo::{EchoSuppressor, RefreshPlan};
pub use manager::{ConnectionManager, ConnectionState, EventSink, ManagerConfig};

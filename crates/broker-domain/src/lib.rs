pub mod error;
pub mod event;
pub mod ids;
pub mod machine;
pub mod request;
pub mod template;

pub use error::DomainError;
pub use event::{AggregateType, Event, EventPayload};
pub use ids::{MachineId, RequestId, TemplateId};
pub use machine::{HealthCheck, Machine, MachineStatus, NewMachine, PriceTier};
pub use request::{Request, RequestStatus, RequestType};
pub use template::{ImageReference, MachineTypeSpec, NetworkPlacement, ProviderStrategy, Template, TemplateFields};

pub mod error;
pub mod lifecycle;
pub mod reconciler;
pub mod template_store;

pub use error::EngineError;
pub use lifecycle::{LifecycleEngine, ReturnTarget, MACHINES_ENTITY, REQUESTS_ENTITY};
pub use reconciler::{HealthChecker, MachineReconciler, NoopHealthChecker};
pub use template_store::{ImageAliasResolver, StaticAliasResolver, TemplateStore};

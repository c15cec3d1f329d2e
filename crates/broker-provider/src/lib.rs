pub mod ec2_common;
pub mod ec2_xml;
pub mod error;
pub mod fake;
pub mod handler;
pub mod handlers;
pub mod registry;
pub mod retry;
pub mod transport;

pub use error::ProviderError;
pub use fake::FakeProviderHandler;
pub use handler::{AcquireOutcome, LaunchTemplateRef, ObservedInstance, ObservedInstanceState, ProviderHandler};
pub use handlers::{AutoScalingGroupHandler, DirectLaunchHandler, InstantFleetHandler, ManagedFleetHandler, SpotFleetHandler};
pub use registry::HandlerRegistry;
pub use retry::{with_retry, RetryPolicy};
pub use transport::{AwsCredentials, EcAwsTransport};

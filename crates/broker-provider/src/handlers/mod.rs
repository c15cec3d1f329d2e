mod autoscaling_group;
mod direct_launch;
mod instant_fleet;
mod managed_fleet;
mod spot_fleet;

pub use autoscaling_group::AutoScalingGroupHandler;
pub use direct_launch::DirectLaunchHandler;
pub use instant_fleet::InstantFleetHandler;
pub use managed_fleet::ManagedFleetHandler;
pub use spot_fleet::SpotFleetHandler;

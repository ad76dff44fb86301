pub mod client;
pub mod input;
pub mod interpolation;
pub mod prediction;
pub mod replication;

pub use client::{ClientState, NetworkClient};
pub use input::InputSampler;
pub use interpolation::Interpolator;
pub use prediction::{PREDICTION_ERROR_TOLERANCE, ReconcileOutcome, Reconciler};
pub use replication::ReplicaTracker;

pub mod config;
pub mod net;

pub use config::ClientConfig;
pub use net::{
    ClientState, InputSampler, Interpolator, NetworkClient, PREDICTION_ERROR_TOLERANCE,
    ReconcileOutcome, Reconciler, ReplicaTracker,
};

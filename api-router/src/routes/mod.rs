pub mod liveness;
pub mod readiness;
pub mod search;
pub mod spelling;

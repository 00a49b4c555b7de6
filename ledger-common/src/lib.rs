pub mod fingerprint;
pub mod health;
pub mod metrics;
pub mod retry;
pub mod shutdown;
pub mod store;
pub mod transaction;
pub mod validation;

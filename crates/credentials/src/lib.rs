//! Credential pool — rotates LLM API credentials and tracks failures.
//!
//! Each credential moves through `healthy ⇄ failing → blocked → healthy`:
//! five rate-limit-like failures inside a five-minute sliding window block a
//! credential for one hour. Selection skips blocked credentials unless every
//! credential is blocked, in which case the earliest-blocked one is handed
//! out in degraded mode. A daily reset at local midnight clears all error
//! state.

mod pool;

pub use pool::{
    CallOutcome, CredentialLease, CredentialPool, CredentialState, CredentialStatus, PoolConfig,
    PoolStatus,
};

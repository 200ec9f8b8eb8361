pub mod backoff;
pub mod circuit_breaker;
pub mod layer;

pub use backoff::Backoff;
pub use circuit_breaker::{
    CallError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
    StateTransition, TransitionListener,
};
pub use layer::{CircuitBreakerLayer, CircuitBreakerService};

//! `cv-providers` — provider adapters, response cache, availability
//! probing, and the fallback coordinator.
//!
//! An inbound request enters through [`FallbackCoordinator::generate`],
//! which consults the [`ResponseCache`], gates candidates through the
//! [`AvailabilityProbe`], and walks the configured providers in priority
//! order until one answers.

pub mod cache;
pub mod coordinator;
pub mod openai;
pub mod openrouter;
pub mod probe;
pub mod registry;
pub mod traits;
pub(crate) mod util;

// Re-exports for convenience.
pub use cache::ResponseCache;
pub use coordinator::{CoordinatorMetrics, FallbackCoordinator, GenerateOptions, MetricsSnapshot};
pub use probe::AvailabilityProbe;
pub use registry::ProviderRegistry;
pub use traits::{ChatProvider, GenerateRequest, ProviderHealth};

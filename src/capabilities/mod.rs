//! # Capability Registry
//!
//! Maps capability categories to the workers that can provide them. The
//! registry is the only place that knows which worker implements what, so
//! the rest of the engine plans in terms of capabilities and lets the
//! registry pick workers.
//!
//! Descriptors can come from the built-in set or from YAML files:
//!
//! ```yaml
//! workers:
//!   - worker_id: branding_agent
//!     capability: brand_creation
//!     specific_skills: [brand_strategy, brand_messaging]
//! ```

pub mod descriptor;
pub mod registry;

pub use descriptor::CapabilityDescriptor;
pub use registry::CapabilityRegistry;

//! Job descriptions and the documents produced for them.
//!
//! - [`spec`]: declarative [`JobSpec`] and its interventions
//! - [`metadata`]: per-frame annotations and the final metadata document
//! - [`generator`]: expands a [`GenerationRequest`] into job specs
//! - [`request`]: the batch request input document

pub mod generator;
pub mod metadata;
pub mod request;
pub mod spec;

pub use generator::{generate, GenerationRequest};
pub use metadata::{AppliedIntervention, FrameAnnotation, SimulationMetadata, SolverSnapshot};
pub use request::{BatchRequest, JobSource};
pub use spec::{
    validate_batch, ApplyMode, EditShape, Intervention, InterventionKind, JobSpec, LocalizedEdit,
    Resolution,
};

pub mod adapters;
pub mod config;
pub mod echo;
pub mod error;
pub mod facade;
pub mod orchestrator;
pub mod preprocess;
pub mod prompt;

pub use config::EngineConfig;
pub use error::{PipelineError, TransportError};
pub use facade::ProviderFacade;
pub use orchestrator::{CancelToken, GenerationRequest, GenerationResult};
pub use preprocess::{ImageAsset, ImageMime};

pub mod collection;
pub mod error;
pub mod orchestrator;
pub mod profile;
pub mod prompt;
pub mod types;

pub use collection::OutfitCollection;
pub use error::TryOnError;
pub use profile::ProfileStore;
pub use types::{Background, OutfitRecord, OutfitRequest, OutfitSize, OutfitStatus, UserProfile};

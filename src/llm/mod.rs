pub mod gemini;
pub mod media;
pub mod types;

pub use gemini::GeminiImageClient;

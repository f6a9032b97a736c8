pub mod gemini;

pub use gemini::GeminiTitleSynthesizer;

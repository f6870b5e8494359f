mod burn;
pub mod segmentation;
mod types;


pub use burn::BurnAnalyzer;
pub use types::{AnalyzerPhase, BurnSummary, FrameAnalysis, FrameResult, LiveUpdate};

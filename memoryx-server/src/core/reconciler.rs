pub mod decision;
pub mod drift_sweep;
pub mod llm_judge;
pub mod reconciler;
pub mod similarity;

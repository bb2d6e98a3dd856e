pub mod cpu;
pub mod stub;

pub use cpu::ThresholdDetector;
pub use stub::ScriptedDetector;

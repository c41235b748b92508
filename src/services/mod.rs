pub mod script;
pub mod tts;
pub mod workflow;

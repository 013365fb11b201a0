pub mod llm;
pub mod response;
pub mod review;
pub mod setup;
pub mod stages;
pub mod tts;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

//! Content-generation pipeline for PostForge.
//!
//! This crate ties together topic ideation, draft generation, Markdown
//! post-processing, quality gating, and persistence into a single job-tracked
//! run ([`pipeline::Pipeline::run`]), plus the background worker and the
//! scheduler tick that drive it.

pub mod drafts;
pub mod jobs;
pub mod pipeline;
pub mod posts;
pub mod quality;
pub mod scheduler;
pub mod slug;
pub mod topics;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

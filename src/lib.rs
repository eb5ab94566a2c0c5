//! Product image acquisition: barcode lookup, candidate discovery, visual
//! verification and gallery assembly.

pub mod backends;
pub mod batch_scheduler;
pub mod cache;
pub mod candidate_collector;
pub mod config;
pub mod errors;
pub mod gallery_assembler;
pub mod identifier;
pub mod image_pipeline;
pub mod lookup_service;
pub mod protocol;
pub mod session;
pub mod verification;

#[cfg(test)]
mod test_support;

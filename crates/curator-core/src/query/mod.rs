pub mod guards;
pub mod scoring;
pub mod slice;
pub mod structure;

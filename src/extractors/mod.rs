//! Request extractors.

mod context;

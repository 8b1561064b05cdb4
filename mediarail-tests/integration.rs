//! Integration tests for Mediarail
//!
//! These tests drive whole pipeline slices (selection through persistence,
//! and reference through playback resolution) against scripted backends and
//! a simulated compression engine, verifying the interactions between
//! modules rather than any single one.

#[path = "integration/ingest_pipeline.rs"]
mod ingest_pipeline;

#[path = "integration/resolution_fallback.rs"]
mod resolution_fallback;

#[path = "integration/catalog_listing.rs"]
mod catalog_listing;

//! Coupling of an ice sheet model (PISM) to an atmosphere model and a solid
//! earth model.
//!
//! A coupling step ([`pipeline::CouplingPipeline`]) takes atmosphere output,
//! moves near-surface temperature and precipitation onto the ice model grid
//! ([`transform`]), optionally correcting them for the difference between the
//! two models' surface elevations ([`elevation`]), and turns them into the
//! surface forcing the ice model reads ([`ablation`]). The export
//! ([`exporter::IceToEarthExporter`]) goes the other way, handing ice
//! thickness to a solid earth model.
//!
//! All numerical work is delegated to external tools behind the
//! [`gridops::GridOperations`], [`attributes::AttributeEditor`] and
//! [`submodel::SurfaceSubmodel`] traits.
pub mod ablation;
pub mod attributes;
pub mod bundle;
pub mod config;
pub mod context;
pub mod dataset;
pub mod elevation;
pub mod error;
pub mod exporter;
pub mod gridops;
pub mod logging;
pub mod managed_file;
pub mod pipeline;
pub mod scratch;
pub mod submodel;
pub mod transform;
pub mod units;
mod tools;

#[cfg(test)]
mod test_utils;

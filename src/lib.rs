//! Classifies a photograph into one of the seven types of the Bristol
//! stool-form chart.
//!
//! A request flows through [`upload::UploadGate`], a uniquely named
//! [`scratch::ScratchFile`], the [`preprocess::Preprocessor`], the
//! [`inference::InferenceEngine`] and finally [`mapper::map`]. The
//! [`pipeline::Classifier`] wires these together; [`server`] exposes it over
//! HTTP.

pub mod config;
pub mod error;
pub mod inference;
pub mod mapper;
pub mod pipeline;
pub mod preprocess;
pub mod registry;
pub mod scratch;
pub mod server;
pub mod upload;
pub mod util;

//! Extraction of binned interaction matrices from filtered Hi-C read pairs.
//!
//! The crate is the binning stage of a Hi-C processing pipeline: given a
//! working directory populated by the mapping, filtering, and normalization
//! stages, it assembles raw or normalized contact matrices at a requested
//! resolution over the whole genome, one region, or the intersection of two
//! regions, and writes them as sparse text files and optional heatmaps.
//! Every run is registered in the per-workdir job ledger ([`ledger`]), which
//! also drives the discovery of upstream inputs.

pub mod biases;
pub mod config;
pub mod contacts;
pub mod export;
pub mod figure;
pub mod fingerprint;
pub mod genome;
pub mod ledger;
pub mod matrix;
pub mod pipeline;
pub mod region;
pub mod utils;

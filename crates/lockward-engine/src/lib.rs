#![doc = include_str!("../README.md")]

//! Lockward race instrumentation engine.
//!
//! This crate turns a lowered driver program into lockset race-checking
//! obligations: lockset modelling, entry-point instrumentation, pairwise
//! checker generation, device-disable slicing, existential summary
//! candidates, and the pipeline that runs them in order.

pub mod context;
pub mod driver;
pub mod init_instrumentation;
pub mod instrumentation;
pub mod lockset;
pub mod options;
pub mod pairwise;
pub mod pipeline;
pub mod region;
pub mod registration;
pub mod report;
pub mod shared_state;
pub mod slicing;
pub mod summary;

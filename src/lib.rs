//! Camera fingerprint extraction and style transfer for infrared imagery.
//!
//! [`extract`] averages a corpus of frames from one camera and splits the mean
//! into a low-frequency vignetting map and a high-frequency noise map.
//! [`apply`] imprints such a [`CameraFingerprint`] onto a clean image.
//! Everything that touches the filesystem lives in [`pipeline`].

pub mod application;
pub mod config;
pub mod error;
pub mod extraction;
pub mod fingerprint;
pub mod image_utils;
pub mod metadata;
pub mod pipeline;
pub mod report;

pub use application::{ApplicationParams, StyleApplicator, apply};
pub use config::StyleConfig;
pub use error::{Result, StyleError};
pub use extraction::{ExtractionParams, FingerprintExtractor, MeanAccumulator, extract};
pub use fingerprint::{CameraFingerprint, FingerprintMetadata, FingerprintStore};
pub use image_utils::{ChannelMode, Interpolation, Raster};

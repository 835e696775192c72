//! Backend selection module.
//!
//! This module defines the engine identifiers a layer can be constructed
//! with and the capability check that tells whether the matching kernels
//! were compiled into this build.
//!
//! # Supported Backends
//!
//! - `Internal` — portable reference kernels, always available (default).
//! - `Avx` — AVX2-accelerated kernels, available only when the crate is
//!   built with `--features simd` on an `x86_64` target with `avx2`.
//! - `Nnpack` / `Cblas` — engine identifiers reserved for vendor-library
//!   kernels; no kernel ships in this build, so selecting them yields an
//!   [`crate::NnError::UnsupportedBackend`] error.
//!
//! The backend is a per-layer property fixed at construction time, not a
//! process-global: two layers in one network may use different engines.
//! Dispatch never falls back silently: a missing kernel is an error, so a
//! build without AVX2 cannot masquerade as one with it.

use core::fmt;

/// Enumeration of engine identifiers.
///
/// An identifier names an implementation strategy for the same
/// mathematical operation; it never changes the numerical contract, only
/// which kernel carries it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Portable reference kernels (default).
    #[default]
    Internal,
    /// AVX2 SIMD kernels, feature-gated.
    Avx,
    /// Reserved for NNPACK-backed kernels; not compiled in.
    Nnpack,
    /// Reserved for CBLAS-backed kernels; not compiled in.
    Cblas,
}

impl Backend {
    /// Returns `true` when this build carries kernels for the engine.
    ///
    /// Layer constructors call this to fail fast on an engine that could
    /// never compute; the dispatch layer re-checks at `compute` time so a
    /// hand-built op context gets the same explicit error.
    #[must_use]
    pub fn available(self) -> bool {
        match self {
            Self::Internal => true,
            Self::Avx => cfg!(all(
                feature = "simd",
                target_arch = "x86_64",
                target_feature = "avx2"
            )),
            Self::Nnpack | Self::Cblas => false,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Internal => "Internal",
            Self::Avx => "AVX",
            Self::Nnpack => "NNPACK",
            Self::Cblas => "CBLAS",
        };
        f.write_str(name)
    }
}

/// Returns the engine used when a layer does not request one explicitly.
#[must_use]
pub fn default_engine() -> Backend {
    Backend::Internal
}

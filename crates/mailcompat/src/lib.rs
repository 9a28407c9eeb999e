#![forbid(unsafe_code)]

//! Email client compatibility engine.
//!
//! Fetches the caniemail feature dataset, derives per-client CSS and HTML
//! compatibility rules from it, and rewrites email markup the way each
//! modeled client would receive it, with a warning trail of everything that
//! was dropped or is known to degrade.
//!
//! # Pipeline
//! 1. [`dataset`] fetches and caches the feature dataset.
//! 2. [`rules`] turns it into per-client rules, memoized per dataset
//!    generation.
//! 3. [`transform`] strips and flags markup against those rules.
//! 4. [`outlook`] layers the Word-engine approximation for Outlook.
//! 5. [`render`] wraps the result with client resets; [`analyse`] re-checks
//!    the original markup against each client.
//!
//! [`Engine`] ties the pipeline together behind one thread-safe handle.

pub mod analyse;
pub mod client;
pub mod config;
pub mod css;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod html;
pub mod inline;
pub mod normalize;
pub mod outlook;
pub mod render;
pub mod rules;
pub mod transform;
pub mod warning;

pub use analyse::AnalysisResult;
pub use client::{ClientDescriptor, ClientId, EngineKind, descriptors};
pub use config::EngineConfig;
pub use dataset::{Dataset, DatasetCache, DatasetSource, HttpDatasetSource};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use normalize::{NormalizeOptions, NormalizedEmail, normalize_email};
pub use render::RenderResult;
pub use rules::{ClientCompatibility, ClientRules, CompatibilityRule, RulePattern};
pub use transform::TransformOutput;
pub use warning::{DomDiff, Severity, Warning, WarningKind};

//! ACL template validation for fleetguard.
//!
//! A [`PolicyEngine`] holds forbidden and required checks; the
//! [`TemplateValidator`] wraps it with structural checks and turns the
//! outcome into a [`ValidationResult`](fleetguard_types::ValidationResult).
//! The [`diff`] module compares templates with live state.

pub mod builtin;
pub mod diff;
pub mod engine;
pub mod validator;

pub use diff::{generate_template, reconcile, RuleChange, RuleSetDiff};
pub use engine::{CheckMeta, PolicyEngine, Predicate};
pub use validator::{TemplateValidator, SCHEMA_INVALID};

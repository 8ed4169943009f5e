//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - Field names are camelCase.
//! - Phone numbers are serialised in E.164 form.
//! - Datetimes are serialised as RFC 3339 strings.

pub mod admin;
pub mod auth;
pub mod catalogue;
pub mod matches;
pub mod report;
pub mod session;

//! Controller module for package-operator.
//!
//! Contains the reconciler, the per-request state machine, the processing of
//! completed install jobs and error handling.
//!
//! Components, leaves first:
//! - `executor` resolves the image install jobs run with
//! - `pod_logs` opens installer log streams
//! - `manifests` parses installer output
//! - `job_completer` turns installer output into cluster objects
//! - `handler` drives one request through the install job lifecycle
//! - `factory` builds handlers
//! - `reconciler` fetches, dispatches and persists

pub mod context;
pub mod error;
pub mod executor;
pub mod factory;
pub mod handler;
pub mod job_completer;
pub mod manifests;
pub mod pod_logs;
pub mod reconciler;

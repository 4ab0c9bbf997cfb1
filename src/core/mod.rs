//! This module constitutes the coordination core of tandem: a headless,
//! backend-agnostic engine that keeps a mutable document, in-flight AI
//! requests, and a live interpreter session mutually consistent under
//! concurrent, cancellable, partially-ordered events.

pub mod annotate;
pub mod backend;
pub mod conversation;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod event;
pub mod id;
pub mod interpreter;
pub mod patch;
pub mod persistence;
pub mod suggestion;

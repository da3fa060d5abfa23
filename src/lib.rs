//! pyclinic: review, repair, and safely execute Python snippets with a
//! language model in the loop.
//!
//! The core is a sandboxed execution engine ([`sandbox`]) and the analysis
//! pipeline around it: a static analyzer ([`analyzer`]), a finding
//! aggregator ([`aggregate`]), and a bounded correction loop ([`session`])
//! that asks an untrusted language-model collaborator ([`llm`]) for candidate
//! fixes and validates every one of them the same way it validates user
//! input.

pub mod aggregate;
pub mod analyzer;
pub mod config;
pub mod fragment;
pub mod llm;
pub mod sandbox;
pub mod session;

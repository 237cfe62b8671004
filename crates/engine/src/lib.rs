//! Installation engine for agent skills.
//!
//! A skill is a directory with a `SKILL.md` manifest (YAML frontmatter with a
//! name and description, per the Agent Skills open standard). The engine keeps
//! exactly one canonical copy of each installed skill under
//! `<scope-base>/.agents/skills/` and presents it inside the configuration
//! directory of every selected agent tool — symlink where possible, physical
//! copy otherwise — while recording provenance in a lockfile for update
//! detection and safe removal.

pub mod agents;
pub mod error;
pub mod fanout;
pub mod ledger;
pub mod manifest;
pub mod ops;
pub mod sanitize;
pub mod source;
pub mod store;
pub mod types;

pub use {
    error::{Error, Result},
    types::{InstallScope, SkillIdentity},
};

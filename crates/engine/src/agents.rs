//! Agent tool registry.
//!
//! Every supported agent tool is a data row: where its skills directory
//! lives per scope, and how to tell whether the tool is present on this
//! machine. The registry is a constructed value rather than a process-wide
//! singleton so tests can point it at temp directories.

use std::path::{Path, PathBuf};

use crate::{
    error::{Error, Result},
    store::CANONICAL_SUBDIR,
    types::InstallScope,
};

/// How to decide whether an agent tool is installed on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// A config directory exists under the home or project root.
    DirExists(&'static str),
    /// A binary is resolvable on `PATH`.
    CommandOnPath(&'static str),
    /// An environment variable is set (to anything).
    EnvVarSet(&'static str),
}

/// One supported agent tool.
#[derive(Debug, Clone)]
pub struct AgentTarget {
    pub id: &'static str,
    pub display_name: &'static str,
    /// Skills directory relative to the project root.
    pub project_dir: &'static str,
    /// Skills directory relative to the home directory.
    pub global_dir: &'static str,
    pub detect: Detection,
}

impl AgentTarget {
    /// True when this agent's skills directory is the canonical store
    /// itself (the `.agents` open standard). Presenting into it must not
    /// create a self-referential link.
    #[must_use]
    pub fn is_canonical_dir(&self) -> bool {
        self.project_dir == CANONICAL_SUBDIR
    }
}

fn builtin_agents() -> Vec<AgentTarget> {
    vec![
        AgentTarget {
            id: "agents-standard",
            display_name: "Agents standard (.agents)",
            project_dir: CANONICAL_SUBDIR,
            global_dir: CANONICAL_SUBDIR,
            detect: Detection::DirExists(".agents"),
        },
        AgentTarget {
            id: "claude-code",
            display_name: "Claude Code",
            project_dir: ".claude/skills",
            global_dir: ".claude/skills",
            detect: Detection::DirExists(".claude"),
        },
        AgentTarget {
            id: "cursor",
            display_name: "Cursor",
            project_dir: ".cursor/skills",
            global_dir: ".cursor/skills",
            detect: Detection::DirExists(".cursor"),
        },
        AgentTarget {
            id: "codex",
            display_name: "Codex CLI",
            project_dir: ".codex/skills",
            global_dir: ".codex/skills",
            detect: Detection::CommandOnPath("codex"),
        },
        AgentTarget {
            id: "windsurf",
            display_name: "Windsurf",
            project_dir: ".windsurf/skills",
            global_dir: ".windsurf/skills",
            detect: Detection::DirExists(".windsurf"),
        },
        AgentTarget {
            id: "cline",
            display_name: "Cline",
            project_dir: ".cline/skills",
            global_dir: ".cline/skills",
            detect: Detection::DirExists(".cline"),
        },
        AgentTarget {
            id: "gemini",
            display_name: "Gemini CLI",
            project_dir: ".gemini/skills",
            global_dir: ".gemini/skills",
            detect: Detection::CommandOnPath("gemini"),
        },
        AgentTarget {
            id: "copilot",
            display_name: "GitHub Copilot CLI",
            project_dir: ".copilot/skills",
            global_dir: ".copilot/skills",
            detect: Detection::CommandOnPath("copilot"),
        },
        AgentTarget {
            id: "opencode",
            display_name: "OpenCode",
            project_dir: ".opencode/skills",
            global_dir: ".opencode/skills",
            detect: Detection::EnvVarSet("OPENCODE"),
        },
    ]
}

/// Home directory of the current user.
pub fn home_dir() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or_else(|| Error::message("could not determine home directory"))
}

/// Registry of agent targets bound to concrete home and project roots.
pub struct AgentRegistry {
    home: PathBuf,
    project_root: PathBuf,
    agents: Vec<AgentTarget>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new(home: PathBuf, project_root: PathBuf) -> Self {
        Self {
            home,
            project_root,
            agents: builtin_agents(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(home_dir()?, std::env::current_dir()?))
    }

    #[must_use]
    pub fn agents(&self) -> &[AgentTarget] {
        &self.agents
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&AgentTarget> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Root directory a scope resolves against. The canonical store and
    /// every agent directory for that scope live under it.
    #[must_use]
    pub fn scope_base(&self, scope: InstallScope) -> &Path {
        match scope {
            InstallScope::Project => &self.project_root,
            InstallScope::Global => &self.home,
        }
    }

    /// The skills directory an agent reads from under the given scope.
    #[must_use]
    pub fn skills_dir(&self, agent: &AgentTarget, scope: InstallScope) -> PathBuf {
        match scope {
            InstallScope::Project => self.project_root.join(agent.project_dir),
            InstallScope::Global => self.home.join(agent.global_dir),
        }
    }

    fn detected(&self, agent: &AgentTarget) -> bool {
        match &agent.detect {
            Detection::DirExists(rel) => {
                self.home.join(rel).is_dir() || self.project_root.join(rel).is_dir()
            },
            Detection::CommandOnPath(cmd) => which::which(cmd).is_ok(),
            Detection::EnvVarSet(var) => std::env::var_os(var).is_some(),
        }
    }

    /// Agents that appear installed on this machine. Probes run
    /// concurrently; each is an independent filesystem or environment check.
    pub async fn detect_installed(&self) -> Vec<&AgentTarget> {
        let checks = self
            .agents
            .iter()
            .map(|agent| async move { self.detected(agent).then_some(agent) });
        futures::future::join_all(checks)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

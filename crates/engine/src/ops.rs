//! High-level operations: install, remove, list, check.
//!
//! Wires the canonical store, fan-out, agent registry, and ledger together.
//! Resolving remote sources into a local directory happens before this layer;
//! an [`InstallRequest`] always carries a skill directory already on disk.

use std::path::PathBuf;

use crate::{
    agents::{AgentRegistry, AgentTarget},
    error::{Error, Result},
    fanout,
    ledger::{IdentityProbe, LedgerStore, check_for_updates},
    manifest::read_manifest,
    source::ParsedSource,
    store::{CanonicalStore, manifest_hash},
    types::{
        AgentLinkState, CanonicalEntry, InstallScope, InstalledSkill, LedgerEntry, LinkStatus,
        PresentationResult, RemovalResult, SkillIdentity, UpdateReport,
    },
};

/// Which agents an operation fans out to.
#[derive(Debug, Clone)]
pub enum AgentSelection {
    /// Agents detected on this machine.
    Detected,
    /// Every agent the registry knows.
    All,
    /// Explicit agent ids; unknown ids are an error.
    Ids(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub scope: InstallScope,
    pub agents: AgentSelection,
    pub overwrite: bool,
}

/// One skill ready to install: a directory on disk containing SKILL.md plus
/// the provenance of where it came from.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub skill_dir: PathBuf,
    /// Raw source string as the user gave it.
    pub source: String,
    pub parsed: ParsedSource,
    /// Remote content identity when the resolver knows it (e.g. a subtree
    /// hash); local installs fall back to hashing SKILL.md.
    pub remote_identity: Option<String>,
    pub skill_path_in_source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub identity: SkillIdentity,
    pub canonical_path: PathBuf,
    pub presentations: Vec<PresentationResult>,
}

#[derive(Debug, Clone)]
pub struct RemovalOutcome {
    pub name: String,
    /// Per-target results; one locked directory never aborts the rest.
    pub removals: Vec<RemovalResult>,
    pub released_canonical: bool,
    /// Agents (targeted or not) whose presentation still points at the
    /// canonical entry, which is kept in that case.
    pub still_referenced_by: Vec<String>,
}

/// The installation engine: registry + ledger bound to concrete roots.
pub struct Engine {
    registry: AgentRegistry,
    ledger: LedgerStore,
}

impl Engine {
    #[must_use]
    pub fn new(registry: AgentRegistry, ledger: LedgerStore) -> Self {
        Self { registry, ledger }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(
            AgentRegistry::from_env()?,
            LedgerStore::new(LedgerStore::default_path()?),
        ))
    }

    #[must_use]
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    #[must_use]
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    async fn resolve_targets(&self, selection: &AgentSelection) -> Result<Vec<&AgentTarget>> {
        match selection {
            AgentSelection::All => Ok(self.registry.agents().iter().collect()),
            AgentSelection::Detected => Ok(self.registry.detect_installed().await),
            AgentSelection::Ids(ids) => ids
                .iter()
                .map(|id| {
                    self.registry
                        .get(id)
                        .ok_or_else(|| Error::message(format!("unknown agent '{id}'")))
                })
                .collect(),
        }
    }

    /// Install one skill: materialize the canonical entry, fan it out to the
    /// selected agents, record provenance.
    ///
    /// Presentation failures are per-agent and never abort the install; the
    /// ledger entry is written as long as the canonical entry exists.
    pub async fn install(
        &self,
        request: &InstallRequest,
        options: &InstallOptions,
    ) -> Result<InstallOutcome> {
        let manifest = read_manifest(&request.skill_dir).await?;
        let namespace = request.parsed.namespace_hint();
        let identity = SkillIdentity::new(namespace.as_deref(), &manifest.name);

        let store = CanonicalStore::new(self.registry.scope_base(options.scope));
        let entry = store
            .materialize(&identity, &request.skill_dir, options.overwrite)
            .await?;

        let targets = self.resolve_targets(&options.agents).await?;
        let mut presentations = Vec::with_capacity(targets.len());
        for target in targets {
            let skills_dir = self.registry.skills_dir(target, options.scope);
            presentations.push(fanout::present(&entry, target.id, &skills_dir).await);
        }

        let content_identity = match &request.remote_identity {
            Some(identity) => identity.clone(),
            None => manifest_hash(&entry.path)?,
        };
        self.ledger.record(
            &identity.to_string(),
            LedgerEntry {
                source: request.source.clone(),
                source_type: request.parsed.source_type(),
                source_url: request.parsed.source_url(),
                skill_path_in_source: request.skill_path_in_source.clone(),
                content_identity,
                namespace: identity.namespace.clone(),
                installed_at_ms: 0,
                updated_at_ms: 0,
            },
        )?;

        tracing::info!(
            skill = %identity,
            agents = presentations.len(),
            "installed skill"
        );
        Ok(InstallOutcome {
            identity,
            canonical_path: entry.path,
            presentations,
        })
    }

    /// Install a batch of skills concurrently. Each skill's outcome is
    /// independent; one failure never blocks the rest.
    pub async fn install_all(
        &self,
        requests: &[InstallRequest],
        options: &InstallOptions,
    ) -> Vec<Result<InstallOutcome>> {
        let futures = requests.iter().map(|req| self.install(req, options));
        futures::future::join_all(futures).await
    }

    /// Remove a skill's presentations from the selected agents, release the
    /// canonical entry once nothing references it anymore, and drop the
    /// ledger entry along with it.
    ///
    /// Removing from one agent leaves the others and the canonical entry
    /// intact; removing the last referencing agent deletes the entry.
    pub async fn remove(
        &self,
        name: &str,
        scope: InstallScope,
        targets: &AgentSelection,
    ) -> Result<RemovalOutcome> {
        let (key, entry) = self.lookup(name)?;
        let skill_name = key.rsplit('/').next().unwrap_or(&key).to_string();
        let identity = SkillIdentity {
            namespace: entry.namespace.clone(),
            name: skill_name.clone(),
        };

        let store = CanonicalStore::new(self.registry.scope_base(scope));
        let canonical_path = store.entry_path(&identity)?;

        // The standard `.agents` directory IS the canonical store; its entry
        // is removed through release below, not unpresented like a link.
        let mut removals = Vec::new();
        for agent in self.resolve_targets(targets).await? {
            if agent.is_canonical_dir() {
                continue;
            }
            let skills_dir = self.registry.skills_dir(agent, scope);
            match fanout::unpresent(agent.id, &skills_dir, &skill_name).await {
                Ok(path) => removals.push(RemovalResult {
                    agent: agent.id.to_string(),
                    path,
                    success: true,
                    error: None,
                }),
                Err(e) => removals.push(RemovalResult {
                    agent: agent.id.to_string(),
                    path: skills_dir.join(&skill_name),
                    success: false,
                    error: Some(e.to_string()),
                }),
            }
        }

        // Probe both scopes: any surviving presentation that resolves to this
        // canonical entry keeps it alive, wherever it lives.
        let mut still_referenced_by = Vec::new();
        for agent in self.registry.agents() {
            if agent.is_canonical_dir() {
                continue;
            }
            let referenced = [InstallScope::Project, InstallScope::Global]
                .into_iter()
                .any(|s| {
                    let skills_dir = self.registry.skills_dir(agent, s);
                    fanout::references_canonical(&skills_dir, &skill_name, &canonical_path)
                });
            if referenced {
                still_referenced_by.push(agent.id.to_string());
            }
        }

        let released_canonical = store
            .release_if_unreferenced(&identity, &still_referenced_by)
            .await?;
        // Partial removal keeps the provenance: the skill is still installed
        // for the agents that reference it.
        if still_referenced_by.is_empty() {
            self.ledger.remove(&key)?;
        }

        tracing::info!(skill = %identity, released_canonical, "removed skill");
        Ok(RemovalOutcome {
            name: skill_name,
            removals,
            released_canonical,
            still_referenced_by,
        })
    }

    /// All installed skills with their per-agent presentation status.
    pub fn list(
        &self,
        scope: InstallScope,
        agent_filter: Option<&str>,
    ) -> Result<Vec<InstalledSkill>> {
        let ledger = self.ledger.load()?;
        let store = CanonicalStore::new(self.registry.scope_base(scope));

        let mut rows = Vec::with_capacity(ledger.skills.len());
        for (key, entry) in &ledger.skills {
            let name = key.rsplit('/').next().unwrap_or(key).to_string();
            let identity = SkillIdentity {
                namespace: entry.namespace.clone(),
                name: name.clone(),
            };
            let canonical_path = store.entry_path(&identity)?;

            let mut agents = Vec::new();
            for agent in self.registry.agents() {
                if let Some(filter) = agent_filter
                    && agent.id != filter
                {
                    continue;
                }
                let (path, status) = if agent.is_canonical_dir() {
                    let status = if canonical_path.is_dir() {
                        LinkStatus::Copied
                    } else {
                        LinkStatus::Missing
                    };
                    (canonical_path.clone(), status)
                } else {
                    let skills_dir = self.registry.skills_dir(agent, scope);
                    let status = fanout::presentation_status(&skills_dir, &name, &canonical_path);
                    (skills_dir.join(&name), status)
                };
                agents.push(AgentLinkState {
                    agent: agent.id.to_string(),
                    path,
                    status,
                });
            }

            rows.push(InstalledSkill {
                name,
                namespace: entry.namespace.clone(),
                canonical_path,
                source: entry.source.clone(),
                source_type: entry.source_type,
                agents,
            });
        }
        Ok(rows)
    }

    /// Query every ledger entry for available updates.
    pub async fn check_updates(&self, probe: &dyn IdentityProbe) -> Result<Vec<UpdateReport>> {
        let ledger = self.ledger.load()?;
        Ok(check_for_updates(&ledger, probe).await)
    }

    /// Find a ledger entry by exact key, or by bare name when the key carries
    /// a namespace prefix. An ambiguous bare name is an error.
    fn lookup(&self, name: &str) -> Result<(String, LedgerEntry)> {
        let ledger = self.ledger.load()?;
        if let Some(entry) = ledger.skills.get(name) {
            return Ok((name.to_string(), entry.clone()));
        }
        let suffix = format!("/{name}");
        let mut matches: Vec<_> = ledger
            .skills
            .iter()
            .filter(|(key, _)| key.ends_with(&suffix))
            .collect();
        match matches.len() {
            0 => Err(Error::NotInstalled(name.to_string())),
            1 => {
                let (key, entry) = matches.remove(0);
                Ok((key.clone(), entry.clone()))
            },
            _ => Err(Error::message(format!(
                "'{name}' matches multiple installed skills: {}",
                matches
                    .iter()
                    .map(|(k, _)| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    #[must_use]
    pub fn canonical_entry(&self, identity: &SkillIdentity, scope: InstallScope) -> Option<CanonicalEntry> {
        let store = CanonicalStore::new(self.registry.scope_base(scope));
        let path = store.entry_path(identity).ok()?;
        path.is_dir().then_some(CanonicalEntry {
            identity: identity.clone(),
            path,
        })
    }
}

//! Named deployment targets and the per-run context that selects one.

use thiserror::Error;

/// Name of the environment that receives the risky-branch confirmation.
pub const PRODUCTION: &str = "production";

/// A remote environment: hosts plus the buckets that mirror its static
/// output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Environment {
    /// Environment name, for example `staging` or `production`.
    pub name: String,
    /// Hosts in the order they are visited.
    pub hosts: Vec<String>,
    /// Default branch; empty when the environment does not pin one.
    pub branch: String,
    /// Whether code and configuration are pushed to `hosts` at all.
    pub deploy_to_servers: bool,
    /// Storage buckets receiving the static artifacts.
    pub buckets: Vec<String>,
}

impl Environment {
    /// Builds an environment with no hosts, branch, or buckets.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: Vec::new(),
            branch: String::new(),
            deploy_to_servers: false,
            buckets: Vec::new(),
        }
    }

    /// Returns `true` for the production environment.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.name == PRODUCTION
    }
}

/// Raised when an operation runs without what it needs selected.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PreconditionError {
    /// No environment was selected for this run.
    #[error("no environment selected; choose one of the configured targets")]
    EnvironmentNotSelected,
    /// The requested environment is not registered.
    #[error("unknown environment {name}")]
    UnknownEnvironment {
        /// Requested name.
        name: String,
    },
    /// Remote work needs a branch and none was selected.
    #[error("no branch selected for {environment}")]
    BranchNotSelected {
        /// Selected environment.
        environment: String,
    },
    /// Remote work was requested for an environment that does not deploy to
    /// servers.
    #[error("{environment} does not deploy to servers; enable deploy_to_servers first")]
    RemoteDeployDisabled {
        /// Selected environment.
        environment: String,
    },
}

/// Raised when registering environments.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TargetError {
    /// Two environments share a name.
    #[error("environment {name} is registered more than once")]
    Duplicate {
        /// Duplicated name.
        name: String,
    },
    /// An environment has a blank name.
    #[error("environment names must not be empty")]
    BlankName,
}

/// The environments a project can deploy to.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TargetRegistry {
    environments: Vec<Environment>,
}

impl TargetRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an environment.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError`] for blank or duplicate names.
    pub fn register(&mut self, environment: Environment) -> Result<(), TargetError> {
        if environment.name.trim().is_empty() {
            return Err(TargetError::BlankName);
        }
        if self.get(&environment.name).is_some() {
            return Err(TargetError::Duplicate {
                name: environment.name,
            });
        }
        self.environments.push(environment);
        Ok(())
    }

    /// Looks up an environment by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|env| env.name == name)
    }

    /// Registered environment names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.environments.iter().map(|env| env.name.as_str())
    }

    /// Starts a run against the named environment.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError::UnknownEnvironment`] when `name` is not
    /// registered.
    pub fn select(&self, name: &str) -> Result<RunContext, PreconditionError> {
        self.get(name)
            .cloned()
            .map(RunContext::for_environment)
            .ok_or_else(|| PreconditionError::UnknownEnvironment {
                name: name.to_owned(),
            })
    }
}

/// Immutable selection of environment and branch for one run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunContext {
    environment: Option<Environment>,
    branch: Option<String>,
}

impl RunContext {
    /// A context with nothing selected. Every remote operation rejects it.
    #[must_use]
    pub fn unselected() -> Self {
        Self::default()
    }

    /// A context targeting `environment` on its default branch.
    #[must_use]
    pub const fn for_environment(environment: Environment) -> Self {
        Self {
            environment: Some(environment),
            branch: None,
        }
    }

    /// Returns a copy that targets `branch` instead of the default.
    #[must_use]
    pub fn with_branch(self, branch: impl Into<String>) -> Self {
        Self {
            branch: Some(branch.into()),
            ..self
        }
    }

    /// The selected environment.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError::EnvironmentNotSelected`] when none was
    /// selected.
    pub fn environment(&self) -> Result<&Environment, PreconditionError> {
        self.environment
            .as_ref()
            .ok_or(PreconditionError::EnvironmentNotSelected)
    }

    /// The explicit branch, or the environment's non-empty default.
    #[must_use]
    pub fn branch(&self) -> Option<&str> {
        self.branch
            .as_deref()
            .or_else(|| self.environment.as_ref().map(|env| env.branch.as_str()))
            .map(str::trim)
            .filter(|branch| !branch.is_empty())
    }

    /// The effective branch, required for remote work.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError`] when no environment or branch is
    /// selected.
    pub fn require_branch(&self) -> Result<&str, PreconditionError> {
        let environment = self.environment()?;
        self.branch()
            .ok_or_else(|| PreconditionError::BranchNotSelected {
                environment: environment.name.clone(),
            })
    }

    /// The selected environment, provided it deploys to servers.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError`] when no environment is selected or it
    /// does not deploy to servers.
    pub fn require_remote(&self) -> Result<&Environment, PreconditionError> {
        let environment = self.environment()?;
        if !environment.deploy_to_servers {
            return Err(PreconditionError::RemoteDeployDisabled {
                environment: environment.name.clone(),
            });
        }
        Ok(environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn registry() -> TargetRegistry {
        let mut registry = TargetRegistry::new();
        let mut staging = Environment::new("staging");
        staging.branch = String::from("master");
        registry
            .register(staging)
            .unwrap_or_else(|err| panic!("register staging: {err}"));
        registry
            .register(Environment::new(PRODUCTION))
            .unwrap_or_else(|err| panic!("register production: {err}"));
        registry
    }

    #[rstest]
    fn duplicate_environments_are_rejected(mut registry: TargetRegistry) {
        let err = registry
            .register(Environment::new("staging"))
            .expect_err("duplicate should fail");

        assert_eq!(
            err,
            TargetError::Duplicate {
                name: String::from("staging")
            }
        );
    }

    #[rstest]
    fn selecting_an_unknown_environment_fails(registry: TargetRegistry) {
        let err = registry.select("qa").expect_err("unknown environment");

        assert!(matches!(err, PreconditionError::UnknownEnvironment { ref name } if name == "qa"));
    }

    #[rstest]
    fn explicit_branch_overrides_the_default(registry: TargetRegistry) {
        let ctx = registry
            .select("staging")
            .unwrap_or_else(|err| panic!("select staging: {err}"));
        assert_eq!(ctx.branch(), Some("master"));

        let feature = ctx.with_branch("feature/maps");
        assert_eq!(feature.branch(), Some("feature/maps"));
    }

    #[rstest]
    fn production_without_branch_cannot_do_remote_work(registry: TargetRegistry) {
        let ctx = registry
            .select(PRODUCTION)
            .unwrap_or_else(|err| panic!("select production: {err}"));

        assert!(matches!(
            ctx.require_branch(),
            Err(PreconditionError::BranchNotSelected { .. })
        ));
        assert!(matches!(
            ctx.require_remote(),
            Err(PreconditionError::RemoteDeployDisabled { .. })
        ));
    }

    #[rstest]
    fn unselected_context_rejects_everything() {
        let ctx = RunContext::unselected();

        assert_eq!(
            ctx.environment(),
            Err(PreconditionError::EnvironmentNotSelected)
        );
        assert_eq!(ctx.branch(), None);
    }
}

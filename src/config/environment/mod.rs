#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use super::settings::{Config, EnvironmentConfig};

/// Resolved connection parameters for one deployment environment.
///
/// Descriptors are immutable; a client built from one keeps pointing at the
/// same target for its whole life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentDescriptor {
    pub name: String,
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub credential: Option<String>,
    pub database: String,
    #[serde(skip_serializing)]
    pub options: BTreeMap<String, String>,
}

impl EnvironmentDescriptor {
    /// Logical database used when an environment does not name one
    pub const DEFAULT_DATABASE: &'static str = "default";
}

/// Maps environment names to descriptors using only the loaded configuration
#[derive(Debug, Clone)]
pub struct EnvironmentResolver {
    environments: BTreeMap<String, EnvironmentConfig>,
    default_environment: String,
    base_dir: std::path::PathBuf,
}

impl EnvironmentResolver {
    #[inline]
    pub fn new(config: &Config) -> Self {
        Self {
            environments: config.environments.clone(),
            default_environment: config.default_environment.clone(),
            base_dir: config.base_dir.clone(),
        }
    }

    /// Names of all configured environments
    #[inline]
    pub fn names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }

    #[inline]
    pub fn default_name(&self) -> &str {
        &self.default_environment
    }

    /// Resolve an environment by name.
    ///
    /// Empty or unknown names resolve to the default environment. Relative
    /// filesystem endpoints are anchored at the configuration directory.
    #[inline]
    pub fn resolve(&self, name: &str) -> EnvironmentDescriptor {
        let requested = name.trim();
        let (name, env) = match self.environments.get_key_value(requested) {
            Some((name, env)) => (name.as_str(), Some(env)),
            None => {
                if !requested.is_empty() {
                    debug!(
                        "Unknown environment '{}', using default '{}'",
                        requested, self.default_environment
                    );
                }
                (
                    self.default_environment.as_str(),
                    self.environments.get(&self.default_environment),
                )
            }
        };

        let endpoint = env.map_or_else(
            || self.anchor_endpoint("vectors"),
            |env| self.anchor_endpoint(env.endpoint.trim()),
        );

        EnvironmentDescriptor {
            name: name.to_string(),
            endpoint,
            credential: env
                .and_then(|env| env.token.clone())
                .filter(|token| !token.trim().is_empty()),
            database: env
                .and_then(|env| env.database.clone())
                .filter(|db| !db.trim().is_empty())
                .unwrap_or_else(|| EnvironmentDescriptor::DEFAULT_DATABASE.to_string()),
            options: env.map(|env| env.options.clone()).unwrap_or_default(),
        }
    }

    fn anchor_endpoint(&self, endpoint: &str) -> String {
        if endpoint.contains("://") || Path::new(endpoint).is_absolute() {
            return endpoint.to_string();
        }
        self.base_dir.join(endpoint).display().to_string()
    }
}

//! Deployment target: which network and which environment a run acts on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment environment. Each environment keeps its own address book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Develop,
    Prod,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Develop => "develop",
            Environment::Prod => "prod",
        }
    }

    /// Fail unless `self` is the environment a campaign was written for.
    pub fn ensure(self, expected: Environment) -> Result<(), EnvironmentMismatch> {
        if self == expected {
            Ok(())
        } else {
            Err(EnvironmentMismatch {
                expected,
                actual: self,
            })
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "develop" | "dev" => Ok(Environment::Develop),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(format!(
                "unknown environment `{}` (expected `develop` or `prod`)",
                other
            )),
        }
    }
}

/// A run was pointed at the wrong environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentMismatch {
    pub expected: Environment,
    pub actual: Environment,
}

impl fmt::Display for EnvironmentMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected ENV: {}; actual ENV: {}",
            self.expected, self.actual
        )
    }
}

impl std::error::Error for EnvironmentMismatch {}

/// The `(network, environment)` pair every registry, snapshot and timelock
/// operation is scoped to.
///
/// Network names may be layered with `/` (e.g. `mainnet/eth`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub network: String,
    pub environment: Environment,
}

impl Target {
    pub fn new(network: impl Into<String>, environment: Environment) -> Self {
        Self {
            network: network.into(),
            environment,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.network, self.environment)
    }
}

//! TOML policy catalog.
//!
//! The catalog is loaded once at startup and read-only afterwards.  Every
//! predicate is validated at load; a malformed policy never enters the
//! catalog.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use mediwel_contracts::error::{EngineError, EngineResult};
use mediwel_contracts::policy::{Policy, PolicyId};

/// Read-only access to loaded policies.
pub trait PolicyCatalog: Send + Sync {
    fn get(&self, id: &PolicyId) -> Option<Policy>;
    /// All policies, ordered by id.
    fn all(&self) -> Vec<Policy>;
}

#[derive(Deserialize)]
struct CatalogDoc {
    #[serde(default)]
    policy: Vec<Policy>,
}

/// A catalog parsed from TOML.
///
/// ```toml
/// [[policy]]
/// id = "seoul-senior-dental"
/// title = "노인 임플란트 지원"
/// description = "만 65세 이상 저소득 노인의 임플란트 시술비 지원"
/// benefits = "시술비 본인부담금 일부 지원"
/// region = "서울특별시"
/// predicate = { all = [{ field = "age", op = "at-least", value = 65 }, { field = "income_ratio", op = "at-most", value = 0.7 }] }
/// ```
#[derive(Debug)]
pub struct TomlCatalog {
    policies: BTreeMap<PolicyId, Policy>,
}

impl TomlCatalog {
    pub fn from_toml_str(src: &str) -> EngineResult<Self> {
        let doc: CatalogDoc = toml::from_str(src).map_err(|e| EngineError::ConfigError {
            reason: format!("catalog parse failed: {e}"),
        })?;

        let mut policies = BTreeMap::new();
        for policy in doc.policy {
            policy.predicate.validate()?;
            if policies.insert(policy.id.clone(), policy.clone()).is_some() {
                return Err(EngineError::ConfigError {
                    reason: format!("duplicate policy id '{}'", policy.id),
                });
            }
        }

        info!(policies = policies.len(), "policy catalog loaded");
        Ok(Self { policies })
    }

    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigError {
            reason: format!("cannot read catalog '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&src)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl PolicyCatalog for TomlCatalog {
    fn get(&self, id: &PolicyId) -> Option<Policy> {
        self.policies.get(id).cloned()
    }

    fn all(&self) -> Vec<Policy> {
        self.policies.values().cloned().collect()
    }
}

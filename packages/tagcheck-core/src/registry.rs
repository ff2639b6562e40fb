//! Validator catalog and selection.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::duplicate::DuplicateDetector;
use crate::error::{RegistryError, RegistryResult};
use crate::result::ValidatorDescriptor;
use crate::validator::Validator;
use crate::validators::{
    EcidConsistencyValidator, NoDuplicateEventsValidator, PageViewIntegrityValidator,
    PayloadSizeValidator, RequiredFieldsValidator,
};

/// Where the ECID validator looks for identifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EcidScope {
    /// `identityMap.ECID` inside POST bodies only
    #[default]
    PostData,
    /// Pattern search across URLs, headers and bodies of every exchange
    All,
}

impl EcidScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            EcidScope::PostData => "post_data",
            EcidScope::All => "all",
        }
    }
}

impl fmt::Display for EcidScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EcidScope {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "post_data" => Ok(EcidScope::PostData),
            "all" => Ok(EcidScope::All),
            _ => Err(RegistryError::UnknownScope(s.to_string())),
        }
    }
}

/// Parameters for the built-in validators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSettings {
    /// Duplicate-detection window in seconds
    pub duplicate_window_secs: f64,
    /// Payload size limit in kilobytes
    pub payload_limit_kb: f64,
    pub ecid_scope: EcidScope,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            duplicate_window_secs: DuplicateDetector::DEFAULT_WINDOW_SECS,
            payload_limit_kb: PayloadSizeValidator::DEFAULT_LIMIT_KB,
            ecid_scope: EcidScope::PostData,
        }
    }
}

impl ValidatorSettings {
    pub fn with_duplicate_window(mut self, secs: f64) -> Self {
        self.duplicate_window_secs = secs;
        self
    }

    pub fn with_payload_limit_kb(mut self, kb: f64) -> Self {
        self.payload_limit_kb = kb;
        self
    }

    pub fn with_ecid_scope(mut self, scope: EcidScope) -> Self {
        self.ecid_scope = scope;
        self
    }
}

/// Catalog of validators keyed by identifier, in registration order.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: Vec<Arc<dyn Validator>>,
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.validators.iter().map(|v| v.id()))
            .finish()
    }
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five built-in validators configured from `settings`.
    ///
    /// Out-of-range settings are rejected here, before any run starts.
    pub fn with_defaults(settings: &ValidatorSettings) -> RegistryResult<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(RequiredFieldsValidator))?;
        registry.register(Arc::new(EcidConsistencyValidator::new(settings.ecid_scope)))?;
        registry.register(Arc::new(PageViewIntegrityValidator))?;
        registry.register(Arc::new(NoDuplicateEventsValidator::new(
            DuplicateDetector::new(settings.duplicate_window_secs)?,
        )))?;
        registry.register(Arc::new(PayloadSizeValidator::new(settings.payload_limit_kb)?))?;

        tracing::debug!(
            validators = registry.len(),
            window_secs = settings.duplicate_window_secs,
            limit_kb = settings.payload_limit_kb,
            ecid_scope = %settings.ecid_scope,
            "Validator registry initialised"
        );

        Ok(registry)
    }

    pub fn register(&mut self, validator: Arc<dyn Validator>) -> RegistryResult<()> {
        let id = validator.id();
        if self.get(id).is_some() {
            return Err(RegistryError::AlreadyRegistered { id: id.to_string() });
        }
        self.validators.push(validator);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ValidatorDescriptor> {
        self.validators.iter().map(|v| v.descriptor()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Validator>> {
        self.validators.iter().find(|v| v.id() == id).cloned()
    }

    /// Validators for `ids`, in the order given.
    ///
    /// Unknown or repeated identifiers are configuration errors.
    pub fn select<S: AsRef<str>>(&self, ids: &[S]) -> RegistryResult<Vec<Arc<dyn Validator>>> {
        let mut seen = HashSet::new();
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                if !seen.insert(id) {
                    return Err(RegistryError::DuplicateSelection { id: id.to_string() });
                }
                self.get(id).ok_or_else(|| RegistryError::UnknownValidator {
                    id: id.to_string(),
                })
            })
            .collect()
    }

    /// Validators enabled by default, in catalog order.
    pub fn default_selection(&self) -> Vec<Arc<dyn Validator>> {
        self.validators
            .iter()
            .filter(|v| v.descriptor().default_enabled)
            .cloned()
            .collect()
    }

    /// Explicit selection when given, defaults otherwise.
    pub fn resolve(&self, ids: Option<&[String]>) -> RegistryResult<Vec<Arc<dyn Validator>>> {
        match ids {
            Some(ids) => self.select(ids),
            None => Ok(self.default_selection()),
        }
    }
}

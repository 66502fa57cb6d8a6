//! Patient record lookup, keyed by identity label.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("registry parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate registry label: {0}")]
    DuplicateLabel(String),
}

/// Record data returned for an identified patient.
#[derive(Debug, Clone, Deserialize)]
pub struct PatientRecord {
    pub label: String,
    pub diagnosis: String,
    pub appointment_day: u32,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    patient: Vec<PatientRecord>,
}

/// Static record store loaded once at startup.
///
/// Labels are unique, enforced at load time: a duplicate label in the
/// source file is a hard failure, never a silent overwrite. A missing
/// label at lookup time is a normal outcome.
#[derive(Debug, Default)]
pub struct PatientRegistry {
    records: HashMap<String, PatientRecord>,
}

impl PatientRegistry {
    /// Load the registry from a TOML file.
    ///
    /// A missing file yields an empty registry (the service still
    /// serves; confirmed identities resolve to record-not-found).
    pub fn from_path(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "patient registry missing; starting with no records");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let registry = Self::from_toml(&text)?;
        tracing::info!(path = %path.display(), records = registry.len(), "patient registry loaded");
        Ok(registry)
    }

    pub fn from_toml(text: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = toml::from_str(text)?;
        let mut records = HashMap::with_capacity(file.patient.len());
        for record in file.patient {
            let label = record.label.clone();
            if records.insert(label.clone(), record).is_some() {
                return Err(RegistryError::DuplicateLabel(label));
            }
        }
        Ok(Self { records })
    }

    /// Look up the record for an identity label. `None` is normal.
    pub fn lookup(&self, label: &str) -> Option<&PatientRecord> {
        self.records.get(label)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[patient]]
        label = "sarah"
        diagnosis = "Diabetes"
        appointment_day = 53

        [[patient]]
        label = "peter"
        diagnosis = "Typhoid"
        appointment_day = 21
    "#;

    #[test]
    fn parses_records_and_looks_up_by_label() {
        let registry = PatientRegistry::from_toml(SAMPLE).unwrap();
        assert_eq!(registry.len(), 2);

        let sarah = registry.lookup("sarah").unwrap();
        assert_eq!(sarah.diagnosis, "Diabetes");
        assert_eq!(sarah.appointment_day, 53);
    }

    #[test]
    fn lookup_miss_is_none() {
        let registry = PatientRegistry::from_toml(SAMPLE).unwrap();
        assert!(registry.lookup("nobody").is_none());
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let registry = PatientRegistry::from_toml(SAMPLE).unwrap();
        assert!(registry.lookup("Sarah").is_none());
    }

    #[test]
    fn duplicate_label_fails_the_load() {
        let text = r#"
            [[patient]]
            label = "sarah"
            diagnosis = "Diabetes"
            appointment_day = 53

            [[patient]]
            label = "sarah"
            diagnosis = "Flu"
            appointment_day = 2
        "#;
        let err = PatientRegistry::from_toml(text).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateLabel(label) if label == "sarah"));
    }

    #[test]
    fn empty_document_is_an_empty_registry() {
        let registry = PatientRegistry::from_toml("").unwrap();
        assert!(registry.is_empty());
    }
}

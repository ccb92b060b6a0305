use async_trait::async_trait;
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tracing::{debug, instrument};

use super::ShellSuiteEngine;
use crate::loader::{ModuleLoadError, ModuleLoader};

/// A YAML spec document: global environment, setup commands and suites.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SpecDocument {
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub before_each: Vec<String>,
    #[serde(default)]
    pub suites: Vec<SuiteNode>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SuiteNode {
    pub describe: String,
    #[serde(default)]
    pub specs: Vec<SpecNode>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SpecNode {
    Suite(SuiteNode),
    Spec(SpecDef),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SpecDef {
    pub it: String,
    #[serde(default)]
    pub expect: Vec<Expectation>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Expectation {
    pub run: String,
    #[serde(default = "default_matcher")]
    pub to: String,
    #[serde(default)]
    pub expected: Option<String>,
}

fn default_matcher() -> String {
    "succeed".to_string()
}

impl SpecDocument {
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file is a valid, empty document.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }
}

/// Loads spec documents from disk into a [`ShellSuiteEngine`].
pub struct DocumentLoader {
    engine: Arc<ShellSuiteEngine>,
    base_dir: PathBuf,
}

impl DocumentLoader {
    pub fn new(engine: Arc<ShellSuiteEngine>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl ModuleLoader for DocumentLoader {
    #[instrument(skip(self))]
    async fn load(&self, path: &str) -> Result<(), ModuleLoadError> {
        let full_path = self.base_dir.join(path);
        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| ModuleLoadError::new(path, e))?;
        let document =
            SpecDocument::from_yaml(&content).map_err(|e| ModuleLoadError::new(path, e))?;
        debug!(suites = document.suites.len(), "Parsed spec document");
        self.engine.register(path, document);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const DOCUMENT: &str = r#"
env:
  GREETING: hello
before_each:
  - "true"
suites:
  - describe: Greeter
    specs:
      - it: greets
        expect:
          - run: "echo $GREETING"
            to: contain
            expected: hello
      - describe: nested
        specs:
          - it: succeeds
            expect:
              - run: "true"
"#;

    #[test]
    fn test_parse_spec_document() {
        let document = SpecDocument::from_yaml(DOCUMENT).unwrap();

        assert_eq!(document.env.get("GREETING").map(String::as_str), Some("hello"));
        assert_eq!(document.before_each, vec!["true".to_string()]);
        assert_eq!(document.suites.len(), 1);

        let suite = &document.suites[0];
        assert_eq!(suite.describe, "Greeter");
        let SpecNode::Spec(greets) = &suite.specs[0] else {
            panic!("expected a spec");
        };
        assert_eq!(greets.expect[0].to, "contain");
        assert_eq!(greets.expect[0].expected.as_deref(), Some("hello"));

        let SpecNode::Suite(nested) = &suite.specs[1] else {
            panic!("expected a nested suite");
        };
        let SpecNode::Spec(succeeds) = &nested.specs[0] else {
            panic!("expected a spec");
        };
        assert_eq!(succeeds.expect[0].to, "succeed");
    }

    #[test]
    fn test_parse_empty_document() {
        let document = SpecDocument::from_yaml("  \n").unwrap();
        assert_eq!(document, SpecDocument::default());
    }

    #[tokio::test]
    async fn test_loader_registers_document() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.spec.yml"), DOCUMENT).unwrap();
        let engine = Arc::new(ShellSuiteEngine::new(dir.path()));
        let loader = DocumentLoader::new(engine.clone(), dir.path());

        loader.load("a.spec.yml").await.unwrap();

        assert_eq!(engine.specs_defined(), 2);
    }

    #[tokio::test]
    async fn test_loader_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ShellSuiteEngine::new(dir.path()));
        let loader = DocumentLoader::new(engine, dir.path());

        let err = loader.load("missing.yml").await.unwrap_err();

        assert_eq!(err.path, "missing.yml");
    }

    #[tokio::test]
    async fn test_loader_reports_invalid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.yml"), "suites: - [").unwrap();
        let engine = Arc::new(ShellSuiteEngine::new(dir.path()));
        let loader = DocumentLoader::new(engine, dir.path());

        let err = loader.load("bad.yml").await.unwrap_err();

        assert!(err.to_string().contains("bad.yml"));
    }
}

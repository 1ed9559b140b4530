//! Catalog Definition Types and YAML Loading
//!
//! A catalog declares the stages, sections, section groups, guards, edges and
//! stage hooks of one approval process. Catalogs are loaded once at startup;
//! changing one means building a new graph and registry.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

use super::WorkflowError;

/// A complete catalog loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDefinition {
    /// Catalog identifier
    pub catalog: String,
    /// Version number
    #[serde(default = "default_version")]
    pub version: u32,
    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Stages in declared order
    pub stages: Vec<StageDef>,

    /// Reviewing departments
    #[serde(default)]
    pub sections: Vec<SectionDef>,

    /// Named, ordered lists of section codes
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,

    /// Named guards
    #[serde(default)]
    pub guards: BTreeMap<String, GuardDef>,

    /// Edges between stages, in declared order
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,

    /// Side effects fired when a stage is entered
    #[serde(default)]
    pub hooks: BTreeMap<String, Vec<HookDef>>,
}

fn default_version() -> u32 {
    1
}

impl CatalogDefinition {
    /// Get the initial stage code
    pub fn initial_stage(&self) -> Option<&str> {
        self.stages
            .iter()
            .find(|s| s.initial)
            .map(|s| s.code.as_str())
    }

    /// Get transitions from a specific stage
    pub fn transitions_from(&self, stage: &str) -> Vec<&TransitionDef> {
        self.transitions
            .iter()
            .filter(|t| t.from == stage)
            .collect()
    }

    pub fn section(&self, code: &str) -> Option<&SectionDef> {
        self.sections.iter().find(|s| s.code == code)
    }
}

/// Stage definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDef {
    /// Stable identity referenced by case history
    pub code: String,
    /// Display name
    pub name: String,
    /// Used for default listing only, never for legality
    #[serde(default)]
    pub sort_order: i32,
    /// Is this the stage new cases open in?
    #[serde(default)]
    pub initial: bool,
    /// Is this a terminal stage?
    #[serde(default)]
    pub terminal: bool,
}

/// Section (reviewing department) definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionDef {
    pub code: String,
    #[serde(default)]
    pub name: String,
    /// Opt-in sections are left out of groups that don't need them
    #[serde(default)]
    pub optional: bool,
}

/// Transition definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDef {
    /// Source stage
    pub from: String,
    /// Target stage
    pub to: String,
    /// Guard name (must pass to allow transition)
    pub guard: String,
    /// Attempt this edge automatically once a commit lands in `from`
    #[serde(default)]
    pub auto: bool,
    /// Description of this transition
    #[serde(default)]
    pub description: Option<String>,
}

/// Guard definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardDef {
    /// No precondition
    Always,
    /// Every listed attachment type present on the case
    RequiredAttachments { document_types: Vec<String> },
    /// Every section in the group has a latest clearance that counts as clear
    SectionGroupClear { group: String },
    /// At least one section in the group has a latest OBJECTION
    SectionGroupObjection { group: String },
    /// Latest front-office review of the group is confirmed and current
    ReviewConfirmed { group: String },
    /// Accounts breakdown prepared with a non-zero total
    AccountsPrepared,
    /// Accounts breakdown fully paid
    PaymentReceived,
    /// Transfer deed recorded
    TransferDeedRecorded,
    /// Acting user holds one of the roles
    ActorRole { roles: Vec<String> },
    /// Every named guard passes, evaluated in order
    AllOf { guards: Vec<String> },
}

/// Hook fired when a stage is entered
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookDef {
    /// Ask the document service to render a document for the case
    GenerateDocument { document_type: String },
}

/// Loader for catalog definitions
pub struct CatalogLoader;

impl CatalogLoader {
    /// Load all catalogs from a directory, keyed by catalog id
    pub fn load_from_dir(dir: &Path) -> Result<HashMap<String, CatalogDefinition>, WorkflowError> {
        let mut catalogs = HashMap::new();

        if !dir.exists() {
            return Ok(catalogs);
        }

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path
                .extension()
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false)
            {
                let def = Self::load_from_file(&path)?;
                catalogs.insert(def.catalog.clone(), def);
            }
        }

        info!("Loaded {} catalogs from {}", catalogs.len(), dir.display());
        Ok(catalogs)
    }

    /// Load a single catalog from a file
    pub fn load_from_file(path: &Path) -> Result<CatalogDefinition, WorkflowError> {
        let content = std::fs::read_to_string(path)?;
        let def: CatalogDefinition = serde_yaml::from_str(&content)?;
        info!(
            "Loaded catalog {} v{} from {}",
            def.catalog,
            def.version,
            path.display()
        );
        Ok(def)
    }

    /// Load from a YAML string
    pub fn load_from_str(yaml: &str) -> Result<CatalogDefinition, WorkflowError> {
        let def: CatalogDefinition = serde_yaml::from_str(yaml)?;
        Ok(def)
    }
}

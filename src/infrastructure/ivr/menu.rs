/// IVR menu tree
///
/// Menus are stored as nested JSON (a node's `submenu` options embed their
/// child node). At load time the tree is flattened into an arena; parents are
/// plain indices so "go back" never needs a pointer cycle.
use super::dtmf::DtmfDigit;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Menu load errors
#[derive(Debug, Error)]
pub enum MenuError {
    #[error("invalid menu JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid menu digit {0:?}")]
    InvalidDigit(String),

    #[error("submenu option {0} has no menu")]
    MissingSubmenu(DtmfDigit),

    #[error("menu timeout must be at least one second")]
    ZeroTimeout,
}

/// Action to take when a menu option is selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuAction {
    /// Queue the caller for an agent (target: optional team id)
    Transfer,
    /// Descend into the embedded menu
    Submenu,
    /// Replay the current greeting
    Repeat,
    /// Return to the parent menu
    Parent,
    Hangup,
    /// Hand the contact to a text flow (target: flow id)
    GotoFlow,
}

/// What happens once a caller runs out of retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedPolicy {
    /// Send the caller to the general agent queue
    #[default]
    Transfer,
    Hangup,
}

/// Persisted (nested) form of a menu node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MenuDefinition {
    #[serde(default)]
    pub greeting: String,
    #[serde(default)]
    pub options: HashMap<String, OptionDefinition>,
    /// Seconds to wait for a digit; [`DEFAULT_TIMEOUT_SECS`] when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Invalid inputs tolerated before exhaustion; `0` means none.
    /// [`DEFAULT_MAX_RETRIES`] when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub invalid_input_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exhausted: Option<ExhaustedPolicy>,
}

/// Persisted form of a menu option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDefinition {
    #[serde(default)]
    pub label: String,
    pub action: MenuAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu: Option<Box<MenuDefinition>>,
}

/// Index of a node inside an [`IvrMenuTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

#[derive(Debug, Clone)]
pub struct MenuOption {
    pub label: String,
    pub action: MenuAction,
    pub target: Option<String>,
    /// Set for `submenu` options
    pub child: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct MenuNode {
    pub greeting: Option<String>,
    pub options: HashMap<DtmfDigit, MenuOption>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub invalid_input_message: Option<String>,
    pub on_exhausted: ExhaustedPolicy,
    pub parent: Option<NodeId>,
}

impl MenuNode {
    pub fn option(&self, digit: DtmfDigit) -> Option<&MenuOption> {
        self.options.get(&digit)
    }
}

/// Read-only menu tree loaded for one call
#[derive(Debug, Clone)]
pub struct IvrMenuTree {
    nodes: Vec<MenuNode>,
}

impl IvrMenuTree {
    pub fn from_json(json: &str) -> Result<Self, MenuError> {
        let definition: MenuDefinition = serde_json::from_str(json)?;
        Self::from_definition(&definition)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, MenuError> {
        let definition = MenuDefinition::deserialize(value)?;
        Self::from_definition(&definition)
    }

    pub fn from_definition(definition: &MenuDefinition) -> Result<Self, MenuError> {
        let mut tree = Self { nodes: Vec::new() };
        tree.insert(definition, None)?;
        Ok(tree)
    }

    fn insert(&mut self, def: &MenuDefinition, parent: Option<NodeId>) -> Result<NodeId, MenuError> {
        let timeout_secs = def.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(MenuError::ZeroTimeout);
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(MenuNode {
            greeting: non_empty(&def.greeting),
            options: HashMap::new(),
            timeout: Duration::from_secs(timeout_secs),
            max_retries: def.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            invalid_input_message: non_empty(&def.invalid_input_message),
            on_exhausted: def.on_exhausted.unwrap_or_default(),
            parent,
        });

        let mut options = HashMap::with_capacity(def.options.len());
        for (key, option) in &def.options {
            let digit = parse_digit(key)?;
            let child = match option.action {
                MenuAction::Submenu => {
                    let menu = option.menu.as_deref().ok_or(MenuError::MissingSubmenu(digit))?;
                    Some(self.insert(menu, Some(id))?)
                }
                _ => None,
            };
            options.insert(
                digit,
                MenuOption {
                    label: option.label.clone(),
                    action: option.action,
                    target: option.target.clone().filter(|t| !t.is_empty()),
                    child,
                },
            );
        }
        self.nodes[id.0].options = options;
        Ok(id)
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn node(&self, id: NodeId) -> &MenuNode {
        &self.nodes[id.0]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of edges between `id` and the root
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cursor = id;
        while let Some(parent) = self.parent(cursor) {
            depth += 1;
            cursor = parent;
        }
        depth
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn parse_digit(key: &str) -> Result<DtmfDigit, MenuError> {
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => DtmfDigit::from_char(c).ok_or_else(|| MenuError::InvalidDigit(key.to_string())),
        _ => Err(MenuError::InvalidDigit(key.to_string())),
    }
}

/// IVR menu builder for easy construction
pub struct IvrMenuBuilder {
    menu: MenuDefinition,
}

impl IvrMenuBuilder {
    pub fn new(greeting: &str) -> Self {
        Self {
            menu: MenuDefinition {
                greeting: greeting.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.menu.timeout_seconds = Some(seconds);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.menu.max_retries = Some(retries);
        self
    }

    pub fn invalid_input_message(mut self, message: &str) -> Self {
        self.menu.invalid_input_message = message.to_string();
        self
    }

    pub fn on_exhausted(mut self, policy: ExhaustedPolicy) -> Self {
        self.menu.on_exhausted = Some(policy);
        self
    }

    pub fn option(mut self, digit: char, label: &str, action: MenuAction, target: Option<&str>) -> Self {
        self.menu.options.insert(
            digit.to_string(),
            OptionDefinition {
                label: label.to_string(),
                action,
                target: target.map(str::to_string),
                menu: None,
            },
        );
        self
    }

    pub fn submenu(mut self, digit: char, label: &str, child: IvrMenuBuilder) -> Self {
        self.menu.options.insert(
            digit.to_string(),
            OptionDefinition {
                label: label.to_string(),
                action: MenuAction::Submenu,
                target: None,
                menu: Some(Box::new(child.menu)),
            },
        );
        self
    }

    pub fn definition(self) -> MenuDefinition {
        self.menu
    }

    pub fn build(self) -> Result<IvrMenuTree, MenuError> {
        IvrMenuTree::from_definition(&self.menu)
    }
}

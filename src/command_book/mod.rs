//! Profession-specific command registry.
//!
//! A `CommandBook` maps command names to `ActionFactory` values. Required
//! slots are validated once, when the book is built; callers never see a
//! half-populated book.

pub mod builtin;
pub mod script;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::{ActionError, ConfigError};
use crate::input::InputInjector;
use crate::kernel::state::SharedState;
use crate::kernel::time::Pacer;
use crate::routine::Params;

pub const MOVE: &str = "move";
pub const ADJUST: &str = "adjust";
pub const BUFF: &str = "buff";
pub const STEP: &str = "step";

/// The single active book, swapped wholesale by the editing collaborator.
pub type ActiveBook = Arc<RwLock<Option<Arc<CommandBook>>>>;

/// Everything an action may touch while it runs.
pub struct ActionContext<'a> {
    pub state: &'a SharedState,
    pub input: &'a dyn InputInjector,
    pub pacer: &'a dyn Pacer,
    pub book: &'a CommandBook,
}

impl ActionContext<'_> {
    /// Resolve a key-binding label through the book, falling back to the
    /// label itself as a literal key.
    pub fn key<'k>(&'k self, label: &'k str) -> &'k str {
        self.book.key(label).unwrap_or(label)
    }
}

pub trait Action: Send {
    fn execute(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError>;
}

pub trait ActionFactory: Send + Sync {
    fn build(&self, params: &Params) -> Result<Box<dyn Action>, ActionError>;
}

impl<F> ActionFactory for F
where
    F: Fn(&Params) -> Result<Box<dyn Action>, ActionError> + Send + Sync,
{
    fn build(&self, params: &Params) -> Result<Box<dyn Action>, ActionError> {
        self(params)
    }
}

pub struct CommandBook {
    name: String,
    factories: BTreeMap<String, Arc<dyn ActionFactory>>,
    bindings: BTreeMap<String, String>,
}

impl fmt::Debug for CommandBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBook")
            .field("name", &self.name)
            .field("commands", &self.factories.keys().collect::<Vec<_>>())
            .field("bindings", &self.bindings)
            .finish()
    }
}

impl CommandBook {
    pub fn builder(name: &str) -> CommandBookBuilder {
        CommandBookBuilder::new(name)
    }

    /// Compile a command-book definition file.
    pub fn load(path: &Path) -> Result<CommandBook, ConfigError> {
        script::load(path)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, command: &str) -> bool {
        self.factories.contains_key(command)
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, command: &str, params: &Params) -> Result<Box<dyn Action>, ActionError> {
        self.factories
            .get(command)
            .ok_or_else(|| ActionError::UnknownCommand(command.to_string()))?
            .build(params)
    }

    pub fn key(&self, label: &str) -> Option<&str> {
        self.bindings.get(label).map(String::as_str)
    }

    pub fn bindings(&self) -> &BTreeMap<String, String> {
        &self.bindings
    }
}

pub struct CommandBookBuilder {
    name: String,
    factories: BTreeMap<String, Arc<dyn ActionFactory>>,
    bindings: BTreeMap<String, String>,
}

impl CommandBookBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            factories: BTreeMap::new(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn register(mut self, command: &str, factory: impl ActionFactory + 'static) -> Self {
        self.factories.insert(command.to_lowercase(), Arc::new(factory));
        self
    }

    pub fn bind(mut self, label: &str, key: &str) -> Self {
        self.bindings.insert(label.to_string(), key.to_string());
        self
    }

    /// Validate required slots and fill in the built-ins.
    ///
    /// `buff` is mandatory. Movement needs either both `move` and `adjust`,
    /// or a `step` primitive the default `move`/`adjust` drive.
    pub fn build(mut self) -> Result<CommandBook, ConfigError> {
        if !self.factories.contains_key(BUFF) {
            return Err(ConfigError::MissingRequired {
                book: self.name,
                command: BUFF.to_string(),
            });
        }

        let has_step = self.factories.contains_key(STEP);
        let has_movement = self.factories.contains_key(MOVE) && self.factories.contains_key(ADJUST);
        if !has_step && !has_movement {
            return Err(ConfigError::MissingMovement { book: self.name });
        }

        for (command, factory) in builtin::defaults() {
            self.factories.entry(command.to_string()).or_insert(factory);
        }

        Ok(CommandBook {
            name: self.name,
            factories: self.factories,
            bindings: self.bindings,
        })
    }
}

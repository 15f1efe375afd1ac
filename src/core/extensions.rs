// EN: src/core/extensions.rs

use crate::core::backup;
use anyhow::{Context, Result};
use std::{collections::HashMap, fmt, path::Path};

/// A command implemented outside the built-in catalogue.
///
/// Extensions are registered by name when the registry is built and are looked up
/// before the built-in commands, so an extension can also override one.
pub trait Extension: Send {
    /// Runs the command.
    ///
    /// # Arguments
    /// * `name` - The command name the extension was registered under.
    /// * `args` - Positional arguments; a fenced block, if any, is the last one.
    /// * `base_dir` - The sandbox root of the message being executed.
    ///
    /// # Returns
    /// A one-line description of what was done. An `Err` marks the command FAILED.
    fn handle(&self, name: &str, args: &[String], base_dir: &Path) -> Result<String>;
}

/// Name-keyed table of extensions, populated once at startup.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: HashMap<String, Box<dyn Extension>>,
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.extensions.keys().collect();
        names.sort();
        f.debug_struct("ExtensionRegistry").field("commands", &names).finish()
    }
}

impl ExtensionRegistry {
    /// An empty registry: every command falls through to the built-ins.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shipped with the binary.
    pub fn with_builtin_extensions() -> Self {
        let mut registry = Self::new();
        registry.register("say_hello", Box::new(HelloExtension));
        registry
    }

    /// Registers `extension` under `name`. The first registration of a name wins.
    pub fn register(&mut self, name: &str, extension: Box<dyn Extension>) -> bool {
        if self.extensions.contains_key(name) {
            log::warn!("Extension command /{} is already registered, ignoring.", name);
            return false;
        }
        log::info!("Extension registered: /{}", name);
        self.extensions.insert(name.to_string(), extension);
        true
    }

    /// Looks up an extension by command name.
    pub fn lookup(&self, name: &str) -> Option<&dyn Extension> {
        self.extensions.get(name).map(|e| e.as_ref())
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Whether no extension is registered.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

/// `/say_hello`: writes a greeting to `hello.txt` at the sandbox root.
#[derive(Debug)]
pub struct HelloExtension;

impl Extension for HelloExtension {
    fn handle(&self, _name: &str, args: &[String], base_dir: &Path) -> Result<String> {
        let target = base_dir.join("hello.txt");
        let greeting = match args.first() {
            Some(who) => format!("Hello, {}!\n", who),
            None => "Hello from filegenie\n".to_string(),
        };
        backup::atomic_write(&target, greeting.as_bytes())
            .with_context(|| format!("Failed to write '{}'", target.display()))?;
        Ok(format!("wrote {}", target.display()))
    }
}

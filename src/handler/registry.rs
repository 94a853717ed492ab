//! The handler registry and longest-prefix dispatch (spec §4.1).

use super::Handler;
use crate::descriptor::EmulatedResource;
use crate::path;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps path prefixes to the handler responsible for them. Populated once at
/// startup and effectively immutable afterwards (spec §3): `register`
/// consumes `self` by `&mut` only during construction, before the registry
/// is handed out as a shared `Arc`.
pub struct HandlerRegistry {
    handlers: Vec<(String, Arc<dyn Handler>)>,
    wildcard: Arc<dyn Handler>,
    children: HashMap<String, Vec<Arc<EmulatedResource>>>,
}

impl HandlerRegistry {
    /// Builds an empty registry backed by `wildcard` as the catch-all
    /// passthrough handler (spec §4.1: "a wildcard passthrough handler
    /// matches any path not otherwise covered").
    pub fn new(wildcard: Arc<dyn Handler>) -> Self {
        HandlerRegistry {
            handlers: Vec::new(),
            wildcard,
            children: HashMap::new(),
        }
    }

    /// Registers `handler` at `path`. Intended to be called only during
    /// startup, before the registry is shared across threads.
    pub fn register(&mut self, path: impl Into<String>, handler: Arc<dyn Handler>) {
        let path = path::clean(&path.into());
        self.handlers.push((path, handler));
    }

    /// Declares the synthesized children anchored at `dir`, used by
    /// [HandlerRegistry::children_at] to splice entries into `readdir`
    /// (spec §4.1, §4.6).
    pub fn register_children(&mut self, dir: impl Into<String>, children: Vec<Arc<EmulatedResource>>) {
        self.children
            .entry(path::clean(&dir.into()))
            .or_default()
            .extend(children);
    }

    /// `FindHandler(path)`: returns the handler whose registered path is the
    /// longest prefix of `path`. Exact matches take precedence over
    /// everything, and a specific-but-shorter prefix always beats the
    /// wildcard. Never fails (spec §4.1: "this is never a failure mode").
    pub fn find_handler(&self, requested: &str) -> Arc<dyn Handler> {
        let requested = path::clean(requested);

        let mut best: Option<&(String, Arc<dyn Handler>)> = None;
        for entry @ (registered, _) in &self.handlers {
            if !path::is_prefix(registered, &requested) {
                continue;
            }
            match best {
                Some((best_path, _)) if best_path.len() >= registered.len() => {}
                _ => best = Some(entry),
            }
        }

        match best {
            Some((_, handler)) => handler.clone(),
            None => self.wildcard.clone(),
        }
    }

    /// `ChildrenAt(dir)`: the emulated child resources anchored at `dir`,
    /// used by `readdir` splicing (spec §4.1, §4.6).
    pub fn children_at(&self, dir: &str) -> Vec<Arc<EmulatedResource>> {
        self.children
            .get(&path::clean(dir))
            .cloned()
            .unwrap_or_default()
    }
}

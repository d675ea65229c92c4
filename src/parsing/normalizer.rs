use std::collections::HashMap;

use crate::core::{make_rid, CompactId};
use crate::error::Result;
use crate::storage::indexing::dictionary::Interner;

/// How a raw identifier splits into a namespace part and a local name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identifier<'a> {
    /// Bare name, resolved against the default prefix
    Local(&'a str),
    /// Full `http` URI split after its last `#` or `/`. The prefix keeps the separator.
    Expanded { prefix: &'a str, local: &'a str },
    /// Compact `prefix:local` form
    Curie { prefix: &'a str, local: &'a str },
}

impl<'a> Identifier<'a> {
    pub fn classify(raw: &'a str) -> Self {
        if raw.starts_with("http") {
            if let Some(at) = raw.rfind('#') {
                return Identifier::Expanded { prefix: &raw[..=at], local: &raw[at + 1..] };
            }
            if let Some(at) = raw.rfind('/') {
                return Identifier::Expanded { prefix: &raw[..=at], local: &raw[at + 1..] };
            }
        }
        match raw.split_once(':') {
            Some((prefix, local)) => Identifier::Curie { prefix, local },
            None => Identifier::Local(raw),
        }
    }
}

/// Strip the `<...>` wrapping that marks a reference value.
pub fn reference_target(value: &str) -> Option<&str> {
    value.strip_prefix('<')?.strip_suffix('>')
}

/// Rewrites raw identifiers into RIDs for one ingestion session.
///
/// Unknown namespaces are created on first use. Short prefixes declared by the
/// session `@context` resolve to their expansion. Results are cached for the
/// lifetime of the session only.
pub struct Normalizer<'a> {
    interner: &'a Interner,
    default_prefix: String,
    context: HashMap<String, CompactId>,
    prefixes: HashMap<String, CompactId>,
    resolved: HashMap<String, String>,
}

impl<'a> Normalizer<'a> {
    pub fn new(interner: &'a Interner, default_prefix: impl Into<String>) -> Self {
        Self {
            interner,
            default_prefix: default_prefix.into(),
            context: HashMap::new(),
            prefixes: HashMap::new(),
            resolved: HashMap::new(),
        }
    }

    pub fn default_prefix(&self) -> &str {
        &self.default_prefix
    }

    /// Replace the default prefix. Cached resolutions of bare names are dropped.
    pub fn set_default_prefix(&mut self, prefix: impl Into<String>) {
        self.default_prefix = prefix.into();
        self.resolved.clear();
    }

    /// Declare a context short prefix. The expansion is interned immediately.
    pub fn declare_prefix(&mut self, short: &str, expansion: &str) -> Result<CompactId> {
        let id = self.namespace(expansion)?;
        self.context.insert(short.to_string(), id);
        self.resolved.clear();
        Ok(id)
    }

    /// Map a raw URI, CURIE or bare name to its RID.
    pub fn normalize(&mut self, raw: &str) -> Result<String> {
        if let Some(rid) = self.resolved.get(raw) {
            return Ok(rid.clone());
        }

        let rid = match Identifier::classify(raw) {
            Identifier::Local(local) => {
                let prefix = self.default_prefix.clone();
                make_rid(self.namespace(&prefix)?, local)
            }
            Identifier::Expanded { prefix, local } => make_rid(self.namespace(prefix)?, local),
            Identifier::Curie { prefix, local } => {
                let id = match self.context.get(prefix) {
                    Some(&id) => id,
                    None => self.namespace(prefix)?,
                };
                make_rid(id, local)
            }
        };

        self.resolved.insert(raw.to_string(), rid.clone());
        Ok(rid)
    }

    /// Normalize a `<...>` reference value. Returns `None` for plain strings.
    pub fn normalize_reference(&mut self, value: &str) -> Result<Option<String>> {
        match reference_target(value) {
            Some(target) => self.normalize(target).map(Some),
            None => Ok(None),
        }
    }

    fn namespace(&mut self, prefix: &str) -> Result<CompactId> {
        if let Some(&id) = self.prefixes.get(prefix) {
            return Ok(id);
        }
        let id = self.interner.assert_namespace(prefix)?;
        self.prefixes.insert(prefix.to_string(), id);
        Ok(id)
    }
}

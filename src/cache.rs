//! Run-scoped cache.
//!
//! One `RunCache` lives for exactly one batch run and is handed by `&mut` to the
//! components that need it. Nothing in here is process-global.

use encoding_rs::Encoding;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::template::Document;

#[derive(Default)]
pub struct RunCache {
    encodings: HashMap<String, &'static Encoding>,
    templates: HashMap<String, Arc<Document>>,
    reported_misses: BTreeSet<String>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute_hash(source: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source);
        format!("{:x}", hasher.finalize())
    }

    pub fn encoding_for(&self, fingerprint: &str) -> Option<&'static Encoding> {
        self.encodings.get(fingerprint).copied()
    }

    pub fn remember_encoding(&mut self, fingerprint: &str, encoding: &'static Encoding) {
        self.encodings.insert(fingerprint.to_string(), encoding);
    }

    /// Canonical template parsed earlier in this run from identical bytes.
    pub fn template_for(&self, fingerprint: &str) -> Option<Arc<Document>> {
        self.templates.get(fingerprint).cloned()
    }

    pub fn remember_template(&mut self, fingerprint: &str, document: Arc<Document>) {
        self.templates.insert(fingerprint.to_string(), document);
    }

    /// Returns true the first time a label miss is seen in this run.
    pub fn first_miss(&mut self, label: &str) -> bool {
        self.reported_misses.insert(label.to_string())
    }

    pub fn reported_misses(&self) -> impl Iterator<Item = &str> {
        self.reported_misses.iter().map(String::as_str)
    }
}

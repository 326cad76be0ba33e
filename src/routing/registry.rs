//! Mutable route table with lock-free readers.
//!
//! # Responsibilities
//! - CRUD, toggle and bulk import/export of route rules
//! - Validate rules before they become visible
//! - Resolve (method, path) to the most specific rule
//!
//! # Design Decisions
//! - The table is an immutable snapshot behind `ArcSwap`; readers never block
//! - Writers are serialized by a mutex, rebuild the table and swap it in
//! - Rules are handed out as `Arc<RouteRule>`; a captured rule outlives removal

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RouteDefaults;
use crate::routing::matcher::PathPattern;
use crate::routing::rule::{RouteRule, RouteStatus, RuleViolation, ANY_METHOD};

/// Registry errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteError {
    #[error("invalid route configuration: {}", describe(.0))]
    Invalid(Vec<RuleViolation>),

    #[error("route `{0}` already exists")]
    DuplicateId(String),

    #[error("route `{0}` not found")]
    NotFound(String),
}

fn describe(violations: &[RuleViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// How `import` combines the document with the live table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// The document becomes the whole table.
    #[default]
    Replace,
    /// Upsert by id; rules not in the document are kept.
    Merge,
}

/// Serialized form of the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTableDocument {
    #[serde(default = "document_version")]
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

fn document_version() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Rules sharing one path, split by method.
#[derive(Debug, Default)]
struct MethodIndex {
    methods: HashMap<String, Arc<RouteRule>>,
    any: Option<Arc<RouteRule>>,
}

impl MethodIndex {
    fn insert(&mut self, rule: Arc<RouteRule>) {
        if rule.method == ANY_METHOD {
            self.any = Some(rule);
        } else {
            self.methods.insert(rule.method.clone(), rule);
        }
    }

    fn lookup(&self, method: &str) -> Option<&Arc<RouteRule>> {
        self.methods.get(method).or(self.any.as_ref())
    }
}

/// One immutable snapshot of the routing table.
#[derive(Debug, Default)]
struct RouteTable {
    rules: HashMap<String, Arc<RouteRule>>,
    exact: HashMap<String, MethodIndex>,
    /// Longest literal first.
    prefixes: Vec<(PathPattern, MethodIndex)>,
}

impl RouteTable {
    fn build(rules: HashMap<String, Arc<RouteRule>>) -> Self {
        let mut exact: HashMap<String, MethodIndex> = HashMap::new();
        let mut prefixes: HashMap<String, MethodIndex> = HashMap::new();

        for rule in rules.values() {
            match rule.pattern() {
                PathPattern::Exact(path) => exact.entry(path).or_default().insert(rule.clone()),
                PathPattern::Prefix(literal) => {
                    prefixes.entry(literal).or_default().insert(rule.clone())
                }
            }
        }

        let mut prefixes: Vec<_> = prefixes
            .into_iter()
            .map(|(literal, index)| (PathPattern::Prefix(literal), index))
            .collect();
        prefixes.sort_by(|a, b| b.0.literal().len().cmp(&a.0.literal().len()));

        Self {
            rules,
            exact,
            prefixes,
        }
    }

    fn lookup(&self, method: &str, path: &str) -> Option<Arc<RouteRule>> {
        if let Some(rule) = self.exact.get(path).and_then(|index| index.lookup(method)) {
            return Some(rule.clone());
        }
        self.prefixes
            .iter()
            .filter(|(pattern, _)| pattern.matches(path))
            .find_map(|(_, index)| index.lookup(method))
            .cloned()
    }
}

/// The live route registry.
pub struct RouteRegistry {
    table: ArcSwap<RouteTable>,
    writer: Mutex<()>,
    defaults: RouteDefaults,
    known_middleware: BTreeSet<String>,
}

impl RouteRegistry {
    /// Create an empty registry.
    ///
    /// `known_middleware` is the set of names rules may reference.
    pub fn new<I, S>(defaults: RouteDefaults, known_middleware: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: ArcSwap::from_pointee(RouteTable::default()),
            writer: Mutex::new(()),
            defaults,
            known_middleware: known_middleware.into_iter().map(Into::into).collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, rules: HashMap<String, Arc<RouteRule>>) {
        self.table.store(Arc::new(RouteTable::build(rules)));
    }

    fn normalize(&self, rule: &mut RouteRule) {
        rule.method = rule.method.trim().to_ascii_uppercase();
        if rule.timeout_ms == 0 {
            rule.timeout_ms = self.defaults.timeout_ms;
        }
        if rule.retry_count == 0 {
            rule.retry_count = self.defaults.retry_count;
        }
    }

    /// Violations for `candidate` against `rules`, ignoring the rule it replaces.
    fn check(
        &self,
        candidate: &RouteRule,
        rules: &HashMap<String, Arc<RouteRule>>,
        replacing: Option<&str>,
    ) -> Vec<RuleViolation> {
        let mut violations = candidate.violations(&self.known_middleware);
        let method = candidate.method.to_ascii_uppercase();
        let conflict = rules.values().find(|other| {
            Some(other.id.as_str()) != replacing
                && other.id != candidate.id
                && other.method == method
                && other.path == candidate.path
        });
        if let Some(other) = conflict {
            violations.push(RuleViolation::new(
                "path",
                format!("{} {} is already served by route `{}`", method, candidate.path, other.id),
            ));
        }
        violations
    }

    /// Dry-run validation against the current table.
    pub fn validate(&self, rule: &RouteRule) -> Result<(), RouteError> {
        let table = self.table.load();
        let replacing = (!rule.id.is_empty()).then_some(rule.id.as_str());
        let violations = self.check(rule, &table.rules, replacing);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(RouteError::Invalid(violations))
        }
    }

    /// Add a rule, returning its id.
    pub fn add(&self, mut rule: RouteRule) -> Result<String, RouteError> {
        let _guard = self.lock();
        let current = self.table.load_full();

        if rule.id.is_empty() {
            rule.id = uuid::Uuid::new_v4().to_string();
        } else if current.rules.contains_key(&rule.id) {
            return Err(RouteError::DuplicateId(rule.id));
        }

        let violations = self.check(&rule, &current.rules, None);
        if !violations.is_empty() {
            return Err(RouteError::Invalid(violations));
        }

        self.normalize(&mut rule);
        let now = Utc::now();
        rule.status = RouteStatus::Active;
        rule.created_at = now;
        rule.updated_at = now;

        let id = rule.id.clone();
        let mut rules = current.rules.clone();
        rules.insert(id.clone(), Arc::new(rule));
        self.publish(rules);

        tracing::info!(route_id = %id, "Route added");
        Ok(id)
    }

    /// Replace an existing rule. `id` and `created_at` are kept.
    pub fn update(&self, id: &str, mut rule: RouteRule) -> Result<Arc<RouteRule>, RouteError> {
        let _guard = self.lock();
        let current = self.table.load_full();
        let existing = current
            .rules
            .get(id)
            .ok_or_else(|| RouteError::NotFound(id.to_string()))?;

        rule.id = id.to_string();
        let violations = self.check(&rule, &current.rules, Some(id));
        if !violations.is_empty() {
            return Err(RouteError::Invalid(violations));
        }

        self.normalize(&mut rule);
        rule.created_at = existing.created_at;
        rule.updated_at = Utc::now();

        let rule = Arc::new(rule);
        let mut rules = current.rules.clone();
        rules.insert(id.to_string(), rule.clone());
        self.publish(rules);

        tracing::info!(route_id = %id, "Route updated");
        Ok(rule)
    }

    pub fn remove(&self, id: &str) -> Result<Arc<RouteRule>, RouteError> {
        let _guard = self.lock();
        let current = self.table.load_full();
        let mut rules = current.rules.clone();
        let removed = rules
            .remove(id)
            .ok_or_else(|| RouteError::NotFound(id.to_string()))?;
        self.publish(rules);

        tracing::info!(route_id = %id, "Route removed");
        Ok(removed)
    }

    /// Flip a rule between Active and Inactive.
    pub fn toggle(&self, id: &str, active: bool) -> Result<Arc<RouteRule>, RouteError> {
        let _guard = self.lock();
        let current = self.table.load_full();
        let existing = current
            .rules
            .get(id)
            .ok_or_else(|| RouteError::NotFound(id.to_string()))?;

        let mut rule = RouteRule::clone(existing);
        rule.status = if active {
            RouteStatus::Active
        } else {
            RouteStatus::Inactive
        };
        rule.updated_at = Utc::now();

        let rule = Arc::new(rule);
        let mut rules = current.rules.clone();
        rules.insert(id.to_string(), rule.clone());
        self.publish(rules);

        tracing::info!(route_id = %id, status = %rule.status, "Route toggled");
        Ok(rule)
    }

    pub fn get(&self, id: &str) -> Option<Arc<RouteRule>> {
        self.table.load().rules.get(id).cloned()
    }

    /// All rules, oldest first.
    pub fn list(&self) -> Vec<Arc<RouteRule>> {
        let mut rules: Vec<_> = self.table.load().rules.values().cloned().collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        rules
    }

    pub fn list_by_service(&self, service: &str) -> Vec<Arc<RouteRule>> {
        self.list()
            .into_iter()
            .filter(|rule| rule.target_service.as_deref() == Some(service))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.load().rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most specific rule for a request, whatever its status.
    ///
    /// Exact path beats prefix; at the same path a method-specific rule
    /// beats `ANY`; among prefixes the longest literal wins.
    pub fn match_route(&self, method: &str, path: &str) -> Option<Arc<RouteRule>> {
        let method = method.to_ascii_uppercase();
        self.table.load().lookup(&method, path)
    }

    pub fn export(&self) -> RouteTableDocument {
        RouteTableDocument {
            version: document_version(),
            exported_at: Utc::now(),
            routes: self.list().iter().map(|rule| RouteRule::clone(rule)).collect(),
        }
    }

    /// Apply a document. Every rule is validated first; nothing is applied
    /// if any of them is invalid.
    pub fn import(
        &self,
        document: RouteTableDocument,
        mode: ImportMode,
    ) -> Result<ImportReport, RouteError> {
        let _guard = self.lock();
        let current = self.table.load_full();
        let now = Utc::now();

        let mut next: HashMap<String, Arc<RouteRule>> = match mode {
            ImportMode::Replace => HashMap::new(),
            ImportMode::Merge => current.rules.clone(),
        };

        let mut violations = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut report = ImportReport::default();

        for mut rule in document.routes {
            if rule.id.is_empty() {
                rule.id = uuid::Uuid::new_v4().to_string();
            }
            if !seen_ids.insert(rule.id.clone()) {
                violations.push(RuleViolation::new(
                    "id",
                    format!("route `{}` appears more than once", rule.id),
                ));
                continue;
            }
            for violation in rule.violations(&self.known_middleware) {
                violations.push(RuleViolation::new(
                    violation.field,
                    format!("route `{}`: {}", rule.id, violation.message),
                ));
            }

            self.normalize(&mut rule);
            match current.rules.get(&rule.id) {
                Some(existing) => {
                    rule.created_at = existing.created_at;
                    report.updated += 1;
                }
                None => report.created += 1,
            }
            rule.updated_at = now;
            next.insert(rule.id.clone(), Arc::new(rule));
        }

        let mut keys: HashMap<(&str, &str), &str> = HashMap::new();
        for rule in next.values() {
            let key = (rule.method.as_str(), rule.path.as_str());
            if let Some(other) = keys.insert(key, rule.id.as_str()) {
                violations.push(RuleViolation::new(
                    "path",
                    format!(
                        "{} {} is served by both `{}` and `{}`",
                        rule.method, rule.path, other, rule.id
                    ),
                ));
            }
        }

        if !violations.is_empty() {
            return Err(RouteError::Invalid(violations));
        }

        if mode == ImportMode::Replace {
            report.removed = current
                .rules
                .keys()
                .filter(|id| !next.contains_key(*id))
                .count();
        }
        self.publish(next);

        tracing::info!(
            mode = ?mode,
            created = report.created,
            updated = report.updated,
            removed = report.removed,
            "Route table imported"
        );
        Ok(report)
    }
}

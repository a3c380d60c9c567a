//! Model registry: category lookups, priority ordering and fallback resolution
//!
//! The registry owns the immutable catalog plus the per-category user
//! priority overrides. It is constructed once at application start and
//! shared behind an `Arc`.
//!
//! # Fallback chain
//!
//! [`ModelRegistry::get_next_fallback_model`] walks the effective priority
//! order strictly forward from the current model. It never wraps around and
//! never returns an excluded id, so a chain always terminates.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::catalog::{builtin_catalog, ModelCategory, ModelId, ModelInfo};

/// Keywords that mark a provider error as quota/rate-limit related.
///
/// Matching is a best-effort substring heuristic over the lower-cased
/// message; providers phrase these errors inconsistently and some quota
/// failures will not be recognised. Changing this list changes fallback
/// behaviour and needs matching test cases.
pub const QUOTA_KEYWORDS: &[&str] = &[
    "quota",
    "limit",
    "exceeded",
    "rate limit",
    "429",
    "insufficient",
    "billing",
    "credit",
];

/// Best-effort classification of a provider error message as quota related
pub fn is_quota_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// Catalog plus user priority overrides
pub struct ModelRegistry {
    catalog: Vec<ModelInfo>,
    user_priorities: RwLock<HashMap<ModelCategory, Vec<ModelId>>>,
}

impl ModelRegistry {
    /// Create a registry over the given catalog
    pub fn new(catalog: Vec<ModelInfo>) -> Self {
        Self {
            catalog,
            user_priorities: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry over the built-in catalog
    pub fn with_builtin_catalog() -> Self {
        Self::new(builtin_catalog())
    }

    /// Look up a single model
    pub fn get_model(&self, id: &str) -> Option<&ModelInfo> {
        self.catalog.iter().find(|m| m.id == id)
    }

    /// Catalog slice for a category, in catalog order
    pub fn get_models_by_category(&self, category: ModelCategory) -> Vec<ModelInfo> {
        self.catalog
            .iter()
            .filter(|m| m.category == category)
            .cloned()
            .collect()
    }

    /// The entry flagged as default, else the most preferred by priority
    pub fn get_default_model(&self, category: ModelCategory) -> Option<ModelId> {
        let models = self.get_models_by_category(category);
        if let Some(default) = models.iter().find(|m| m.is_default) {
            return Some(default.id.clone());
        }
        models
            .iter()
            .enumerate()
            .min_by_key(|(index, m)| (m.priority, *index))
            .map(|(_, m)| m.id.clone())
    }

    /// Effective priority order for a category.
    ///
    /// Without a user override this is the catalog sorted ascending by
    /// `priority` (stable, so ties keep catalog order). With an override the
    /// user's ids come first in their order, followed by the rest.
    pub fn get_models_by_priority(&self, category: ModelCategory) -> Vec<ModelInfo> {
        let mut models = self.get_models_by_category(category);
        models.sort_by_key(|m| m.priority);

        let priorities = self.user_priorities.read();
        let Some(order) = priorities.get(&category) else {
            return models;
        };

        let mut ordered = Vec::with_capacity(models.len());
        for id in order {
            if let Some(pos) = models.iter().position(|m| &m.id == id) {
                ordered.push(models.remove(pos));
            }
        }
        ordered.extend(models);
        ordered
    }

    /// Next model after `current_id` in its category's priority order that
    /// is not in `excluded`, or `None` when the chain is exhausted.
    pub fn get_next_fallback_model(&self, current_id: &str, excluded: &[ModelId]) -> Option<ModelId> {
        let current = self.get_model(current_id)?;
        let ordered = self.get_models_by_priority(current.category);
        let position = ordered.iter().position(|m| m.id == current_id)?;

        ordered[position + 1..]
            .iter()
            .find(|m| !excluded.iter().any(|e| e == &m.id))
            .map(|m| m.id.clone())
    }

    /// Classify a provider error message (see [`is_quota_error`])
    pub fn is_quota_error(&self, message: &str) -> bool {
        is_quota_error(message)
    }

    /// Replace the user priority override for a category.
    ///
    /// Ids that are not in the category are dropped.
    pub fn set_user_priority(&self, category: ModelCategory, ids: Vec<ModelId>) {
        let known: Vec<ModelId> = ids
            .into_iter()
            .filter(|id| {
                self.get_model(id)
                    .map(|m| m.category == category)
                    .unwrap_or(false)
            })
            .collect();
        log::debug!("User priority for {}: {:?}", category, known);
        self.user_priorities.write().insert(category, known);
    }

    /// Remove the user override, restoring static ordering
    pub fn clear_user_priority(&self, category: ModelCategory) {
        self.user_priorities.write().remove(&category);
    }

    /// Snapshot of every override, for persistence
    pub fn user_priorities(&self) -> HashMap<ModelCategory, Vec<ModelId>> {
        self.user_priorities.read().clone()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_builtin_catalog()
    }
}

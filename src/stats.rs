//! Per-run bookkeeping: which entities were created/updated/left alone, which
//! expected page fields were missing, and which items failed.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{Change, EntityKind};

/// Entity names bucketed by classification label, in the order touched.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct KindStats {
    buckets: BTreeMap<&'static str, Vec<String>>,
    /// For entities classified "Updated": which fields changed.
    updated_fields: BTreeMap<String, Vec<&'static str>>,
}

impl KindStats {
    pub fn record(&mut self, name: &str, change: &Change) {
        self.buckets
            .entry(change.label())
            .or_default()
            .push(name.to_string());
        if let Change::Updated(fields) = change {
            self.updated_fields.insert(name.to_string(), fields.clone());
        }
    }

    pub fn names(&self, label: &str) -> &[String] {
        self.buckets.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn buckets(&self) -> &BTreeMap<&'static str, Vec<String>> {
        &self.buckets
    }

    pub fn updated_fields(&self, name: &str) -> &[&'static str] {
        self.updated_fields
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn total(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }
}

/// Field-not-found counters. Diagnostic only: nothing here stops a parse.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FieldStats {
    categories: BTreeMap<String, Vec<String>>,
}

impl FieldStats {
    pub fn add(&mut self, category: &str, value: &str) {
        self.categories
            .entry(category.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn count(&self, category: &str) -> usize {
        self.categories.get(category).map(Vec::len).unwrap_or(0)
    }

    /// `"<count> [<values>]"` for one category.
    pub fn report_value(&self, category: &str) -> Option<String> {
        self.categories
            .get(category)
            .map(|values| format!("{} [{}]", values.len(), values.join(", ")))
    }

    /// One `"<category>: <count> [<values>]"` line per category containing
    /// "not found".
    pub fn not_found(&self) -> Vec<String> {
        self.categories
            .keys()
            .filter(|c| c.contains("not found"))
            .filter_map(|c| self.report_value(c).map(|v| format!("{}: {}", c, v)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn reset(&mut self) {
        self.categories.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: Option<EntityKind>,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub publications: KindStats,
    pub collections: KindStats,
    pub organizations: KindStats,
    pub fields: FieldStats,
    pub failures: Vec<Failure>,
}

impl RunStats {
    pub fn kind(&self, kind: EntityKind) -> &KindStats {
        match kind {
            EntityKind::Publication => &self.publications,
            EntityKind::Collection => &self.collections,
            EntityKind::Organization => &self.organizations,
        }
    }

    pub fn fail(&mut self, kind: Option<EntityKind>, url: &str, error: &dyn std::fmt::Display) {
        self.failures.push(Failure {
            kind,
            url: url.to_string(),
            error: error.to_string(),
        });
    }

    pub fn reset(&mut self) {
        *self = RunStats::default();
    }

    pub fn print(&self) {
        for kind in [
            EntityKind::Publication,
            EntityKind::Collection,
            EntityKind::Organization,
        ] {
            let stats = self.kind(kind);
            if stats.is_empty() {
                println!("{:<13} none", format!("{}s:", kind));
                continue;
            }
            let counts: Vec<String> = stats
                .buckets()
                .iter()
                .map(|(label, names)| format!("{} {}", names.len(), label))
                .collect();
            println!("{:<13} {}", format!("{}s:", kind), counts.join(", "));
        }
        for line in self.fields.not_found() {
            println!("  {}", line);
        }
        if !self.failures.is_empty() {
            println!("Failures: {}", self.failures.len());
            for f in &self.failures {
                println!("  {}: {}", f.url, f.error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_keep_touch_order() {
        let mut stats = KindStats::default();
        stats.record("b", &Change::Created);
        stats.record("a", &Change::Created);
        stats.record("c", &Change::Updated(vec!["title"]));
        assert_eq!(stats.names("Created"), ["b", "a"]);
        assert_eq!(stats.names("Updated"), ["c"]);
        assert_eq!(stats.updated_fields("c"), ["title"]);
        assert!(stats.names("Unchanged").is_empty());
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn not_found_report() {
        let mut fields = FieldStats::default();
        fields.add("Updated not found - check", "pub_name");
        fields.add("Attachment format inferred", "a.csv");
        assert_eq!(fields.not_found(), ["Updated not found - check: 1 [pub_name]"]);
        assert_eq!(fields.count("Attachment format inferred"), 1);
        fields.reset();
        assert!(fields.is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let mut run = RunStats::default();
        run.organizations.record("cabinet-office", &Change::Created);
        run.fields.add("Title not found", "x");
        run.fail(Some(EntityKind::Publication), "/x", &"boom");
        run.reset();
        assert_eq!(run, RunStats::default());
    }
}

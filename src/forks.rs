//! Fork similarity report.
//!
//! An exercise forked from another exercise that still exists is a
//! candidate when its exercise config, runtime configuration and test set
//! all match the origin. The remaining facets are reported as flags.

use crate::error::{Diagnostic, DbopsResult};
use crate::facets::{Facet, FacetComparators, LocalizedText};
use crate::model::{self, ExerciseRecord};
use crate::store::RowQuery;
use chrono::{DateTime, NaiveDateTime};
use rusqlite::Connection;
use std::collections::HashMap;

/// Placeholder for an exercise without any localized name.
pub const MISSING_NAME: &str = "??";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct ForkReportOptions {
    /// Locales of the name columns, in column order.
    pub locales: Vec<String>,
    pub link_base_url: String,
}

impl Default for ForkReportOptions {
    fn default() -> Self {
        Self {
            locales: vec!["en".to_string(), "cs".to_string()],
            link_base_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkCandidate {
    pub id: String,
    pub forked_from: String,
    pub author: String,
    /// One name per requested locale.
    pub names: Vec<String>,
    pub updated_at: String,
    pub broken: bool,
    pub active_groups: i64,
    pub link: String,
    /// Equality of every informational facet, in [`Facet::INFORMATIONAL`] order.
    pub flags: Vec<(Facet, bool)>,
}

impl ForkCandidate {
    pub fn flag(&self, facet: Facet) -> Option<bool> {
        self.flags.iter().find(|(f, _)| *f == facet).map(|(_, v)| *v)
    }

    /// Cells in [`ForkReport::header`] order.
    pub fn cells(&self) -> Vec<String> {
        let mut out = vec![
            self.id.clone(),
            self.forked_from.clone(),
            self.author.clone(),
        ];
        out.extend(self.names.iter().cloned());
        out.push(self.updated_at.clone());
        out.push(bool_cell(self.broken));
        out.push(self.active_groups.to_string());
        out.push(self.link.clone());
        out.extend(self.flags.iter().map(|(_, v)| bool_cell(*v)));
        out
    }

    pub fn to_json(&self, locales: &[String]) -> serde_json::Value {
        let mut names = serde_json::Map::new();
        for (locale, name) in locales.iter().zip(self.names.iter()) {
            names.insert(locale.clone(), serde_json::Value::String(name.clone()));
        }
        let mut row = serde_json::json!({
            "id": self.id,
            "forkedFrom": self.forked_from,
            "author": self.author,
            "names": names,
            "updatedAt": self.updated_at,
            "broken": self.broken,
            "activeGroups": self.active_groups,
            "link": self.link,
        });
        for (facet, value) in &self.flags {
            row[facet.column()] = serde_json::Value::Bool(*value);
        }
        row
    }
}

fn bool_cell(v: bool) -> String {
    let cell = if v { "1" } else { "0" };
    cell.to_string()
}

#[derive(Debug, Clone, Default)]
pub struct ForkReport {
    pub candidates: Vec<ForkCandidate>,
    pub diagnostics: Vec<Diagnostic>,
    /// Number of exercises whose fork origin is present.
    pub examined: usize,
}

impl ForkReport {
    pub fn header(locales: &[String]) -> Vec<String> {
        let mut out: Vec<String> = ["id", "forked_from", "author"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        out.extend(locales.iter().map(|l| format!("name_{l}")));
        out.extend(
            ["updated_at", "broken", "active_groups", "link"]
                .iter()
                .map(|s| s.to_string()),
        );
        out.extend(Facet::INFORMATIONAL.iter().map(|f| f.column().to_string()));
        out
    }
}

/// Runs the fork detector over every non-deleted exercise. Read only.
pub fn detect(conn: &Connection, options: &ForkReportOptions) -> DbopsResult<ForkReport> {
    let exercises = model::load_exercises(conn)?;
    let by_id: HashMap<&str, &ExerciseRecord> =
        exercises.iter().map(|e| (e.id.as_str(), e)).collect();
    let comparators = FacetComparators::new(conn);
    let mut report = ForkReport::default();

    let mut gated = Vec::new();
    for fork in &exercises {
        let Some(origin_id) = fork.forked_from_id.as_deref() else {
            continue;
        };
        if origin_id == fork.id {
            tracing::debug!(exercise = %fork.id, "exercise is recorded as its own fork");
            continue;
        }
        let Some(origin) = by_id.get(origin_id).copied() else {
            continue;
        };
        report.examined += 1;

        let mut passed = true;
        for facet in Facet::GATE {
            if !comparators.compare(facet, origin, fork, &mut report.diagnostics)? {
                tracing::debug!(exercise = %fork.id, facet = facet.name(), "fork gate failed");
                passed = false;
                break;
            }
        }
        if !passed {
            continue;
        }

        let mut flags = Vec::with_capacity(Facet::INFORMATIONAL.len());
        for facet in Facet::INFORMATIONAL {
            flags.push((facet, comparators.compare(facet, origin, fork, &mut report.diagnostics)?));
        }
        gated.push((fork, origin_id, flags));
    }

    let authors = author_names(conn)?;
    let groups = active_group_counts(conn)?;
    let texts = comparators.lookups().texts()?;
    for (fork, origin_id, flags) in gated {
        let localized: Vec<&LocalizedText> = fork
            .localized_text_ids
            .iter()
            .filter_map(|id| texts.get(id))
            .collect();
        report.candidates.push(ForkCandidate {
            id: fork.id.clone(),
            forked_from: origin_id.to_string(),
            author: fork
                .author_id
                .as_deref()
                .and_then(|a| authors.get(a).cloned())
                .unwrap_or_default(),
            names: options
                .locales
                .iter()
                .map(|l| localized_name(&localized, l))
                .collect(),
            updated_at: fork
                .updated_at
                .as_deref()
                .map(normalize_timestamp)
                .unwrap_or_default(),
            broken: fork.is_broken,
            active_groups: groups.get(&fork.id).copied().unwrap_or(0),
            link: exercise_link(&options.link_base_url, &fork.id),
            flags,
        });
    }

    tracing::info!(
        examined = report.examined,
        candidates = report.candidates.len(),
        "fork detection finished"
    );
    Ok(report)
}

/// Name in `locale` if present and non-empty, else the first available name.
pub fn localized_name(texts: &[&LocalizedText], locale: &str) -> String {
    texts
        .iter()
        .find(|t| t.locale == locale && !t.name.is_empty())
        .or_else(|| texts.first())
        .map(|t| t.name.clone())
        .unwrap_or_else(|| MISSING_NAME.to_string())
}

pub fn exercise_link(base: &str, exercise_id: &str) -> String {
    format!("{}/app/exercises/{}", base.trim_end_matches('/'), exercise_id)
}

/// Normalizes stored timestamps to `YYYY-MM-DD HH:MM:SS`. Values that do not
/// parse are returned as they are.
pub fn normalize_timestamp(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.naive_utc().format(TIMESTAMP_FORMAT).to_string();
    }
    for fmt in [TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return dt.format(TIMESTAMP_FORMAT).to_string();
        }
    }
    raw.to_string()
}

fn author_names(conn: &Connection) -> DbopsResult<HashMap<String, String>> {
    let rows = conn.fetch_pairs(
        "SELECT id, TRIM(COALESCE(first_name, '') || ' ' || COALESCE(last_name, '')) FROM user",
        [],
    )?;
    Ok(rows
        .into_iter()
        .map(|(id, name)| (id, name.unwrap_or_default()))
        .collect())
}

fn active_group_counts(conn: &Connection) -> DbopsResult<HashMap<String, i64>> {
    let rows = conn.fetch_all(
        "SELECT eg.exercise_id, COUNT(*)
         FROM exercise_group eg
         JOIN \"group\" g ON g.id = eg.group_id
         WHERE g.deleted_at IS NULL AND g.archived_at IS NULL
         GROUP BY eg.exercise_id",
        [],
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
    )?;
    Ok(rows.into_iter().collect())
}

//! Per-facet equality of two exercises.
//!
//! Every comparator first tries the cheap path (same id, or identical joined
//! id lists) and only then falls back to a structural comparison over the
//! referenced auxiliary records. Those records come from [`FacetLookups`],
//! whose tables are loaded on first use and kept for the rest of the run.
//! Dangling references make a facet unequal; they are never errors.

use crate::error::{Diagnostic, DbopsResult};
use crate::model::ExerciseRecord;
use crate::store::RowQuery;
use crate::yaml_eq::{self, Side, YamlVerdict};
use rusqlite::Connection;
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    ExerciseConfig,
    Runtime,
    Tests,
    ScoreConfig,
    SupplementaryFiles,
    Limits,
    LocalizedTexts,
    OtherConfig,
}

impl Facet {
    /// Facets that must all match for a fork to count as unmodified, in
    /// evaluation order.
    pub const GATE: [Facet; 3] = [Facet::ExerciseConfig, Facet::Runtime, Facet::Tests];

    /// Facets reported as diagnostic columns, in column order.
    pub const INFORMATIONAL: [Facet; 5] = [
        Facet::ScoreConfig,
        Facet::SupplementaryFiles,
        Facet::Limits,
        Facet::LocalizedTexts,
        Facet::OtherConfig,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Facet::ExerciseConfig => "exercise-config",
            Facet::Runtime => "runtime",
            Facet::Tests => "tests",
            Facet::ScoreConfig => "score-config",
            Facet::SupplementaryFiles => "supplementary-files",
            Facet::Limits => "limits",
            Facet::LocalizedTexts => "localized-texts",
            Facet::OtherConfig => "other-config",
        }
    }

    /// Report column carrying this facet's equality flag.
    pub fn column(self) -> &'static str {
        match self {
            Facet::ExerciseConfig => "sameConfig",
            Facet::Runtime => "sameRuntime",
            Facet::Tests => "sameTests",
            Facet::ScoreConfig => "sameScoreConfig",
            Facet::SupplementaryFiles => "sameFiles",
            Facet::Limits => "sameLimits",
            Facet::LocalizedTexts => "sameTexts",
            Facet::OtherConfig => "sameOther",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreConfig {
    pub calculator: String,
    pub config: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub runtime_environment_id: String,
    pub variables_table: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitsRecord {
    pub runtime_environment_id: String,
    pub hardware_group_id: Option<String>,
    pub limits: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TestDefinition {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizedText {
    pub locale: String,
    pub name: String,
    pub description: String,
    pub external_link: Option<String>,
}

/// Auxiliary tables restricted to records referenced by non-deleted
/// exercises. Each table is queried at most once per instance.
pub struct FacetLookups<'c> {
    conn: &'c Connection,
    exercise_configs: OnceCell<HashMap<String, Option<String>>>,
    score_configs: OnceCell<HashMap<String, ScoreConfig>>,
    environment_configs: OnceCell<HashMap<String, EnvironmentConfig>>,
    limits: OnceCell<HashMap<String, LimitsRecord>>,
    tests: OnceCell<HashMap<String, TestDefinition>>,
    file_hashes: OnceCell<HashMap<String, Option<String>>>,
    texts: OnceCell<HashMap<String, LocalizedText>>,
}

fn memo<'a, T>(
    cell: &'a OnceCell<T>,
    table: &str,
    load: impl FnOnce() -> DbopsResult<T>,
) -> DbopsResult<&'a T> {
    if let Some(v) = cell.get() {
        return Ok(v);
    }
    let v = load()?;
    tracing::debug!(table, "lookup table loaded");
    Ok(cell.get_or_init(|| v))
}

impl<'c> FacetLookups<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            exercise_configs: OnceCell::new(),
            score_configs: OnceCell::new(),
            environment_configs: OnceCell::new(),
            limits: OnceCell::new(),
            tests: OnceCell::new(),
            file_hashes: OnceCell::new(),
            texts: OnceCell::new(),
        }
    }

    pub fn exercise_configs(&self) -> DbopsResult<&HashMap<String, Option<String>>> {
        memo(&self.exercise_configs, "exercise_config", || {
            let rows = self.conn.fetch_pairs(
                "SELECT c.id, c.config FROM exercise_config c
                 WHERE EXISTS (SELECT 1 FROM exercise e
                               WHERE e.exercise_config_id = c.id AND e.deleted_at IS NULL)",
                [],
            )?;
            Ok(rows.into_iter().collect())
        })
    }

    pub fn score_configs(&self) -> DbopsResult<&HashMap<String, ScoreConfig>> {
        memo(&self.score_configs, "exercise_score_config", || {
            let rows = self.conn.fetch_all(
                "SELECT s.id, s.calculator, s.config FROM exercise_score_config s
                 WHERE EXISTS (SELECT 1 FROM exercise e
                               WHERE e.score_config_id = s.id AND e.deleted_at IS NULL)",
                [],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        ScoreConfig {
                            calculator: r.get(1)?,
                            config: r.get(2)?,
                        },
                    ))
                },
            )?;
            Ok(rows.into_iter().collect())
        })
    }

    pub fn environment_configs(&self) -> DbopsResult<&HashMap<String, EnvironmentConfig>> {
        memo(&self.environment_configs, "exercise_environment_config", || {
            let rows = self.conn.fetch_all(
                "SELECT c.id, c.runtime_environment_id, c.variables_table
                 FROM exercise_environment_config c
                 WHERE c.id IN (SELECT j.exercise_environment_config_id
                                FROM exercise_exercise_environment_config j
                                JOIN exercise e ON e.id = j.exercise_id
                                WHERE e.deleted_at IS NULL)",
                [],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        EnvironmentConfig {
                            runtime_environment_id: r.get(1)?,
                            variables_table: r.get(2)?,
                        },
                    ))
                },
            )?;
            Ok(rows.into_iter().collect())
        })
    }

    pub fn limits(&self) -> DbopsResult<&HashMap<String, LimitsRecord>> {
        memo(&self.limits, "exercise_limits", || {
            let rows = self.conn.fetch_all(
                "SELECT l.id, l.runtime_environment_id, l.hardware_group_id, l.limits
                 FROM exercise_limits l
                 WHERE l.id IN (SELECT j.exercise_limits_id
                                FROM exercise_exercise_limits j
                                JOIN exercise e ON e.id = j.exercise_id
                                WHERE e.deleted_at IS NULL)",
                [],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        LimitsRecord {
                            runtime_environment_id: r.get(1)?,
                            hardware_group_id: r.get(2)?,
                            limits: r.get(3)?,
                        },
                    ))
                },
            )?;
            Ok(rows.into_iter().collect())
        })
    }

    pub fn tests(&self) -> DbopsResult<&HashMap<String, TestDefinition>> {
        memo(&self.tests, "exercise_test", || {
            let rows = self.conn.fetch_all(
                "SELECT t.id, t.name, t.description FROM exercise_test t
                 WHERE t.id IN (SELECT j.exercise_test_id
                                FROM exercise_exercise_test j
                                JOIN exercise e ON e.id = j.exercise_id
                                WHERE e.deleted_at IS NULL)",
                [],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        TestDefinition {
                            name: r.get(1)?,
                            description: r.get(2)?,
                        },
                    ))
                },
            )?;
            Ok(rows.into_iter().collect())
        })
    }

    pub fn file_hashes(&self) -> DbopsResult<&HashMap<String, Option<String>>> {
        memo(&self.file_hashes, "uploaded_file", || {
            let rows = self.conn.fetch_pairs(
                "SELECT f.id, f.hash_name FROM uploaded_file f
                 WHERE f.id IN (SELECT j.supplementary_exercise_file_id
                                FROM exercise_supplementary_exercise_file j
                                JOIN exercise e ON e.id = j.exercise_id
                                WHERE e.deleted_at IS NULL)",
                [],
            )?;
            Ok(rows.into_iter().collect())
        })
    }

    pub fn texts(&self) -> DbopsResult<&HashMap<String, LocalizedText>> {
        memo(&self.texts, "localized_exercise", || {
            let rows = self.conn.fetch_all(
                "SELECT l.id, l.locale, l.name, l.description, l.external_assignment_link
                 FROM localized_exercise l
                 WHERE l.id IN (SELECT j.localized_exercise_id
                                FROM exercise_localized_exercise j
                                JOIN exercise e ON e.id = j.exercise_id
                                WHERE e.deleted_at IS NULL)",
                [],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        LocalizedText {
                            locale: r.get(1)?,
                            name: r.get(2)?,
                            description: r.get(3)?,
                            external_link: r.get(4)?,
                        },
                    ))
                },
            )?;
            Ok(rows.into_iter().collect())
        })
    }
}

/// Resolves every id through `table`; `None` if any id dangles.
fn resolve_all<'t, T>(table: &'t HashMap<String, T>, ids: &crate::model::IdList) -> Option<Vec<&'t T>> {
    ids.iter().map(|id| table.get(id)).collect()
}

pub struct FacetComparators<'c> {
    lookups: FacetLookups<'c>,
}

impl<'c> FacetComparators<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            lookups: FacetLookups::new(conn),
        }
    }

    pub fn lookups(&self) -> &FacetLookups<'c> {
        &self.lookups
    }

    /// Compares one facet of `left` and `right`. Unparsable documents are
    /// pushed to `diagnostics` against the exercise owning the document and
    /// count as different.
    pub fn compare(
        &self,
        facet: Facet,
        left: &ExerciseRecord,
        right: &ExerciseRecord,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> DbopsResult<bool> {
        let mut yaml = YamlCheck {
            left: &left.id,
            right: &right.id,
            facet,
            diagnostics,
        };
        match facet {
            Facet::ExerciseConfig => self.same_exercise_config(left, right, &mut yaml),
            Facet::Runtime => self.same_runtime(left, right, &mut yaml),
            Facet::Tests => self.same_tests(left, right),
            Facet::ScoreConfig => self.same_score_config(left, right, &mut yaml),
            Facet::SupplementaryFiles => self.same_files(left, right),
            Facet::Limits => self.same_limits(left, right, &mut yaml),
            Facet::LocalizedTexts => self.same_texts(left, right),
            Facet::OtherConfig => Ok(same_other_config(left, right)),
        }
    }

    fn same_exercise_config(
        &self,
        left: &ExerciseRecord,
        right: &ExerciseRecord,
        yaml: &mut YamlCheck<'_>,
    ) -> DbopsResult<bool> {
        let (lid, rid) = match (&left.exercise_config_id, &right.exercise_config_id) {
            (None, None) => return Ok(true),
            (Some(l), Some(r)) if l == r => return Ok(true),
            (Some(l), Some(r)) => (l.as_str(), r.as_str()),
            _ => return Ok(false),
        };
        let configs = self.lookups.exercise_configs()?;
        let (Some(l), Some(r)) = (configs.get(lid), configs.get(rid)) else {
            return Ok(false);
        };
        Ok(yaml.equal([lid, rid], l.as_deref(), r.as_deref()))
    }

    fn same_score_config(
        &self,
        left: &ExerciseRecord,
        right: &ExerciseRecord,
        yaml: &mut YamlCheck<'_>,
    ) -> DbopsResult<bool> {
        let (lid, rid) = match (&left.score_config_id, &right.score_config_id) {
            (None, None) => return Ok(true),
            (Some(l), Some(r)) if l == r => return Ok(true),
            (Some(l), Some(r)) => (l.as_str(), r.as_str()),
            _ => return Ok(false),
        };
        let configs = self.lookups.score_configs()?;
        let (Some(l), Some(r)) = (configs.get(lid), configs.get(rid)) else {
            return Ok(false);
        };
        if l.calculator != r.calculator {
            return Ok(false);
        }
        Ok(yaml.equal([lid, rid], l.config.as_deref(), r.config.as_deref()))
    }

    fn same_runtime(
        &self,
        left: &ExerciseRecord,
        right: &ExerciseRecord,
        yaml: &mut YamlCheck<'_>,
    ) -> DbopsResult<bool> {
        if left.hardware_group_ids != right.hardware_group_ids
            || left.runtime_environment_ids != right.runtime_environment_ids
        {
            return Ok(false);
        }
        if left.runtime_config_ids.joined() == right.runtime_config_ids.joined() {
            return Ok(true);
        }

        let configs = self.lookups.environment_configs()?;
        let by_env = |ex: &ExerciseRecord| -> Option<BTreeMap<String, Option<String>>> {
            let resolved = resolve_all(configs, &ex.runtime_config_ids)?;
            Some(
                resolved
                    .into_iter()
                    .map(|c| (c.runtime_environment_id.clone(), c.variables_table.clone()))
                    .collect(),
            )
        };
        let (Some(l), Some(r)) = (by_env(left), by_env(right)) else {
            return Ok(false);
        };
        Ok(yaml.equal_maps(&l, &r))
    }

    fn same_tests(&self, left: &ExerciseRecord, right: &ExerciseRecord) -> DbopsResult<bool> {
        if left.test_ids.joined() == right.test_ids.joined() {
            return Ok(true);
        }
        if left.test_ids.len() != right.test_ids.len() {
            return Ok(false);
        }

        let tests = self.lookups.tests()?;
        let sorted = |ex: &ExerciseRecord| -> Option<Vec<&TestDefinition>> {
            let mut v = resolve_all(tests, &ex.test_ids)?;
            v.sort();
            Some(v)
        };
        Ok(match (sorted(left), sorted(right)) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        })
    }

    fn same_files(&self, left: &ExerciseRecord, right: &ExerciseRecord) -> DbopsResult<bool> {
        if left.supplementary_file_ids.joined() == right.supplementary_file_ids.joined() {
            return Ok(true);
        }
        if left.supplementary_file_ids.len() != right.supplementary_file_ids.len() {
            return Ok(false);
        }

        let hashes = self.lookups.file_hashes()?;
        let hash_set = |ex: &ExerciseRecord| -> Option<BTreeSet<&str>> {
            ex.supplementary_file_ids
                .iter()
                .map(|id| hashes.get(id).and_then(|h| h.as_deref()))
                .collect()
        };
        Ok(match (hash_set(left), hash_set(right)) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        })
    }

    fn same_limits(
        &self,
        left: &ExerciseRecord,
        right: &ExerciseRecord,
        yaml: &mut YamlCheck<'_>,
    ) -> DbopsResult<bool> {
        if left.limits_ids.joined() == right.limits_ids.joined() {
            return Ok(true);
        }
        if left.limits_ids.len() != right.limits_ids.len()
            || left.runtime_environment_ids != right.runtime_environment_ids
        {
            return Ok(false);
        }

        let limits = self.lookups.limits()?;
        let by_env = |ex: &ExerciseRecord| -> Option<BTreeMap<String, Option<String>>> {
            let resolved = resolve_all(limits, &ex.limits_ids)?;
            Some(
                resolved
                    .into_iter()
                    .map(|l| {
                        let key = match &l.hardware_group_id {
                            Some(hw) => format!("{}/{}", l.runtime_environment_id, hw),
                            None => l.runtime_environment_id.clone(),
                        };
                        (key, l.limits.clone())
                    })
                    .collect(),
            )
        };
        let (Some(l), Some(r)) = (by_env(left), by_env(right)) else {
            return Ok(false);
        };
        Ok(yaml.equal_maps(&l, &r))
    }

    fn same_texts(&self, left: &ExerciseRecord, right: &ExerciseRecord) -> DbopsResult<bool> {
        if left.localized_text_ids.joined() == right.localized_text_ids.joined() {
            return Ok(true);
        }
        if left.localized_text_ids.len() != right.localized_text_ids.len() {
            return Ok(false);
        }

        let texts = self.lookups.texts()?;
        let by_locale = |ex: &ExerciseRecord| -> Option<BTreeMap<&str, &LocalizedText>> {
            let resolved = resolve_all(texts, &ex.localized_text_ids)?;
            Some(resolved.into_iter().map(|t| (t.locale.as_str(), t)).collect())
        };
        let (Some(l), Some(r)) = (by_locale(left), by_locale(right)) else {
            return Ok(false);
        };
        if l.len() != r.len() {
            return Ok(false);
        }
        Ok(l.iter().all(|(locale, lt)| {
            r.get(locale).is_some_and(|rt| {
                lt.name == rt.name
                    && lt.description == rt.description
                    && lt.external_link == rt.external_link
            })
        }))
    }
}

fn same_other_config(left: &ExerciseRecord, right: &ExerciseRecord) -> bool {
    left.difficulty == right.difficulty
        && left.configuration_type == right.configuration_type
        && left.solution_files_limit == right.solution_files_limit
        && left.solution_size_limit == right.solution_size_limit
        && left.merge_judge_logs == right.merge_judge_logs
        && left.tags.joined() == right.tags.joined()
}

/// YAML comparison that records parse failures as diagnostics.
struct YamlCheck<'d> {
    left: &'d str,
    right: &'d str,
    facet: Facet,
    diagnostics: &'d mut Vec<Diagnostic>,
}

impl YamlCheck<'_> {
    /// `docs` names the left and right documents in diagnostics.
    fn equal(&mut self, docs: [&str; 2], a: Option<&str>, b: Option<&str>) -> bool {
        match yaml_eq::compare(a, b) {
            YamlVerdict::Equal => true,
            YamlVerdict::Different => false,
            YamlVerdict::Unparsable { side, error } => {
                let (subject, doc) = match side {
                    Side::Left => (self.left, docs[0]),
                    Side::Right => (self.right, docs[1]),
                };
                let d = Diagnostic::new(
                    subject,
                    self.facet.name(),
                    format!("document {}: {}", doc, error),
                );
                tracing::warn!(subject = %d.subject, facet = d.facet, "{}", d.message);
                self.diagnostics.push(d);
                false
            }
        }
    }

    fn equal_maps(
        &mut self,
        l: &BTreeMap<String, Option<String>>,
        r: &BTreeMap<String, Option<String>>,
    ) -> bool {
        if l.len() != r.len() {
            return false;
        }
        for (key, ldoc) in l {
            let Some(rdoc) = r.get(key) else {
                return false;
            };
            if !self.equal([key.as_str(), key.as_str()], ldoc.as_deref(), rdoc.as_deref()) {
                return false;
            }
        }
        true
    }
}

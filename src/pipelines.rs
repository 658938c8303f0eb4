//! Pipeline fingerprints and the old -> new pipeline bijection used when
//! migrating between runtime environments.

use crate::error::{DbopsResult, MatchError};
use crate::store::RowQuery;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Discriminator of parameters that take part in fingerprints.
pub const BOOLEAN_PARAMETER: &str = "boolean";

/// Boolean parameter name -> value declared on a pipeline.
pub type Fingerprint = BTreeMap<String, bool>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineInfo {
    pub id: String,
    pub name: String,
    pub fingerprint: Fingerprint,
}

/// Total one-to-one mapping of old pipeline ids to new pipeline ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineMapping(BTreeMap<String, String>);

impl PipelineMapping {
    pub fn get(&self, old: &str) -> Option<&str> {
        self.0.get(old).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(o, n)| (o.as_str(), n.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedPipeline {
    pub old_id: String,
    pub old_name: String,
    pub new_id: String,
    pub new_name: String,
}

/// Pairs each old pipeline with the only new pipeline sharing its
/// fingerprint. Matched new pipelines are removed from the pool, so the
/// result is a bijection. There is no tie-break: zero or several candidates
/// fail the whole batch.
pub fn match_fingerprints(
    old: &[(String, Fingerprint)],
    new: &[(String, Fingerprint)],
) -> Result<PipelineMapping, MatchError> {
    if old.len() != new.len() {
        return Err(MatchError::SizeMismatch {
            old: old.len(),
            new: new.len(),
        });
    }

    let mut pool: Vec<&(String, Fingerprint)> = new.iter().collect();
    let mut mapping = BTreeMap::new();
    for (old_id, fingerprint) in old {
        let candidates: Vec<usize> = pool
            .iter()
            .enumerate()
            .filter(|(_, (_, fp))| fp == fingerprint)
            .map(|(i, _)| i)
            .collect();
        match candidates.as_slice() {
            [i] => {
                let (new_id, _) = pool.remove(*i);
                mapping.insert(old_id.clone(), new_id.clone());
            }
            [] => {
                return Err(MatchError::NoCandidate {
                    pipeline: old_id.clone(),
                })
            }
            many => {
                return Err(MatchError::Ambiguous {
                    pipeline: old_id.clone(),
                    candidates: many.len(),
                })
            }
        }
    }
    Ok(PipelineMapping(mapping))
}

pub fn environment_exists(conn: &Connection, environment_id: &str) -> DbopsResult<bool> {
    let found: Option<i64> = conn.fetch_single(
        "SELECT 1 FROM runtime_environment WHERE id = ?",
        [environment_id],
    )?;
    Ok(found.is_some())
}

/// Pipelines owned by a runtime environment with their fingerprints, ordered
/// by id.
pub fn environment_pipelines(
    conn: &Connection,
    environment_id: &str,
) -> DbopsResult<Vec<PipelineInfo>> {
    let mut pipelines = conn.fetch_all(
        "SELECT p.id, p.name
         FROM pipeline p
         JOIN pipeline_runtime_environment pre ON pre.pipeline_id = p.id
         WHERE pre.runtime_environment_id = ?
         ORDER BY p.id",
        [environment_id],
        |r| {
            Ok(PipelineInfo {
                id: r.get(0)?,
                name: r.get(1)?,
                fingerprint: Fingerprint::new(),
            })
        },
    )?;

    let params = conn.fetch_all(
        "SELECT pp.pipeline_id, pp.name, pp.boolean_value
         FROM pipeline_parameter pp
         JOIN pipeline_runtime_environment pre ON pre.pipeline_id = pp.pipeline_id
         WHERE pre.runtime_environment_id = ?1 AND pp.discriminator = ?2",
        [environment_id, BOOLEAN_PARAMETER],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<i64>>(2)?,
            ))
        },
    )?;
    let mut by_pipeline: HashMap<String, Fingerprint> = HashMap::new();
    for (pipeline_id, name, value) in params {
        // A boolean parameter without a value says nothing about the pipeline.
        let Some(value) = value else {
            tracing::warn!(pipeline = %pipeline_id, parameter = %name, "boolean parameter has no value");
            continue;
        };
        by_pipeline.entry(pipeline_id).or_default().insert(name, value != 0);
    }
    for p in pipelines.iter_mut() {
        if let Some(fp) = by_pipeline.remove(&p.id) {
            p.fingerprint = fp;
        }
    }
    Ok(pipelines)
}

/// Builds the bijection between two pipeline sets and names each pair.
pub fn map_pipelines(
    old: &[PipelineInfo],
    new: &[PipelineInfo],
) -> Result<(PipelineMapping, Vec<MappedPipeline>), MatchError> {
    let key = |p: &PipelineInfo| (p.id.clone(), p.fingerprint.clone());
    let old_fps: Vec<_> = old.iter().map(key).collect();
    let new_fps: Vec<_> = new.iter().map(key).collect();
    let mapping = match_fingerprints(&old_fps, &new_fps)?;

    let names: HashMap<&str, &str> = old
        .iter()
        .chain(new.iter())
        .map(|p| (p.id.as_str(), p.name.as_str()))
        .collect();
    let named = mapping
        .iter()
        .map(|(o, n)| MappedPipeline {
            old_id: o.to_string(),
            old_name: names.get(o).copied().unwrap_or_default().to_string(),
            new_id: n.to_string(),
            new_name: names.get(n).copied().unwrap_or_default().to_string(),
        })
        .collect();
    Ok((mapping, named))
}

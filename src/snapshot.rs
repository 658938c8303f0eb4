use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/store.sqlite3";
pub const SNAPSHOT_FORMAT: &str = "dbops-snapshot-v1";

#[derive(Debug, Clone)]
pub struct SnapshotSummary {
    pub path: PathBuf,
    pub sha256: String,
    pub entry_count: usize,
}

fn file_sha256(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open database {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut f, &mut hasher).context("failed to hash database")?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Copies the store file into `<dir>/<run_id>.zip` together with a manifest.
/// Must be called while no transaction is open.
pub fn write_snapshot(db_path: &Path, dir: &Path, run_id: Uuid) -> anyhow::Result<SnapshotSummary> {
    if !db_path.is_file() {
        return Err(anyhow!(
            "database not found: {}",
            db_path.to_string_lossy()
        ));
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.to_string_lossy()))?;

    let out_path = dir.join(format!("{run_id}.zip"));
    let out_file = File::create(&out_path).with_context(|| {
        format!(
            "failed to create snapshot file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let sha256 = file_sha256(db_path)?;
    let manifest = json!({
        "format": SNAPSHOT_FORMAT,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "runId": run_id.to_string(),
        "createdAt": chrono::Utc::now().to_rfc3339(),
        "database": db_path.to_string_lossy(),
        "sha256": sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    zip.finish().context("failed to finalize snapshot")?;
    tracing::info!(path = %out_path.to_string_lossy(), %sha256, "snapshot written");

    Ok(SnapshotSummary {
        path: out_path,
        sha256,
        entry_count: 2,
    })
}

/// Reads the manifest of a snapshot and checks its format and database digest.
pub fn verify_snapshot(path: &Path) -> anyhow::Result<serde_json::Value> {
    let f = File::open(path)
        .with_context(|| format!("failed to open snapshot {}", path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(f).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("snapshot missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != SNAPSHOT_FORMAT {
        return Err(anyhow!("unsupported snapshot format: {}", format));
    }

    let mut hasher = Sha256::new();
    let mut entry = archive
        .by_name(DB_ENTRY)
        .context("snapshot missing database entry")?;
    std::io::copy(&mut entry, &mut hasher).context("failed to read database entry")?;
    let actual = format!("{:x}", hasher.finalize());
    let expected = manifest
        .get("sha256")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if actual != expected {
        return Err(anyhow!(
            "snapshot digest mismatch (manifest {}, content {})",
            expected,
            actual
        ));
    }
    Ok(manifest)
}

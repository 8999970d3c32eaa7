//! Export artifact layout plus the reconciliation persistence layer for LREC.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub mod memory;
pub mod pg;
pub mod store;

pub use memory::MemoryStore;
pub use pg::PgStore;
pub use store::{DayTransaction, ReconStore, RetractedRows, StoreConfig, StoreError};

pub const CRATE_NAME: &str = "lrec-storage";

const REGION_DIR_PREFIX: &str = "UF=";
const EXPORT_FILE_PREFIX: &str = "Lista_imoveis_";
const EXPORT_FILE_SUFFIX: &str = ".csv";
const NATIONAL_REGION: &str = "geral";
const UNKNOWN_REGION: &str = "NA";

/// One export file found under a day directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub path: PathBuf,
    /// Path relative to the data root, `/`-separated.
    pub source_id: String,
    pub region_hint: String,
}

#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Day-partitioned export directory:
/// `<root>/dt=YYYY-MM-DD/UF=<code>/Lista_imoveis_<code>.csv`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn day_dir(&self, day: NaiveDate) -> PathBuf {
        self.root.join(day_dir_name(day))
    }

    pub fn artifact_relative_path(&self, day: NaiveDate, region: &str) -> anyhow::Result<PathBuf> {
        let code = region_dir_code(region)?;
        Ok(PathBuf::from(day_dir_name(day))
            .join(format!("{REGION_DIR_PREFIX}{code}"))
            .join(format!("{EXPORT_FILE_PREFIX}{code}{EXPORT_FILE_SUFFIX}")))
    }

    /// Every `UF=*/Lista_imoveis_*.csv` under the day directory, sorted by
    /// path. A missing day directory yields an empty list.
    pub async fn list_day_artifacts(&self, day: NaiveDate) -> anyhow::Result<Vec<ArtifactRef>> {
        let day_dir = self.day_dir(day);
        let mut region_dirs = match fs::read_dir(&day_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading day directory {}", day_dir.display()))
            }
        };

        let mut paths = Vec::new();
        while let Some(entry) = region_dirs
            .next_entry()
            .await
            .with_context(|| format!("listing {}", day_dir.display()))?
        {
            let is_region_dir = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(REGION_DIR_PREFIX));
            if !is_region_dir || !entry.file_type().await?.is_dir() {
                continue;
            }

            let region_dir = entry.path();
            let mut files = fs::read_dir(&region_dir)
                .await
                .with_context(|| format!("reading region directory {}", region_dir.display()))?;
            while let Some(file) = files.next_entry().await? {
                let is_export = file.file_name().to_str().is_some_and(|name| {
                    name.starts_with(EXPORT_FILE_PREFIX) && name.ends_with(EXPORT_FILE_SUFFIX)
                });
                if is_export && file.file_type().await?.is_file() {
                    paths.push(file.path());
                }
            }
        }
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| ArtifactRef {
                source_id: self.source_id(&path),
                region_hint: region_hint_from_path(&path),
                path,
            })
            .collect())
    }

    pub async fn read_artifact(&self, artifact: &ArtifactRef) -> anyhow::Result<Vec<u8>> {
        fs::read(&artifact.path)
            .await
            .with_context(|| format!("reading export {}", artifact.path.display()))
    }

    /// Places a downloaded export into the day layout with a temp-file write
    /// and atomic rename. Identical bytes already in place are left alone.
    pub async fn stage_export(
        &self,
        day: NaiveDate,
        region: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StagedArtifact> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.artifact_relative_path(day, region)?;
        let absolute_path = self.root.join(&relative_path);
        let staged = |deduplicated| StagedArtifact {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        let Some(parent) = absolute_path.parent() else {
            bail!("export path {} has no parent directory", absolute_path.display());
        };
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating export directory {}", parent.display()))?;

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking export path {}", absolute_path.display()))?
        {
            let existing = fs::read(&absolute_path)
                .await
                .with_context(|| format!("reading existing export {}", absolute_path.display()))?;
            if Self::sha256_hex(&existing) == content_hash {
                return Ok(staged(true));
            }
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp export file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp export file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp export file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp export {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }
        Ok(staged(false))
    }

    fn source_id(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .iter()
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn day_dir_name(day: NaiveDate) -> String {
    format!("dt={}", day.format("%Y-%m-%d"))
}

fn region_dir_code(region: &str) -> anyhow::Result<String> {
    let region = region.trim();
    if region.eq_ignore_ascii_case(NATIONAL_REGION) {
        return Ok(NATIONAL_REGION.to_string());
    }
    if region.len() != 2 || !region.chars().all(|c| c.is_ascii_alphabetic()) {
        bail!("region code must be two letters or `{NATIONAL_REGION}`, got `{region}`");
    }
    Ok(region.to_ascii_uppercase())
}

/// Region code implied by an export's location: the `UF=` directory when it
/// holds two upper-case letters or `geral`, else the code embedded in a
/// `Lista_imoveis_<code>.csv` file name, else `NA`. Always upper-cased.
pub fn region_hint_from_path(path: &Path) -> String {
    let from_dir = path.iter().rev().find_map(|part| {
        let code = part.to_str()?.strip_prefix(REGION_DIR_PREFIX)?;
        let valid = (code.len() == 2 && code.chars().all(|c| c.is_ascii_uppercase()))
            || code == NATIONAL_REGION;
        valid.then(|| code.to_ascii_uppercase())
    });
    if let Some(code) = from_dir {
        return code;
    }

    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(EXPORT_FILE_PREFIX))
        .and_then(|rest| rest.strip_suffix(EXPORT_FILE_SUFFIX))
        .filter(|code| (2..=5).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphabetic()))
        .map(str::to_ascii_uppercase)
        .unwrap_or_else(|| UNKNOWN_REGION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[test]
    fn artifact_hashing_is_stable() {
        assert_eq!(
            ArtifactStore::sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn region_hints_follow_directory_then_file_name() {
        let cases = [
            ("data/dt=2026-03-02/UF=SP/Lista_imoveis_SP.csv", "SP"),
            ("data/dt=2026-03-02/UF=geral/Lista_imoveis_geral.csv", "GERAL"),
            ("data/dt=2026-03-02/UF=sp/Lista_imoveis_rj.csv", "RJ"),
            ("downloads/Lista_imoveis_MG.csv", "MG"),
            ("downloads/Lista_imoveis_123.csv", "NA"),
            ("downloads/export.csv", "NA"),
        ];
        for (path, expected) in cases {
            assert_eq!(region_hint_from_path(Path::new(path)), expected, "{path}");
        }
    }

    #[test]
    fn relative_paths_use_the_day_layout() {
        let store = ArtifactStore::new("data/caixa");
        assert_eq!(
            store.artifact_relative_path(day(), " sp ").unwrap(),
            PathBuf::from("dt=2026-03-02/UF=SP/Lista_imoveis_SP.csv")
        );
        assert_eq!(
            store.artifact_relative_path(day(), "GERAL").unwrap(),
            PathBuf::from("dt=2026-03-02/UF=geral/Lista_imoveis_geral.csv")
        );
        assert!(store.artifact_relative_path(day(), "../x").is_err());
    }

    #[tokio::test]
    async fn staging_identical_bytes_is_deduplicated() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());

        let first = store.stage_export(day(), "SP", b"a;b;c").await.expect("first");
        let second = store.stage_export(day(), "SP", b"a;b;c").await.expect("second");
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.content_hash, second.content_hash);
        assert!(first.absolute_path.exists());

        let replaced = store.stage_export(day(), "SP", b"x;y;z").await.expect("replace");
        assert!(!replaced.deduplicated);
        assert_eq!(std::fs::read(&replaced.absolute_path).unwrap(), b"x;y;z");

        let leftovers = std::fs::read_dir(replaced.absolute_path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn listing_finds_exports_sorted_and_skips_strays() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        store.stage_export(day(), "SP", b"sp").await.unwrap();
        store.stage_export(day(), "AC", b"ac").await.unwrap();
        store.stage_export(day(), "geral", b"br").await.unwrap();

        let day_dir = store.day_dir(day());
        std::fs::write(day_dir.join("UF=SP").join("notes.txt"), b"x").unwrap();
        std::fs::create_dir_all(day_dir.join("tmp")).unwrap();
        std::fs::write(day_dir.join("tmp").join("Lista_imoveis_RJ.csv"), b"x").unwrap();

        let artifacts = store.list_day_artifacts(day()).await.unwrap();
        let ids: Vec<&str> = artifacts.iter().map(|a| a.source_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "dt=2026-03-02/UF=AC/Lista_imoveis_AC.csv",
                "dt=2026-03-02/UF=SP/Lista_imoveis_SP.csv",
                "dt=2026-03-02/UF=geral/Lista_imoveis_geral.csv",
            ]
        );
        let hints: Vec<&str> = artifacts.iter().map(|a| a.region_hint.as_str()).collect();
        assert_eq!(hints, vec!["AC", "SP", "GERAL"]);
        assert_eq!(store.read_artifact(&artifacts[0]).await.unwrap(), b"ac");
    }

    #[tokio::test]
    async fn missing_day_directory_lists_nothing() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        assert!(store.list_day_artifacts(day()).await.unwrap().is_empty());
    }
}

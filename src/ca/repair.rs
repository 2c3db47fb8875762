//! Migration of legacy flat-directory CA material into a versioned PKI
//! directory.
//!
//! The repair runs as a sequence of phases with a persisted marker, so a
//! crash at any boundary resumes instead of starting over. Material is
//! copied, never moved; metadata is written only after the target has been
//! verified; and a legacy file is deleted only when an identical copy sits
//! in the target.

use super::layout::{pki_directory, PkiDirectory, ROOT_CERT_FILE, ROOT_KEY_FILE};
use super::rotation::ensure_generation_at_least;
use super::{CaEngineKind, CaIdentifier, CA_ID_CONFIG_KEY, CONFIG_PATH_KEY};
use crate::error::{Error, Result};
use crate::store::{AppConfigStore, Counter};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// App config key holding the repair progress marker.
pub const REPAIR_PHASE_KEY: &str = "ca_repair_phase";

/// Repair phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RepairPhase {
    Locate,
    AllocateGeneration,
    CopyMaterial,
    VerifyTarget,
    PersistMetadata,
    CleanupLegacy,
    Done,
}

impl RepairPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locate => "locate",
            Self::AllocateGeneration => "allocate_generation",
            Self::CopyMaterial => "copy_material",
            Self::VerifyTarget => "verify_target",
            Self::PersistMetadata => "persist_metadata",
            Self::CleanupLegacy => "cleanup_legacy",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for RepairPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepairPhase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            Self::Locate,
            Self::AllocateGeneration,
            Self::CopyMaterial,
            Self::VerifyTarget,
            Self::PersistMetadata,
            Self::CleanupLegacy,
            Self::Done,
        ]
        .into_iter()
        .find(|p| p.as_str() == s)
        .ok_or_else(|| Error::Validation(format!("unknown repair phase: {}", s)))
    }
}

/// What a repair run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Identifier the material now belongs to
    pub target: Option<CaIdentifier>,
    pub target_dir: Option<PathBuf>,
    /// Files copied into the target, relative to the legacy directory
    pub copied: Vec<PathBuf>,
    /// Files already present at the target
    pub skipped: Vec<PathBuf>,
    /// Legacy files deleted after cleanup
    pub removed: Vec<PathBuf>,
    pub legacy_dir_removed: bool,
    /// Per-file failures that were logged and skipped
    pub failures: Vec<String>,
    /// Phase at which the run stopped
    pub last_phase: Option<RepairPhase>,
}

/// Crash-safe CA material repair.
pub struct CaRepair<'a, S: ?Sized> {
    store: &'a S,
    root: PathBuf,
    instance_id: String,
    engine: CaEngineKind,
}

impl<'a, S> CaRepair<'a, S>
where
    S: AppConfigStore + Counter + ?Sized,
{
    pub fn new(
        store: &'a S,
        root: impl Into<PathBuf>,
        instance_id: impl Into<String>,
        engine: CaEngineKind,
    ) -> Self {
        Self {
            store,
            root: root.into(),
            instance_id: instance_id.into(),
            engine,
        }
    }

    /// Run every remaining phase.
    pub fn run(&self) -> Result<RepairReport> {
        self.run_until(RepairPhase::Done)
    }

    /// Run phases up to, not including, `stop`. The marker is left at
    /// `stop`, as after a crash at that boundary.
    pub fn run_until(&self, stop: RepairPhase) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        let legacy = pki_directory(&self.root, &PkiDirectory::Legacy(self.engine));

        let (mut phase, mut target) = self.load_marker()?;
        if phase == RepairPhase::Locate {
            if !has_root_material(&legacy) {
                log::debug!("No legacy CA material in {}", legacy.display());
                report.last_phase = Some(RepairPhase::Done);
                return Ok(report);
            }
            log::info!("Found legacy CA material in {}", legacy.display());
            phase = RepairPhase::AllocateGeneration;
        }

        while phase < stop && phase != RepairPhase::Done {
            log::info!("CA repair phase {}", phase);
            let next = match phase {
                RepairPhase::Locate => RepairPhase::AllocateGeneration,
                RepairPhase::AllocateGeneration => {
                    target = Some(self.allocate_target()?);
                    RepairPhase::CopyMaterial
                },
                RepairPhase::CopyMaterial => {
                    let dir = self.target_dir(target.as_ref())?;
                    copy_tree(&legacy, &dir, Path::new(""), &mut report)?;
                    RepairPhase::VerifyTarget
                },
                RepairPhase::VerifyTarget => {
                    let dir = self.target_dir(target.as_ref())?;
                    if !has_root_material(&dir) {
                        self.save_marker(RepairPhase::CopyMaterial, target.as_ref())?;
                        return Err(Error::RetryableInfra(format!(
                            "root certificate or key missing in {} after copy",
                            dir.display()
                        )));
                    }
                    RepairPhase::PersistMetadata
                },
                RepairPhase::PersistMetadata => {
                    let id = target.as_ref().ok_or_else(not_allocated)?;
                    let dir = self.target_dir(Some(id))?;
                    self.store.set(CA_ID_CONFIG_KEY, &id.encode())?;
                    self.store.set(CONFIG_PATH_KEY, &dir.to_string_lossy())?;
                    ensure_generation_at_least(self.store, id.generation())?;
                    RepairPhase::CleanupLegacy
                },
                RepairPhase::CleanupLegacy => {
                    let dir = self.target_dir(target.as_ref())?;
                    cleanup_legacy(&legacy, &dir, &mut report);
                    RepairPhase::Done
                },
                RepairPhase::Done => RepairPhase::Done,
            };
            phase = next;
            if phase == RepairPhase::Done {
                self.store.remove(REPAIR_PHASE_KEY)?;
            } else {
                self.save_marker(phase, target.as_ref())?;
            }
        }

        report.target_dir = target
            .as_ref()
            .map(|id| pki_directory(&self.root, &PkiDirectory::Generation(id.clone())));
        report.target = target;
        report.last_phase = Some(phase);
        Ok(report)
    }

    /// Target generation: the active identifier's when it parses, else 1.
    fn allocate_target(&self) -> Result<CaIdentifier> {
        let active = self
            .store
            .get(CA_ID_CONFIG_KEY)?
            .and_then(|encoded| CaIdentifier::decode(&encoded).ok());
        let target = match active {
            Some(id) => id,
            None => CaIdentifier::new(self.instance_id.clone(), 1, self.engine)?,
        };
        ensure_generation_at_least(self.store, target.generation())?;
        Ok(target)
    }

    fn target_dir(&self, target: Option<&CaIdentifier>) -> Result<PathBuf> {
        let id = target.ok_or_else(not_allocated)?;
        Ok(pki_directory(&self.root, &PkiDirectory::Generation(id.clone())))
    }

    fn load_marker(&self) -> Result<(RepairPhase, Option<CaIdentifier>)> {
        let Some(marker) = self.store.get(REPAIR_PHASE_KEY)? else {
            return Ok((RepairPhase::Locate, None));
        };
        let (phase, target) = match marker.split_once('|') {
            Some((phase, target)) => (phase, Some(CaIdentifier::decode(target)?)),
            None => (marker.as_str(), None),
        };
        let phase: RepairPhase = phase.parse()?;
        log::info!("Resuming CA repair at phase {}", phase);
        Ok((phase, target))
    }

    fn save_marker(&self, phase: RepairPhase, target: Option<&CaIdentifier>) -> Result<()> {
        let marker = match target {
            Some(id) => format!("{}|{}", phase, id),
            None => phase.to_string(),
        };
        self.store.set(REPAIR_PHASE_KEY, &marker)
    }
}

fn has_root_material(dir: &Path) -> bool {
    [ROOT_CERT_FILE, ROOT_KEY_FILE].iter().all(|name| {
        fs::metadata(dir.join(name))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    })
}

/// Placeholder files (`.gitkeep`, `.DS_Store`) do not count as material.
fn is_real_file(name: &std::ffi::OsStr) -> bool {
    !name.to_string_lossy().starts_with('.')
}

fn not_allocated() -> Error {
    Error::Validation("repair target not allocated".to_string())
}

fn infra(context: &str, path: &Path, e: std::io::Error) -> Error {
    Error::RetryableInfra(format!("{} {}: {}", context, path.display(), e))
}

fn copy_tree(from: &Path, to: &Path, rel: &Path, report: &mut RepairReport) -> Result<()> {
    let source = from.join(rel);
    let dest = to.join(rel);
    fs::create_dir_all(&dest).map_err(|e| infra("cannot create", &dest, e))?;
    let entries = fs::read_dir(&source).map_err(|e| infra("cannot list", &source, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| infra("cannot list", &source, e))?;
        let name = entry.file_name();
        let child = rel.join(&name);
        let path = entry.path();
        if path.is_dir() {
            copy_tree(from, to, &child, report)?;
            continue;
        }
        if !is_real_file(&name) {
            continue;
        }
        if to.join(&child).exists() {
            report.skipped.push(child);
            continue;
        }
        match fs::copy(&path, to.join(&child)) {
            Ok(_) => report.copied.push(child),
            Err(e) => {
                log::warn!("Failed to copy {}: {}", path.display(), e);
                report.failures.push(format!("copy {}: {}", child.display(), e));
            },
        }
    }
    Ok(())
}

fn cleanup_legacy(legacy: &Path, target: &Path, report: &mut RepairReport) {
    if !legacy.exists() {
        return;
    }
    remove_identical(legacy, target, Path::new(""), report);
    if count_real_files(legacy) == 0 {
        match fs::remove_dir_all(legacy) {
            Ok(()) => {
                report.legacy_dir_removed = true;
                log::info!("Removed legacy CA directory {}", legacy.display());
            },
            Err(e) => {
                log::warn!("Failed to remove {}: {}", legacy.display(), e);
                report.failures.push(format!("remove {}: {}", legacy.display(), e));
            },
        }
    } else {
        log::warn!("Legacy CA directory {} still holds files; keeping it", legacy.display());
    }
}

fn remove_identical(legacy: &Path, target: &Path, rel: &Path, report: &mut RepairReport) {
    let Ok(entries) = fs::read_dir(legacy.join(rel)) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let child = rel.join(&name);
        let path = entry.path();
        if path.is_dir() {
            remove_identical(legacy, target, &child, report);
            continue;
        }
        if !is_real_file(&name) {
            continue;
        }
        let identical = match (fs::read(&path), fs::read(target.join(&child))) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !identical {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => report.removed.push(child),
            Err(e) => {
                log::warn!("Failed to remove {}: {}", path.display(), e);
                report.failures.push(format!("remove {}: {}", child.display(), e));
            },
        }
    }
}

fn count_real_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_real_files(&path)
            } else if is_real_file(&entry.file_name()) {
                1
            } else {
                0
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, CA_GENERATION_COUNTER};

    fn legacy_fixture(root: &Path) -> PathBuf {
        let legacy = root.join("openssl_config");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(legacy.join(ROOT_CERT_FILE), b"cert").unwrap();
        fs::write(legacy.join(ROOT_KEY_FILE), b"key").unwrap();
        fs::write(legacy.join("openssl.cnf"), b"[ca]").unwrap();
        legacy
    }

    #[test]
    fn test_phase_names_roundtrip() {
        for phase in [RepairPhase::Locate, RepairPhase::CopyMaterial, RepairPhase::Done] {
            assert_eq!(phase.as_str().parse::<RepairPhase>().unwrap(), phase);
        }
    }

    #[test]
    fn test_nothing_to_repair() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryStore::new();
        let report = CaRepair::new(&store, dir.path(), "abc", CaEngineKind::OpenSsl).run().unwrap();
        assert_eq!(report.target, None);
        assert_eq!(store.get(CA_ID_CONFIG_KEY).unwrap(), None);
    }

    #[test]
    fn test_full_repair_allocates_generation_one() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = legacy_fixture(dir.path());
        let store = InMemoryStore::new();

        let report = CaRepair::new(&store, dir.path(), "abc", CaEngineKind::OpenSsl).run().unwrap();
        let target = report.target.clone().unwrap();
        assert_eq!(target.generation(), 1);
        assert_eq!(report.copied.len(), 3);
        assert!(report.legacy_dir_removed);
        assert!(!legacy.exists());
        assert!(dir.path().join("pki/abc_1_openssl").join(ROOT_KEY_FILE).exists());
        assert_eq!(store.get(CA_ID_CONFIG_KEY).unwrap(), Some(target.encode()));
        assert_eq!(store.current(CA_GENERATION_COUNTER).unwrap(), 1);
        assert_eq!(store.get(REPAIR_PHASE_KEY).unwrap(), None);
    }

    #[test]
    fn test_failed_verification_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = legacy_fixture(dir.path());
        let store = InMemoryStore::new();
        let repair = CaRepair::new(&store, dir.path(), "abc", CaEngineKind::OpenSsl);

        repair.run_until(RepairPhase::VerifyTarget).unwrap();
        fs::remove_file(dir.path().join("pki/abc_1_openssl").join(ROOT_KEY_FILE)).unwrap();

        let err = repair.run().unwrap_err();
        assert!(err.is_retryable());
        assert!(legacy.join(ROOT_KEY_FILE).exists());
        assert_eq!(store.get(CA_ID_CONFIG_KEY).unwrap(), None);

        // The next run copies the missing file again and completes
        let report = repair.run().unwrap();
        assert_eq!(report.copied, vec![PathBuf::from(ROOT_KEY_FILE)]);
        assert_eq!(report.last_phase, Some(RepairPhase::Done));
    }
}

//! CA generation rotation.

use super::layout::{pki_directory, PkiDirectory};
use super::{CaEngineKind, CaIdentifier, CA_ID_CONFIG_KEY};
use crate::error::{Conflict, Error, Result};
use crate::store::{AppConfigStore, Counter, CA_GENERATION_COUNTER};
use std::path::{Path, PathBuf};

/// Allocate the next CA generation and return its identifier and PKI
/// directory.
///
/// The generation is `max(counter, active identifier's generation) + 1`,
/// claimed with compare-and-swap so it is never handed out twice. Nothing
/// is written to disk and the active identifier is left unchanged.
pub fn rotate<S>(
    store: &S,
    root: &Path,
    instance_id: &str,
    engine: CaEngineKind,
) -> Result<(CaIdentifier, PathBuf)>
where
    S: Counter + AppConfigStore + ?Sized,
{
    let current = store.current(CA_GENERATION_COUNTER)?;
    let active = store
        .get(CA_ID_CONFIG_KEY)?
        .and_then(|encoded| CaIdentifier::decode(&encoded).ok())
        .map(|id| id.generation())
        .unwrap_or(0);
    let next = current.max(active) + 1;
    let identifier = CaIdentifier::new(instance_id, next, engine)?;

    if !store.compare_and_swap(CA_GENERATION_COUNTER, current, next)? {
        return Err(Error::StateConflict(Conflict::ConcurrentUpdate(
            CA_GENERATION_COUNTER.to_string(),
        )));
    }
    let directory = pki_directory(root, &PkiDirectory::Generation(identifier.clone()));
    log::info!("Rotated CA to generation {} ({})", next, identifier);
    Ok((identifier, directory))
}

/// Raise the generation counter to at least `generation`.
pub(crate) fn ensure_generation_at_least<S>(store: &S, generation: u64) -> Result<()>
where
    S: Counter + ?Sized,
{
    // Max-merge, so retrying a lost swap is harmless
    for _ in 0..8 {
        let current = store.current(CA_GENERATION_COUNTER)?;
        if current >= generation
            || store.compare_and_swap(CA_GENERATION_COUNTER, current, generation)?
        {
            return Ok(());
        }
    }
    Err(Error::StateConflict(Conflict::ConcurrentUpdate(
        CA_GENERATION_COUNTER.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_rotate_advances_generation() {
        let store = InMemoryStore::new();
        let root = Path::new("/srv");
        let (first, dir) = rotate(&store, root, "abc", CaEngineKind::OpenSsl).unwrap();
        let (second, _) = rotate(&store, root, "abc", CaEngineKind::OpenSsl).unwrap();
        assert_eq!(first.generation(), 1);
        assert_eq!(second.generation(), 2);
        assert_ne!(first.encode(), second.encode());
        assert_eq!(dir, PathBuf::from("/srv/pki/abc_1_openssl"));
        assert_eq!(store.current(CA_GENERATION_COUNTER).unwrap(), 2);
    }

    #[test]
    fn test_rotate_never_reuses_active_generation() {
        let store = InMemoryStore::new();
        let active = CaIdentifier::new("abc", 7, CaEngineKind::Cfssl).unwrap();
        store.set(CA_ID_CONFIG_KEY, &active.encode()).unwrap();
        let (next, _) = rotate(&store, Path::new("/srv"), "abc", CaEngineKind::Cfssl).unwrap();
        assert_eq!(next.generation(), 8);
    }

    #[test]
    fn test_ensure_generation_only_raises() {
        let store = InMemoryStore::new();
        ensure_generation_at_least(&store, 3).unwrap();
        ensure_generation_at_least(&store, 2).unwrap();
        assert_eq!(store.current(CA_GENERATION_COUNTER).unwrap(), 3);
    }
}

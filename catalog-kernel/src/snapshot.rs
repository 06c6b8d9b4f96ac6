/**
 * SNAPSHOT PERSISTER - Export JSON du Catalog sur disque
 *
 * RÔLE :
 * Sérialise tout le store (broker + devices + services + users) dans un
 * seul document JSON, réécrit entièrement à chaque mutation.
 *
 * FONCTIONNEMENT :
 * - Écriture dans un fichier temporaire voisin puis rename : jamais de document à moitié écrit
 * - Un verrou dédié sérialise les écritures concurrentes (HTTP, MQTT, éviction)
 * - Échec = PersistenceError loggée par l'appelant, le store mémoire reste la référence
 */

use crate::error::PersistenceError;
use crate::store::Database;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Compteurs exposés par /system/health
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SnapshotStats {
    pub writes: u64,
    pub failures: u64,
}

pub struct SnapshotPersister {
    path: PathBuf,
    write_lock: Mutex<()>,
    writes: AtomicU64,
    failures: AtomicU64,
}

impl SnapshotPersister {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            writes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fichier voisin : même nom + suffixe
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn tmp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    /// Écrit le contenu actuel de `db`.
    /// Le verrou d'écriture est pris AVANT la lecture du store : deux appels
    /// concurrents écrivent dans l'ordre où ils ont lu, le dernier document est le plus récent.
    pub fn write(&self, db: &RwLock<Database>) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock();

        let result: Result<(), PersistenceError> = (|| {
            // lock lecture tenu uniquement pendant la sérialisation, pas pendant l'IO
            let json = serde_json::to_string_pretty(&*db.read())?;
            let tmp = self.tmp_path();
            fs::write(&tmp, json)?;
            fs::rename(&tmp, &self.path)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Relit un snapshot existant. `Ok(None)` si le fichier n'existe pas encore.
    pub fn load(&self) -> Result<Option<Database>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let db: Database = serde_json::from_str(&content)?;
        Ok(Some(db))
    }

    /// Met de côté un snapshot illisible (`<nom>.corrupt`) pour que la prochaine
    /// écriture ne l'écrase pas. Retourne le nouveau chemin.
    pub fn quarantine(&self) -> Result<PathBuf, PersistenceError> {
        let aside = self.sibling(".corrupt");
        fs::rename(&self.path, &aside)?;
        Ok(aside)
    }

    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            writes: self.writes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

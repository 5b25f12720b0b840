//! Atomic record persistence.
//!
//! Every admitted payload becomes one file in the spool directory. A record
//! is staged as `<name>.tmp`, fsynced, then renamed to `<name>.dat`; staging
//! and final name live in the same directory, so the rename cannot cross a
//! filesystem boundary and a `.tmp` is never visible after a successful
//! store. Downstream consumers scan, consume and delete `.dat` files; the
//! external disk cleaner may do the same but must leave young `.tmp` files
//! alone.
//!
//! Record names are `<monotonic-unix-nanos>_<random-hex-16>`. Nanos are
//! forced strictly increasing per spool instance, and the random suffix
//! disambiguates across restarts and clock steps.

use std::{
    fs::{self, File},
    io::Write,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
};

use weir_core::env::Environment;

/// Errors raised by record persistence.
#[derive(thiserror::Error, Debug)]
pub enum SpoolError {
    /// Staging write (create/write/fsync of the `.tmp`) failed.
    #[error("failed to stage record {name}: {source}")]
    Stage {
        /// Record name being written
        name: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The rename that publishes the record failed.
    #[error("failed to publish record {name}: {source}")]
    Publish {
        /// Record name being published
        name: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Directory sync failed.
    #[error("failed to flush spool directory: {0}")]
    Flush(#[source] std::io::Error),
}

/// Persistence seam for the decapsulator; tests inject failing spools.
pub trait Spool: Send + Sync + 'static {
    /// Atomically persist one payload; returns the published file name.
    fn store(&self, payload: &[u8]) -> Result<String, SpoolError>;

    /// Sync the directory. Safe to call when idle.
    fn flush(&self) -> Result<(), SpoolError>;
}

/// Directory-backed spool; exclusively owns its directory path.
pub struct DirSpool<E: Environment> {
    dir: PathBuf,
    env: E,
    last_nanos: AtomicU64,
}

impl<E: Environment> DirSpool<E> {
    /// Create a spool over an existing, writable directory.
    #[must_use]
    pub fn new(dir: PathBuf, env: E) -> Self {
        Self { dir, env, last_nanos: AtomicU64::new(0) }
    }

    fn next_name(&self) -> String {
        let wall = self.env.wall_clock_nanos();
        let previous =
            self.last_nanos.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
                Some(wall.max(last + 1))
            });
        let nanos = match previous {
            Ok(last) | Err(last) => wall.max(last + 1),
        };

        let mut raw = [0u8; 8];
        self.env.random_bytes(&mut raw);
        let suffix: String = raw.iter().fold(String::with_capacity(16), |mut out, byte| {
            use std::fmt::Write as _;
            let _ = write!(out, "{byte:02x}");
            out
        });

        format!("{nanos}_{suffix}")
    }
}

impl<E: Environment> Spool for DirSpool<E> {
    fn store(&self, payload: &[u8]) -> Result<String, SpoolError> {
        let name = self.next_name();
        let tmp = self.dir.join(format!("{name}.tmp"));
        let dat = self.dir.join(format!("{name}.dat"));

        let staged = File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(payload)?;
                file.sync_all()
            })
            .map_err(|source| SpoolError::Stage { name: name.clone(), source });

        if let Err(error) = staged {
            let _ = fs::remove_file(&tmp);
            return Err(error);
        }

        if let Err(source) = fs::rename(&tmp, &dat) {
            let _ = fs::remove_file(&tmp);
            return Err(SpoolError::Publish { name, source });
        }

        Ok(format!("{name}.dat"))
    }

    fn flush(&self) -> Result<(), SpoolError> {
        File::open(&self.dir).and_then(|dir| dir.sync_all()).map_err(SpoolError::Flush)
    }
}

#[cfg(test)]
mod tests {
    use weir_core::env::ManualEnv;

    use super::*;

    fn spool_in(dir: &std::path::Path) -> DirSpool<ManualEnv> {
        DirSpool::new(dir.to_path_buf(), ManualEnv::new(99))
    }

    #[test]
    fn store_publishes_exact_payload_with_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let spool = spool_in(dir.path());

        let name = spool.store(b"register dump").unwrap();
        assert!(name.ends_with(".dat"));

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec![name.clone()]);
        assert!(!entries.iter().any(|n| n.ends_with(".tmp")));

        assert_eq!(fs::read(dir.path().join(&name)).unwrap(), b"register dump");
    }

    #[test]
    fn names_are_strictly_increasing_under_a_frozen_clock() {
        let dir = tempfile::tempdir().unwrap();
        let spool = spool_in(dir.path());

        let nanos_of = |name: &str| -> u64 {
            name.split('_').next().unwrap().parse().unwrap()
        };

        // The manual clock never advances; monotonicity must come from the
        // spool itself.
        let a = nanos_of(&spool.store(b"a").unwrap());
        let b = nanos_of(&spool.store(b"b").unwrap());
        let c = nanos_of(&spool.store(b"c").unwrap());
        assert!(a < b && b < c, "expected {a} < {b} < {c}");
    }

    #[test]
    fn name_shape_is_nanos_underscore_hex16() {
        let dir = tempfile::tempdir().unwrap();
        let spool = spool_in(dir.path());

        let name = spool.store(b"x").unwrap();
        let stem = name.strip_suffix(".dat").unwrap();
        let (nanos, suffix) = stem.split_once('_').unwrap();

        assert!(nanos.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn store_into_missing_directory_fails_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("removed");
        let spool = DirSpool::new(gone.clone(), ManualEnv::new(1));

        assert!(matches!(spool.store(b"x"), Err(SpoolError::Stage { .. })));
        assert!(!gone.exists());
    }

    #[test]
    fn flush_succeeds_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        spool_in(dir.path()).flush().unwrap();
    }

    #[test]
    fn empty_payload_is_a_valid_record() {
        let dir = tempfile::tempdir().unwrap();
        let spool = spool_in(dir.path());

        let name = spool.store(b"").unwrap();
        assert_eq!(fs::read(dir.path().join(name)).unwrap(), b"");
    }
}

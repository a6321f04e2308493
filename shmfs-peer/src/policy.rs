use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use libshmfs::{Result, ShmfsError};
use regex::Regex;

/// Decides which requested files this peer supplies.
///
/// Listed basenames are always admitted. Debugger scripts (`.gdb`, `.py`) are
/// refused so the requester reads its local copies. Anything else is admitted
/// when its basename matches a pattern at the start.
#[derive(Debug)]
pub struct LoadPolicy {
    allow: HashSet<OsString>,
    patterns: Vec<Regex>,
    all: bool,
}

impl LoadPolicy {
    pub fn new(
        patterns: &[String],
        allow: &[String],
        all: bool,
    ) -> std::result::Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(&format!("^(?:{p})")))
            .collect::<std::result::Result<_, _>>()?;
        Ok(Self {
            allow: allow.iter().map(OsString::from).collect(),
            patterns,
            all,
        })
    }

    pub fn admits(&self, path: &Path) -> bool {
        if self.all {
            return true;
        }
        let Some(base) = path.file_name() else {
            return false;
        };
        if self.allow.contains(base) {
            return true;
        }
        let base = base.to_string_lossy();
        if base.ends_with(".gdb") || base.ends_with(".py") {
            return false;
        }
        self.patterns.iter().any(|p| p.is_match(&base))
    }

    pub fn load(&self, path: &Path) -> Result<Vec<u8>> {
        if !self.admits(path) {
            return Err(ShmfsError::LoadFailure(path.to_path_buf()));
        }
        Ok(std::fs::read(path)?)
    }

    /// Content for one request, or `None` to answer with the error sentinel.
    pub fn answer(&self, request: &[u8]) -> Option<Vec<u8>> {
        let path = Path::new(OsStr::from_bytes(request));
        match self.load(path) {
            Ok(data) => {
                info!("loaded {} ({} bytes)", path.display(), data.len());
                Some(data)
            }
            Err(e) => {
                info!("refused {}: {e}", path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_policy() -> LoadPolicy {
        LoadPolicy::new(&[r".*\.so.*".to_string()], &["mpitest".to_string()], false).unwrap()
    }

    #[test]
    fn test_shared_objects_are_admitted() {
        let policy = default_policy();
        assert!(policy.admits(Path::new("/usr/lib/libc.so.6")));
        assert!(policy.admits(Path::new("/opt/mpi/lib/libmpi.so")));
        assert!(!policy.admits(Path::new("/home/u/a.out")));
        assert!(!policy.admits(Path::new("/")));
    }

    #[test]
    fn test_allow_list_and_scripts() {
        let policy = default_policy();
        assert!(policy.admits(Path::new("/home/u/mpitest")));
        assert!(!policy.admits(Path::new("/usr/lib/libfoo.so-gdb.py")));
        assert!(!policy.admits(Path::new("/usr/lib/libfoo.so.gdb")));
    }

    #[test]
    fn test_patterns_match_from_the_start() {
        let policy = LoadPolicy::new(&["lib".to_string()], &[], false).unwrap();
        assert!(policy.admits(Path::new("/x/libfoo")));
        assert!(!policy.admits(Path::new("/x/mylib")));
    }

    #[test]
    fn test_all_admits_everything() {
        let policy = LoadPolicy::new(&[], &[], true).unwrap();
        assert!(policy.admits(Path::new("/x/helper.py")));
        assert!(policy.admits(Path::new("/x/a.out")));
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        assert!(LoadPolicy::new(&["(".to_string()], &[], false).is_err());
    }

    #[test]
    fn test_answer_reads_admitted_files() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("libfoo.so.1");
        std::fs::write(&lib, b"\x7fELF").unwrap();
        let script = dir.path().join("libfoo.so.1-gdb.py");
        std::fs::write(&script, b"import gdb").unwrap();

        let policy = default_policy();
        assert_eq!(
            policy.answer(lib.as_os_str().as_bytes()),
            Some(b"\x7fELF".to_vec())
        );
        assert_eq!(policy.answer(script.as_os_str().as_bytes()), None);
        let missing = dir.path().join("libgone.so");
        assert_eq!(policy.answer(missing.as_os_str().as_bytes()), None);
        assert!(matches!(
            policy.load(&script),
            Err(ShmfsError::LoadFailure(p)) if p == script
        ));
        assert!(matches!(policy.load(&missing), Err(ShmfsError::Io(_))));
    }
}

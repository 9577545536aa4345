use sdk::errors::EngineError;
use std::path::{Path, PathBuf};

/// Confines every path the server touches to one root directory.
///
/// # Security Model
///
/// Existing paths go through four gates:
/// 1. Check deny list before canonicalization
/// 2. Canonicalize path to resolve symlinks and .. patterns
/// 3. Check deny list after canonicalization
/// 4. Verify path is within the root
///
/// Paths that do not exist yet (write targets, new directories) are checked
/// through their nearest existing ancestor; the missing tail may not contain
/// `..` components.
#[derive(Debug)]
pub struct RootGuard {
    root: PathBuf,
    deny_list: Vec<PathBuf>,
}

impl RootGuard {
    /// Creates a guard for `root`, which must exist.
    ///
    /// The deny list includes common sensitive paths:
    /// - .ssh, id_rsa, id_ed25519, id_dsa (SSH keys)
    /// - .env (environment variables)
    /// - .aws/credentials, .config/gcloud (cloud credentials)
    /// - .gnupg (GPG keys)
    /// - .kube/config (Kubernetes config)
    pub fn new(root: &Path) -> Result<Self, EngineError> {
        // Canonicalize to handle symlinks (e.g., /var -> /private/var on macOS)
        let root = root
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(root.to_path_buf(), e.to_string()))?;

        let deny_list = [
            ".ssh",
            ".env",
            ".aws/credentials",
            ".config/gcloud",
            "id_rsa",
            "id_ed25519",
            "id_dsa",
            ".gnupg",
            ".kube/config",
            "credentials",
            "private_key",
            ".npmrc",
            ".pypirc",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();

        Ok(Self { root, deny_list })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves an existing path. Relative paths are taken from the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, EngineError> {
        let path = self.absolute(path);

        // Gate 1: Check deny list before canonicalization
        if self.is_denied(&path) {
            return Err(EngineError::PathDenied(path));
        }

        // Gate 2: Canonicalize to resolve symlinks and .. patterns
        let canonical = path
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(path.clone(), e.to_string()))?;

        // Gate 3: Check deny list after canonicalization (catches symlink bypasses)
        if self.is_denied(&canonical) {
            return Err(EngineError::PathDenied(canonical));
        }

        // Gate 4: Verify within root
        if !canonical.starts_with(&self.root) {
            return Err(EngineError::PathOutsideRoot(canonical));
        }

        Ok(canonical)
    }

    /// Resolves a path that may not exist yet.
    pub fn resolve_for_write(&self, path: &str) -> Result<PathBuf, EngineError> {
        let path = self.absolute(path);
        if path.exists() {
            return self.resolve(&path.to_string_lossy());
        }

        if self.is_denied(&path) {
            return Err(EngineError::PathDenied(path));
        }

        // `file_name` is None for `..`, so a missing tail never climbs
        let mut existing = path.as_path();
        let mut tail = Vec::new();
        while !existing.exists() {
            let name = existing
                .file_name()
                .ok_or_else(|| EngineError::PathOutsideRoot(path.clone()))?;
            tail.push(name.to_os_string());
            existing = existing
                .parent()
                .ok_or_else(|| EngineError::PathOutsideRoot(path.clone()))?;
        }

        let mut resolved = self.resolve(&existing.to_string_lossy())?;
        for name in tail.iter().rev() {
            resolved.push(name);
        }

        if self.is_denied(&resolved) {
            return Err(EngineError::PathDenied(resolved));
        }
        Ok(resolved)
    }

    fn absolute(&self, path: &str) -> PathBuf {
        let target = Path::new(path);
        if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.root.join(target)
        }
    }

    /// Checks if a path matches any entry in the deny list.
    ///
    /// Matches when the path ends with a denied entry or when any single
    /// component equals one.
    fn is_denied(&self, path: &Path) -> bool {
        self.deny_list.iter().any(|denied| {
            path.ends_with(denied)
                || path.components().any(|c| {
                    matches!(
                        (c.as_os_str().to_str(), denied.to_str()),
                        (Some(component), Some(d)) if component == d
                    )
                })
        })
    }
}

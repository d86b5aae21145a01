//! Per-user data directories.
//!
//! ```text
//! {data_dir}/{token}/
//!   workspace/          seeded from the template on first contact
//!     memory/
//!   sessions/
//!   cron/
//!   config.json         copied fresh on every spawn
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::OrchestratorError;
use crate::identity::UserToken;

/// Creates and seeds user directories. All methods block on the filesystem;
/// async callers go through `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct WorkspaceProvisioner {
    data_dir: PathBuf,
    config_path: PathBuf,
    template_dir: PathBuf,
}

impl WorkspaceProvisioner {
    pub fn new(data_dir: PathBuf, config_path: PathBuf, template_dir: PathBuf) -> Self {
        Self {
            data_dir,
            config_path,
            template_dir,
        }
    }

    /// Root of a user's data directory.
    pub fn user_dir(&self, token: &UserToken) -> PathBuf {
        self.data_dir.join(token.as_str())
    }

    /// Make sure the user's directory tree exists and is current.
    ///
    /// The template is copied only when the user directory did not exist
    /// before this call, and never over an existing file. The shared config
    /// is copied every time. Returns the user directory.
    pub fn provision(&self, token: &UserToken) -> Result<PathBuf, OrchestratorError> {
        let user_dir = self.user_dir(token);
        let is_new = !user_dir.exists();

        let fail = |what: &str, path: &Path, e: io::Error| OrchestratorError::Provision {
            token: token.to_string(),
            reason: format!("{} {}: {}", what, path.display(), e),
        };

        for sub in ["workspace/memory", "sessions", "cron"] {
            let dir = user_dir.join(sub);
            fs::create_dir_all(&dir).map_err(|e| fail("failed to create", &dir, e))?;
        }

        let config_dest = user_dir.join("config.json");
        fs::copy(&self.config_path, &config_dest)
            .map_err(|e| fail("failed to copy config from", &self.config_path, e))?;

        if is_new {
            let workspace = user_dir.join("workspace");
            copy_template_dir(&self.template_dir, &workspace)
                .map_err(|e| fail("failed to seed workspace from", &self.template_dir, e))?;
            tracing::info!(token = %token, "Bootstrapped workspace");
        }

        Ok(user_dir)
    }
}

/// Recursively copy `src` into `dest`, skipping files that already exist.
/// A missing `src` is not an error.
fn copy_template_dir(src: &Path, dest: &Path) -> io::Result<()> {
    if !src.exists() {
        tracing::debug!(template = %src.display(), "No workspace template, skipping seed");
        return Ok(());
    }
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&dest_path)?;
            copy_template_dir(&src_path, &dest_path)?;
        } else if !dest_path.exists() {
            fs::copy(&src_path, &dest_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityNormalizer, SanitizingNormalizer};

    struct Fixture {
        _tmp: tempfile::TempDir,
        provisioner: WorkspaceProvisioner,
        config_path: PathBuf,
        template_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().join("data");
        let config_path = tmp.path().join("config.json");
        let template_dir = tmp.path().join("template");

        fs::write(&config_path, r#"{"model":"v1"}"#).unwrap();
        fs::create_dir_all(template_dir.join("skills")).unwrap();
        fs::write(template_dir.join("AGENTS.md"), "template agents").unwrap();
        fs::write(template_dir.join("skills").join("pdf.md"), "template skill").unwrap();

        let provisioner =
            WorkspaceProvisioner::new(data_dir, config_path.clone(), template_dir.clone());
        Fixture {
            _tmp: tmp,
            provisioner,
            config_path,
            template_dir,
        }
    }

    fn token(raw: &str) -> UserToken {
        SanitizingNormalizer.normalize(raw)
    }

    #[test]
    fn first_provision_creates_skeleton_and_seeds_template() {
        let fx = fixture();
        let dir = fx.provisioner.provision(&token("a_b")).unwrap();

        assert!(dir.join("workspace/memory").is_dir());
        assert!(dir.join("sessions").is_dir());
        assert!(dir.join("cron").is_dir());
        assert_eq!(
            fs::read_to_string(dir.join("config.json")).unwrap(),
            r#"{"model":"v1"}"#
        );
        assert_eq!(
            fs::read_to_string(dir.join("workspace/AGENTS.md")).unwrap(),
            "template agents"
        );
        assert_eq!(
            fs::read_to_string(dir.join("workspace/skills/pdf.md")).unwrap(),
            "template skill"
        );
    }

    #[test]
    fn reprovision_never_touches_user_files() {
        let fx = fixture();
        let t = token("a_b");
        let dir = fx.provisioner.provision(&t).unwrap();

        fs::write(dir.join("workspace/AGENTS.md"), "user edited").unwrap();
        fs::write(dir.join("workspace/notes.txt"), "user notes").unwrap();
        fs::remove_file(dir.join("workspace/skills/pdf.md")).unwrap();

        fx.provisioner.provision(&t).unwrap();

        assert_eq!(
            fs::read_to_string(dir.join("workspace/AGENTS.md")).unwrap(),
            "user edited"
        );
        assert_eq!(
            fs::read_to_string(dir.join("workspace/notes.txt")).unwrap(),
            "user notes"
        );
        // Existing user directories are not re-seeded.
        assert!(!dir.join("workspace/skills/pdf.md").exists());
    }

    #[test]
    fn config_is_refreshed_on_every_provision() {
        let fx = fixture();
        let t = token("a_b");
        let dir = fx.provisioner.provision(&t).unwrap();

        fs::write(&fx.config_path, r#"{"model":"v2"}"#).unwrap();
        fx.provisioner.provision(&t).unwrap();

        assert_eq!(
            fs::read_to_string(dir.join("config.json")).unwrap(),
            r#"{"model":"v2"}"#
        );
    }

    #[test]
    fn deleted_user_dir_is_reseeded() {
        let fx = fixture();
        let t = token("a_b");
        let dir = fx.provisioner.provision(&t).unwrap();

        fs::remove_dir_all(&dir).unwrap();
        fx.provisioner.provision(&t).unwrap();

        assert!(dir.join("workspace/AGENTS.md").exists());
    }

    #[test]
    fn missing_template_is_skipped() {
        let fx = fixture();
        fs::remove_dir_all(&fx.template_dir).unwrap();

        let dir = fx.provisioner.provision(&token("a_b")).unwrap();
        assert!(dir.join("workspace/memory").is_dir());
        assert!(dir.join("config.json").exists());
    }

    #[test]
    fn missing_config_is_a_provision_error() {
        let fx = fixture();
        fs::remove_file(&fx.config_path).unwrap();

        let err = fx.provisioner.provision(&token("a_b")).unwrap_err();
        assert!(matches!(err, OrchestratorError::Provision { ref token, .. } if token == "a_b"));
        assert!(err.to_string().contains("config"), "got: {}", err);
    }
}

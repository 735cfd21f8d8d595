//! Security audit over the credential tree.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::secretbox;

/// A token file that does not look sealed, i.e. probably plaintext.
#[derive(Debug, Clone)]
pub struct AuditFinding {
    pub path: PathBuf,
    pub reason: String,
}

/// Walk `<root>/auth/**/token.json` and report every file whose contents do
/// not carry the sealed-format version byte. Unreadable files are reported
/// too; the audit must not silently skip anything under auth/.
pub fn audit_plaintext(root: &Path) -> Result<Vec<AuditFinding>> {
    let auth_dir = root.join("auth");
    let mut findings = Vec::new();
    if auth_dir.is_dir() {
        walk(&auth_dir, &mut findings)?;
    }
    Ok(findings)
}

fn walk(dir: &Path, findings: &mut Vec<AuditFinding>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, findings)?;
        } else if path.file_name().and_then(|n| n.to_str()) == Some("token.json") {
            match std::fs::read(&path) {
                Ok(data) if secretbox::looks_sealed(&data) => {}
                Ok(_) => findings.push(AuditFinding {
                    path,
                    reason: "contents are not a sealed blob (plaintext token?)".into(),
                }),
                Err(e) => findings.push(AuditFinding {
                    path,
                    reason: format!("unreadable: {e}"),
                }),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master_key::MasterKey;
    use crate::store::{CredentialStore, OAuthToken};
    use tempfile::TempDir;

    #[test]
    fn sealed_tokens_pass_the_audit() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path(), MasterKey::from_bytes([5u8; 32]));
        store
            .save_token(
                "gemini-cli",
                &OAuthToken {
                    access_token: "tok".into(),
                    refresh_token: None,
                    expires_at: 0,
                    email: None,
                },
            )
            .unwrap();
        assert!(audit_plaintext(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn plaintext_token_is_flagged() {
        let dir = TempDir::new().unwrap();
        let bad_dir = dir.path().join("auth/providers/openai-codex");
        std::fs::create_dir_all(&bad_dir).unwrap();
        std::fs::write(
            bad_dir.join("token.json"),
            br#"{"access_token":"leaked-plaintext"}"#,
        )
        .unwrap();

        let findings = audit_plaintext(dir.path()).unwrap();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].path.ends_with("openai-codex/token.json"));
    }

    #[test]
    fn empty_tree_audits_clean() {
        let dir = TempDir::new().unwrap();
        assert!(audit_plaintext(dir.path()).unwrap().is_empty());
    }
}

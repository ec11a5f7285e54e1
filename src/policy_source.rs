//! Reference `PolicyReader`/`WorkspaceReader` implementations backed by a
//! JSON file, used when no cloud SDK client is wired in. The real IAM policy
//! API and workspace directory API are explicitly out of scope (see the
//! module docs on `policy::PolicyReader`/`policy::WorkspaceReader`); this is
//! the stand-in that lets the binary run end to end. `FilePolicySource`
//! overrides `PolicyReader::reload` to re-read the file from disk, and
//! `PolicyProjection::build` calls `reload` before every build, so edits to
//! the file land within one refresh interval.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::Deserialize;

use crate::error::AuthError;
use crate::policy::{Member, PolicyReader, RawBinding, WorkspaceReader};

#[derive(Deserialize, Clone)]
struct FileBinding {
    /// `user:<email>` or `group:<name>`, mirroring cloud IAM binding member
    /// prefixes.
    member: String,
    title: String,
    expression: Option<String>,
}

#[derive(Deserialize, Clone, Default)]
struct FileContents {
    #[serde(default)]
    bindings: Vec<FileBinding>,
    #[serde(default)]
    groups: HashMap<String, Vec<String>>,
}

pub struct FilePolicySource {
    path: PathBuf,
    contents: RwLock<FileContents>,
}

impl FilePolicySource {
    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        let contents = Self::read(&path)?;
        Ok(Self { path, contents: RwLock::new(contents) })
    }

    fn read(path: &PathBuf) -> anyhow::Result<FileContents> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Re-reads the file from disk, replacing the in-memory contents.
    fn reload_from_disk(&self) {
        match Self::read(&self.path) {
            Ok(contents) => {
                *self.contents.write().unwrap_or_else(|e| e.into_inner()) = contents;
            }
            Err(err) => {
                tracing::warn!(error = %err, path = %self.path.display(), "policy file reload failed");
            }
        }
    }
}

fn parse_member(raw: &str) -> Option<Member> {
    if let Some(principal) = raw.strip_prefix("user:") {
        return Some(Member::Principal(principal.to_string()));
    }
    if let Some(principal) = raw.strip_prefix("serviceAccount:") {
        return Some(Member::Principal(principal.to_string()));
    }
    if let Some(group) = raw.strip_prefix("group:") {
        return Some(Member::Group(group.to_string()));
    }
    None
}

impl PolicyReader for FilePolicySource {
    fn bindings_for_role_in_project(
        &self,
        _role: &str,
        _project: &str,
    ) -> Result<Vec<RawBinding>, AuthError> {
        let contents = self.contents.read().unwrap_or_else(|e| e.into_inner());
        contents
            .bindings
            .iter()
            .map(|b| {
                let member = parse_member(&b.member).ok_or(AuthError::PolicyUnavailable)?;
                Ok(RawBinding { member, title: b.title.clone(), expression: b.expression.clone() })
            })
            .collect()
    }

    fn reload(&self) {
        self.reload_from_disk();
    }
}

impl WorkspaceReader for FilePolicySource {
    fn members_of_group(&self, group: &str) -> Result<Vec<String>, AuthError> {
        let contents = self.contents.read().unwrap_or_else(|e| e.into_inner());
        Ok(contents.groups.get(group).cloned().unwrap_or_default())
    }
}

/// Empty policy source for configurations with no policy file — every
/// principal is simply not authorized, which is the safe default.
pub struct EmptyPolicySource;

impl PolicyReader for EmptyPolicySource {
    fn bindings_for_role_in_project(
        &self,
        _role: &str,
        _project: &str,
    ) -> Result<Vec<RawBinding>, AuthError> {
        Ok(Vec::new())
    }
}

impl WorkspaceReader for EmptyPolicySource {
    fn members_of_group(&self, _group: &str) -> Result<Vec<String>, AuthError> {
        Ok(Vec::new())
    }
}

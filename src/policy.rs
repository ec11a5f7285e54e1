//! PolicyProjection (C4): background-refreshed map of principal -> ordered
//! role bindings, with transitive group expansion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::error::AuthError;

/// `{principal, role, title, expression?}`. Absence of `expression` means
/// unconditional.
#[derive(Clone, Debug)]
pub struct RoleBinding {
    pub principal: String,
    pub role: String,
    pub title: String,
    pub expression: Option<String>,
}

/// A single raw binding as returned by the policy reader, before group
/// expansion: `member` may be a direct principal or a group reference.
#[derive(Clone, Debug)]
pub struct RawBinding {
    pub member: Member,
    pub title: String,
    pub expression: Option<String>,
}

#[derive(Clone, Debug)]
pub enum Member {
    Principal(String),
    Group(String),
}

/// `MembersOfGroup(group) -> transitive member set`. External collaborator;
/// production wiring supplies an implementation backed by the workspace
/// directory API.
pub trait WorkspaceReader: Send + Sync {
    fn members_of_group(&self, group: &str) -> Result<Vec<String>, AuthError>;
}

/// `BindingsForRoleInProject(role, project) -> raw bindings`. External
/// collaborator; production wiring supplies an implementation backed by the
/// IAM policy API.
pub trait PolicyReader: Send + Sync {
    fn bindings_for_role_in_project(
        &self,
        role: &str,
        project: &str,
    ) -> Result<Vec<RawBinding>, AuthError>;

    /// Pulls in any out-of-band changes before the next build, on the same
    /// cadence as `PolicyProjection::refresh`. A no-op for readers backed by
    /// a live API that already reflects the current state on every call;
    /// file-backed readers override this to re-read from disk.
    fn reload(&self) {}
}

type Snapshot = HashMap<String, Vec<RoleBinding>>;

pub struct PolicyProjection {
    role: String,
    project: String,
    policy_reader: Arc<dyn PolicyReader>,
    workspace_reader: Arc<dyn WorkspaceReader>,
    snapshot: ArcSwap<Option<Snapshot>>,
    refresh_failed: AtomicBool,
}

impl PolicyProjection {
    pub fn new(
        role: String,
        project: String,
        policy_reader: Arc<dyn PolicyReader>,
        workspace_reader: Arc<dyn WorkspaceReader>,
    ) -> Self {
        Self {
            role,
            project,
            policy_reader,
            workspace_reader,
            snapshot: ArcSwap::from_pointee(None),
            refresh_failed: AtomicBool::new(false),
        }
    }

    /// Enumerates bindings, expands groups, and atomically replaces the
    /// current snapshot. Build errors do not invalidate the existing
    /// snapshot — it continues to serve while the failure is logged.
    pub fn refresh(&self) {
        match self.build() {
            Ok(snapshot) => {
                self.refresh_failed.store(false, Ordering::Relaxed);
                self.snapshot.store(Arc::new(Some(snapshot)));
                tracing::debug!("policy projection refreshed");
            }
            Err(err) => {
                self.refresh_failed.store(true, Ordering::Relaxed);
                tracing::warn!(error = %err, "policy projection refresh failed, retaining previous snapshot");
            }
        }
    }

    fn build(&self) -> Result<Snapshot, AuthError> {
        self.policy_reader.reload();
        let raw_bindings =
            self.policy_reader.bindings_for_role_in_project(&self.role, &self.project)?;
        let mut snapshot: Snapshot = HashMap::new();
        for raw in raw_bindings {
            match raw.member {
                Member::Principal(principal) => {
                    snapshot.entry(principal.clone()).or_default().push(RoleBinding {
                        principal,
                        role: self.role.clone(),
                        title: raw.title.clone(),
                        expression: raw.expression.clone(),
                    });
                }
                Member::Group(group) => {
                    let members = self.workspace_reader.members_of_group(&group)?;
                    for principal in members {
                        snapshot.entry(principal.clone()).or_default().push(RoleBinding {
                            principal,
                            role: self.role.clone(),
                            title: raw.title.clone(),
                            expression: raw.expression.clone(),
                        });
                    }
                }
            }
        }
        Ok(snapshot)
    }

    /// `BindingsFor(principal) -> bindings | not-authorized`. Cold start
    /// with no successful build ever completed surfaces `PolicyUnavailable`.
    pub fn bindings_for(&self, principal: &str) -> Result<Vec<RoleBinding>, AuthError> {
        let snapshot = self.snapshot.load();
        match snapshot.as_ref() {
            None => Err(AuthError::PolicyUnavailable),
            Some(map) => match map.get(principal) {
                Some(bindings) => Ok(bindings.clone()),
                None => Err(AuthError::NotAuthorized { principal: principal.to_string() }),
            },
        }
    }
}

/// Spawns the periodic policy refresh thread, stopped by setting `stop`.
pub fn spawn_refresher(
    projection: Arc<PolicyProjection>,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        projection.refresh();
        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(interval);
            if stop.load(Ordering::Relaxed) {
                break;
            }
            projection.refresh();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPolicyReader(Vec<RawBinding>);
    impl PolicyReader for FixedPolicyReader {
        fn bindings_for_role_in_project(
            &self,
            _role: &str,
            _project: &str,
        ) -> Result<Vec<RawBinding>, AuthError> {
            Ok(self.0.clone())
        }
    }

    struct FixedWorkspaceReader(HashMap<String, Vec<String>>);
    impl WorkspaceReader for FixedWorkspaceReader {
        fn members_of_group(&self, group: &str) -> Result<Vec<String>, AuthError> {
            Ok(self.0.get(group).cloned().unwrap_or_default())
        }
    }

    #[test]
    fn cold_start_without_refresh_is_unavailable() {
        let projection = PolicyProjection::new(
            "httpsResourceAccessor".into(),
            "proj".into(),
            Arc::new(FixedPolicyReader(vec![])),
            Arc::new(FixedWorkspaceReader(HashMap::new())),
        );
        assert!(matches!(
            projection.bindings_for("svc@p.iam"),
            Err(AuthError::PolicyUnavailable)
        ));
    }

    #[test]
    fn group_membership_is_flattened_into_principal_map() {
        let mut groups = HashMap::new();
        groups.insert("group-a".to_string(), vec!["svc@p.iam".to_string()]);
        let projection = PolicyProjection::new(
            "httpsResourceAccessor".into(),
            "proj".into(),
            Arc::new(FixedPolicyReader(vec![RawBinding {
                member: Member::Group("group-a".into()),
                title: "t".into(),
                expression: None,
            }])),
            Arc::new(FixedWorkspaceReader(groups)),
        );
        projection.refresh();
        let bindings = projection.bindings_for("svc@p.iam").unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].title, "t");
    }

    #[test]
    fn failed_refresh_retains_previous_snapshot() {
        struct FlakyReader(std::sync::atomic::AtomicUsize);
        impl PolicyReader for FlakyReader {
            fn bindings_for_role_in_project(
                &self,
                _role: &str,
                _project: &str,
            ) -> Result<Vec<RawBinding>, AuthError> {
                let n = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n == 0 {
                    Ok(vec![RawBinding {
                        member: Member::Principal("svc@p.iam".into()),
                        title: "t".into(),
                        expression: None,
                    }])
                } else {
                    Err(AuthError::PolicyUnavailable)
                }
            }
        }
        let projection = PolicyProjection::new(
            "httpsResourceAccessor".into(),
            "proj".into(),
            Arc::new(FlakyReader(std::sync::atomic::AtomicUsize::new(0))),
            Arc::new(FixedWorkspaceReader(HashMap::new())),
        );
        projection.refresh();
        projection.refresh();
        assert!(projection.bindings_for("svc@p.iam").is_ok());
    }
}

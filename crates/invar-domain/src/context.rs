/// Identity attached to every request after token resolution, and to the
/// reconciler's administrative loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub roles: Vec<String>,
}

impl Context {
    /// An administrative context for internal callers (reconciler, importer).
    pub fn admin() -> Self {
        Self {
            user_id: None,
            project_id: None,
            roles: vec!["admin".to_string()],
        }
    }

    pub fn for_project(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            project_id: Some(project_id.into()),
            roles: vec!["member".to_string()],
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }

    /// Whether this context may act on resources owned by `project_id`.
    pub fn authorized_for(&self, project_id: &str) -> bool {
        self.is_admin() || self.project_id.as_deref() == Some(project_id)
    }
}

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Coordinator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Coordinator => "coordinator",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "coordinator" => Ok(Role::Coordinator),
            other => Err(AppError::validation(format!(
                "role must be one of: admin, teacher, coordinator (got '{other}')"
            ))),
        }
    }
}

/// Who is calling, as carried in a verified session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub assigned_class: Option<String>,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> AppResult<()> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Teacher | Role::Coordinator => Err(AppError::forbidden("admin role required")),
        }
    }

    /// Subjects and class-subject assignment.
    pub fn require_catalogue_manager(&self) -> AppResult<()> {
        match self.role {
            Role::Admin | Role::Coordinator => Ok(()),
            Role::Teacher => Err(AppError::forbidden("admin or coordinator role required")),
        }
    }

    pub fn may_read_class(&self, class_name: &str) -> bool {
        match self.role {
            Role::Admin | Role::Coordinator => true,
            Role::Teacher => self.owns_class(class_name),
        }
    }

    pub fn may_write_class(&self, class_name: &str) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Teacher | Role::Coordinator => self.owns_class(class_name),
        }
    }

    pub fn check_read_class(&self, class_name: &str) -> AppResult<()> {
        if self.may_read_class(class_name) {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "not permitted to view class {class_name}"
            )))
        }
    }

    pub fn check_write_class(&self, class_name: &str) -> AppResult<()> {
        if self.may_write_class(class_name) {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "not permitted to modify class {class_name}"
            )))
        }
    }

    /// Class a list operation is confined to; `None` means every class.
    pub fn scoped_class(&self) -> Option<&str> {
        match self.role {
            Role::Admin => None,
            Role::Teacher | Role::Coordinator => Some(self.assigned_class.as_deref().unwrap_or("")),
        }
    }

    /// Class a read-only report is confined to; coordinators see every class.
    pub fn read_scope(&self) -> Option<&str> {
        match self.role {
            Role::Admin | Role::Coordinator => None,
            Role::Teacher => Some(self.assigned_class.as_deref().unwrap_or("")),
        }
    }

    fn owns_class(&self, class_name: &str) -> bool {
        self.assigned_class
            .as_deref()
            .map(|c| !c.is_empty() && c == class_name)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn who(role: Role, class: Option<&str>) -> Identity {
        Identity {
            user_id: "u1".to_string(),
            username: "someone".to_string(),
            role,
            assigned_class: class.map(|c| c.to_string()),
        }
    }

    #[test]
    fn teacher_is_confined_to_assigned_class() {
        let t = who(Role::Teacher, Some("10A"));
        assert!(t.may_write_class("10A"));
        assert!(!t.may_write_class("10B"));
        assert!(!t.may_read_class("10B"));
        assert!(t.require_admin().is_err());
        assert_eq!(t.scoped_class(), Some("10A"));
    }

    #[test]
    fn coordinator_reads_all_but_writes_own() {
        let c = who(Role::Coordinator, Some("11S"));
        assert!(c.may_read_class("10B"));
        assert!(!c.may_write_class("10B"));
        assert!(c.may_write_class("11S"));
        assert!(c.require_catalogue_manager().is_ok());
    }

    #[test]
    fn unassigned_teacher_writes_nothing() {
        let t = who(Role::Teacher, None);
        assert!(!t.may_write_class(""));
        assert!(!t.may_write_class("10A"));
    }

    #[test]
    fn role_parse_is_closed() {
        assert_eq!(Role::parse("Admin").expect("role"), Role::Admin);
        assert!(Role::parse("principal").is_err());
    }
}

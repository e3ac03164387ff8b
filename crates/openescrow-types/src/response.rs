//! Request caller identity and the response envelope returned at the
//! call boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Actor, ErrorCategory, EscrowError, Result, UserId, constants};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

/// An authenticated caller, as supplied by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    #[must_use]
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }

    #[must_use]
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Fail with `Forbidden` unless the caller is an admin.
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(EscrowError::Forbidden {
                reason: "admin role required".to_string(),
            })
        }
    }

    #[must_use]
    pub fn actor(&self) -> Actor {
        match self.role {
            Role::User => Actor::User(self.user_id),
            Role::Admin => Actor::Admin(self.user_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub retryable: bool,
}

impl From<&EscrowError> for ErrorBody {
    fn from(err: &EscrowError) -> Self {
        Self {
            code: format!("ESC_ERR_{}", err.code()),
            category: err.category(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// `{success, data | error, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    #[must_use]
    pub fn ok(data: T, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp,
        }
    }

    #[must_use]
    pub fn err(error: &EscrowError, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            timestamp,
        }
    }

    #[must_use]
    pub fn from_result(result: Result<T>, timestamp: DateTime<Utc>) -> Self {
        match result {
            Ok(data) => Self::ok(data, timestamp),
            Err(err) => Self::err(&err, timestamp),
        }
    }
}

/// One page of a newest-first listing. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

impl<T> Page<T> {
    /// Cut page `page` out of `items`. A zero page size selects the default;
    /// sizes above the maximum are clamped.
    #[must_use]
    pub fn paginate(items: Vec<T>, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = match page_size {
            0 => constants::DEFAULT_PAGE_SIZE,
            n => n.min(constants::MAX_PAGE_SIZE),
        };
        let total = items.len();
        let items = items
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();
        Self {
            items,
            total,
            page,
            page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_shape() {
        let resp: ApiResponse<()> = ApiResponse::err(&EscrowError::UserSuspended, Utc::now());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "ESC_ERR_600");
        assert_eq!(json["error"]["category"], "risk");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn ok_envelope_shape() {
        let resp = ApiResponse::ok(42u32, Utc::now());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 42);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn pagination() {
        let page = Page::paginate((1..=45).collect::<Vec<_>>(), 3, 20);
        assert_eq!(page.items, (41..=45).collect::<Vec<_>>());
        assert_eq!(page.total, 45);
        let page = Page::paginate(vec![1, 2, 3], 0, 0);
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, constants::DEFAULT_PAGE_SIZE);
        assert_eq!(Page::paginate(vec![1], 1, 10_000).page_size, constants::MAX_PAGE_SIZE);
    }

    #[test]
    fn require_admin() {
        assert!(Caller::admin(UserId::new()).require_admin().is_ok());
        let err = Caller::user(UserId::new()).require_admin().unwrap_err();
        assert!(matches!(err, EscrowError::Forbidden { .. }));
    }
}

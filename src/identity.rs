//! Identity provider interface and the in-memory implementation.
//!
//! The provider only ever sees derived credentials (see
//! [`crate::auth::derive_credential`]), never a raw password.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Result of a successful credential check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub uid: String,
    pub email_verified: bool,
}

/// Identity provider errors
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("email already registered")]
    EmailExists,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user not found")]
    UserNotFound,

    #[error("invalid or expired action code")]
    InvalidCode,

    #[error("identity provider request failed: {0}")]
    Remote(String),
}

/// External identity service
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account and return its UID
    async fn create_user(&self, email: &str, credential: &str) -> Result<String, IdentityError>;

    /// Check an email/credential pair
    async fn authenticate(&self, email: &str, credential: &str)
        -> Result<Authenticated, IdentityError>;

    /// Remove an account
    async fn delete_user(&self, uid: &str) -> Result<(), IdentityError>;

    /// Generate an email verification link
    async fn verification_link(&self, email: &str) -> Result<String, IdentityError>;

    /// Generate a password reset link
    async fn password_reset_link(&self, email: &str) -> Result<String, IdentityError>;

    /// Email of the account a reset code belongs to; the code stays usable
    async fn reset_code_email(&self, code: &str) -> Result<String, IdentityError>;

    /// Complete a password reset started by a reset link
    async fn confirm_password_reset(&self, code: &str, credential: &str)
        -> Result<(), IdentityError>;
}

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    credential: String,
    email_verified: bool,
}

/// Identity provider held in process memory (development and tests)
#[derive(Clone)]
pub struct MemoryIdentity {
    /// Accounts by lowercased email
    accounts: Arc<DashMap<String, Account>>,
    /// Outstanding action codes: code -> (email, purpose)
    codes: Arc<DashMap<String, (String, CodePurpose)>>,
    action_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodePurpose {
    VerifyEmail,
    PasswordReset,
}

impl MemoryIdentity {
    pub fn new(action_url: impl Into<String>) -> Self {
        Self {
            accounts: Arc::new(DashMap::new()),
            codes: Arc::new(DashMap::new()),
            action_url: action_url.into(),
        }
    }

    /// Mark an account's email as verified
    pub fn mark_verified(&self, email: &str) -> bool {
        self.accounts
            .get_mut(&normalize(email))
            .map(|mut account| account.email_verified = true)
            .is_some()
    }

    /// Apply a verification code (what the hosted link does)
    pub fn apply_verification(&self, code: &str) -> Result<(), IdentityError> {
        let (_, (email, purpose)) = self.codes.remove(code).ok_or(IdentityError::InvalidCode)?;
        if purpose != CodePurpose::VerifyEmail || !self.mark_verified(&email) {
            return Err(IdentityError::InvalidCode);
        }
        Ok(())
    }

    /// Stored credential for an email (lets tests assert what was sent)
    pub fn stored_credential(&self, email: &str) -> Option<String> {
        self.accounts
            .get(&normalize(email))
            .map(|account| account.credential.clone())
    }

    /// Number of accounts
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn issue_code(&self, email: &str, purpose: CodePurpose) -> Result<String, IdentityError> {
        let email = normalize(email);
        if !self.accounts.contains_key(&email) {
            return Err(IdentityError::UserNotFound);
        }
        let code = Uuid::new_v4().simple().to_string();
        self.codes.insert(code.clone(), (email, purpose));
        let mode = match purpose {
            CodePurpose::VerifyEmail => "verifyEmail",
            CodePurpose::PasswordReset => "resetPassword",
        };
        Ok(format!(
            "{}/__/auth/action?mode={mode}&oobCode={code}",
            self.action_url.trim_end_matches('/')
        ))
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn create_user(&self, email: &str, credential: &str) -> Result<String, IdentityError> {
        match self.accounts.entry(normalize(email)) {
            Entry::Occupied(_) => Err(IdentityError::EmailExists),
            Entry::Vacant(slot) => {
                let uid = Uuid::new_v4().simple().to_string();
                slot.insert(Account {
                    uid: uid.clone(),
                    credential: credential.to_string(),
                    email_verified: false,
                });
                Ok(uid)
            }
        }
    }

    async fn authenticate(
        &self,
        email: &str,
        credential: &str,
    ) -> Result<Authenticated, IdentityError> {
        let account = self
            .accounts
            .get(&normalize(email))
            .ok_or(IdentityError::InvalidCredentials)?;
        if account.credential != credential {
            return Err(IdentityError::InvalidCredentials);
        }
        Ok(Authenticated {
            uid: account.uid.clone(),
            email_verified: account.email_verified,
        })
    }

    async fn delete_user(&self, uid: &str) -> Result<(), IdentityError> {
        let email = self
            .accounts
            .iter()
            .find(|entry| entry.uid == uid)
            .map(|entry| entry.key().clone())
            .ok_or(IdentityError::UserNotFound)?;
        self.accounts.remove(&email);
        self.codes.retain(|_, (code_email, _)| *code_email != email);
        Ok(())
    }

    async fn verification_link(&self, email: &str) -> Result<String, IdentityError> {
        self.issue_code(email, CodePurpose::VerifyEmail)
    }

    async fn password_reset_link(&self, email: &str) -> Result<String, IdentityError> {
        self.issue_code(email, CodePurpose::PasswordReset)
    }

    async fn reset_code_email(&self, code: &str) -> Result<String, IdentityError> {
        match self.codes.get(code).as_deref() {
            Some((email, CodePurpose::PasswordReset)) => Ok(email.clone()),
            _ => Err(IdentityError::InvalidCode),
        }
    }

    async fn confirm_password_reset(
        &self,
        code: &str,
        credential: &str,
    ) -> Result<(), IdentityError> {
        let (_, (email, purpose)) = self.codes.remove(code).ok_or(IdentityError::InvalidCode)?;
        if purpose != CodePurpose::PasswordReset {
            return Err(IdentityError::InvalidCode);
        }
        let mut account = self
            .accounts
            .get_mut(&email)
            .ok_or(IdentityError::InvalidCode)?;
        account.credential = credential.to_string();
        Ok(())
    }
}

/// Extract the `oobCode` query parameter from an action link
pub fn action_code(link: &str) -> Option<&str> {
    let query = link.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "oobCode")
        .map(|(_, v)| v)
}

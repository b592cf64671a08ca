use super::{http_client, AccessToken};
use crate::config::Config;
use crate::identity::{Authenticated, IdentityError, IdentityProvider};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Identity Toolkit REST client.
///
/// Public endpoints are keyed with the web API key; admin endpoints
/// (account deletion, action links) use the service bearer token.
pub struct IdentityToolkit {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    project_id: Option<String>,
    access_token: Option<AccessToken>,
    action_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    local_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    id_token: String,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    #[serde(default)]
    email_verified: bool,
}

#[derive(Deserialize)]
struct ResetCodeResponse {
    email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OobResponse {
    oob_link: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Map a provider error message (e.g. `WEAK_PASSWORD : ...`) to an error
fn classify(message: &str) -> IdentityError {
    let code = message.split([' ', ':']).next().unwrap_or(message);
    match code {
        "EMAIL_EXISTS" => IdentityError::EmailExists,
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "USER_DISABLED" => {
            IdentityError::InvalidCredentials
        }
        "USER_NOT_FOUND" => IdentityError::UserNotFound,
        "INVALID_OOB_CODE" | "EXPIRED_OOB_CODE" => IdentityError::InvalidCode,
        _ => IdentityError::Remote(message.to_string()),
    }
}

impl IdentityToolkit {
    pub fn new(api_key: String, config: &Config) -> Self {
        Self {
            http: http_client(config.remote_timeout),
            base_url: config.identity_base_url.trim_end_matches('/').to_string(),
            api_key,
            project_id: config.firebase_project_id.clone(),
            access_token: AccessToken::from_config(config),
            action_url: config.action_url.clone(),
        }
    }

    async fn public_call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: Value,
    ) -> Result<T, IdentityError> {
        let url = format!("{}/{method}", self.base_url);
        let request = self
            .http
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body);
        Self::decode(request.send().await).await
    }

    async fn admin_call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: Value,
    ) -> Result<T, IdentityError> {
        let url = match &self.project_id {
            Some(project) => format!("{}/projects/{project}/{method}", self.base_url),
            None => format!("{}/{method}", self.base_url),
        };
        let mut request = self.http.post(url).json(&body);
        if let Some(source) = &self.access_token {
            let token = source
                .current()
                .await
                .map_err(|e| IdentityError::Remote(e.to_string()))?;
            request = request.bearer_auth(token);
        }
        Self::decode(request.send().await).await
    }

    async fn decode<T: DeserializeOwned>(
        sent: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<T, IdentityError> {
        let response = sent.map_err(|e| IdentityError::Remote(e.to_string()))?;
        if response.status().is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| IdentityError::Remote(e.to_string()));
        }

        let status = response.status();
        match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => Err(classify(&envelope.error.message)),
            Err(_) => Err(IdentityError::Remote(format!("identity provider answered {status}"))),
        }
    }

    async fn oob_link(&self, request_type: &str, email: &str) -> Result<String, IdentityError> {
        let response: OobResponse = self
            .admin_call(
                "accounts:sendOobCode",
                json!({
                    "requestType": request_type,
                    "email": email,
                    "returnOobLink": true,
                    "continueUrl": self.action_url,
                    "canHandleCodeInApp": true,
                }),
            )
            .await
            .map_err(|e| match e {
                IdentityError::InvalidCredentials => IdentityError::UserNotFound,
                other => other,
            })?;
        Ok(response.oob_link)
    }
}

#[async_trait]
impl IdentityProvider for IdentityToolkit {
    async fn create_user(&self, email: &str, credential: &str) -> Result<String, IdentityError> {
        let response: SignUpResponse = self
            .public_call(
                "accounts:signUp",
                json!({"email": email, "password": credential, "returnSecureToken": false}),
            )
            .await?;
        debug!("Identity record created");
        Ok(response.local_id)
    }

    async fn authenticate(
        &self,
        email: &str,
        credential: &str,
    ) -> Result<Authenticated, IdentityError> {
        let session: SignInResponse = self
            .public_call(
                "accounts:signInWithPassword",
                json!({"email": email, "password": credential, "returnSecureToken": true}),
            )
            .await?;
        let lookup: LookupResponse = self
            .public_call("accounts:lookup", json!({"idToken": session.id_token}))
            .await?;
        Ok(Authenticated {
            uid: session.local_id,
            email_verified: lookup.users.first().is_some_and(|u| u.email_verified),
        })
    }

    async fn delete_user(&self, uid: &str) -> Result<(), IdentityError> {
        let _: Value = self
            .admin_call("accounts:delete", json!({"localId": uid}))
            .await?;
        Ok(())
    }

    async fn verification_link(&self, email: &str) -> Result<String, IdentityError> {
        self.oob_link("VERIFY_EMAIL", email).await
    }

    async fn password_reset_link(&self, email: &str) -> Result<String, IdentityError> {
        self.oob_link("PASSWORD_RESET", email).await
    }

    async fn reset_code_email(&self, code: &str) -> Result<String, IdentityError> {
        // Without `newPassword` the endpoint only reports the code's account
        let response: ResetCodeResponse = self
            .public_call("accounts:resetPassword", json!({"oobCode": code}))
            .await?;
        Ok(response.email)
    }

    async fn confirm_password_reset(
        &self,
        code: &str,
        credential: &str,
    ) -> Result<(), IdentityError> {
        let _: Value = self
            .public_call(
                "accounts:resetPassword",
                json!({"oobCode": code, "newPassword": credential}),
            )
            .await?;
        Ok(())
    }
}

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;
use uuid::Uuid;

pub const DEFAULT_API_BASE_URL: &str = "https://api-stage.acroplia.com/api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid email")]
    InvalidEmail,
    #[error("invalid phone")]
    InvalidPhone,
    #[error("invalid username")]
    InvalidUsername,
    #[error("textpad title can't be empty")]
    EmptyTitle,
    #[error("message was sent but the server reported an internal error")]
    MessageInternal,
    #[error("request failed with status code {code} {text}")]
    Status { code: u16, text: String },
    #[error("no internet connection")]
    NoConnection,
}

fn status_error(status: StatusCode) -> ApiError {
    ApiError::Status {
        code: status.as_u16(),
        text: status.canonical_reason().unwrap_or("").to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
enum IdentifierKind {
    Email,
    Phone,
    Username,
}

impl IdentifierKind {
    fn invalid(self) -> ApiError {
        match self {
            IdentifierKind::Email => ApiError::InvalidEmail,
            IdentifierKind::Phone => ApiError::InvalidPhone,
            IdentifierKind::Username => ApiError::InvalidUsername,
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: String) -> Result<Self, ApiError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)?;
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { base_url, http })
    }

    pub async fn login_by_email(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let body = SignInRequest {
            email: Some(email),
            ..SignInRequest::with_password(password)
        };
        self.login("/v1/users/sessions", &body, IdentifierKind::Email).await
    }

    pub async fn login_by_phone(&self, phone: &str, password: &str) -> Result<Session, ApiError> {
        let body = SignInRequest {
            phone: Some(phone),
            ..SignInRequest::with_password(password)
        };
        self.login("/v1/users/sessions/phone", &body, IdentifierKind::Phone)
            .await
    }

    pub async fn login_by_username(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Session, ApiError> {
        let body = SignInRequest {
            username: Some(username),
            ..SignInRequest::with_password(password)
        };
        self.login("/v1/users/sessions/username", &body, IdentifierKind::Username)
            .await
    }

    async fn login(
        &self,
        path: &str,
        body: &SignInRequest<'_>,
        kind: IdentifierKind,
    ) -> Result<Session, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "sending login request");
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(kind.invalid());
        }
        if !status.is_success() {
            return Err(status_error(status));
        }
        let envelope: Envelope<Session> = response.json().await?;
        Ok(envelope.data)
    }

    /// Posts a chat message into the given chat.
    ///
    /// The service is known to answer 500 for messages that were in fact
    /// delivered; that case maps to the dedicated `MessageInternal` error so
    /// callers can report it distinctly instead of as a generic failure.
    pub async fn send_message(
        &self,
        message: &Message,
        chat_uuid: &str,
        token: &str,
    ) -> Result<Message, ApiError> {
        let url = format!("{}/v1/workspaces/{}/chat", self.base_url, chat_uuid);
        debug!(%url, "sending chat message");
        let response = self
            .http
            .post(url)
            .header("X-Auth-Token", token)
            .json(message)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            return Err(ApiError::MessageInternal);
        }
        if !status.is_success() {
            return Err(status_error(status));
        }
        let envelope: Envelope<Message> = response.json().await?;
        Ok(envelope.data)
    }

    /// Creates a textpad in the owner's library. Rejects an empty title
    /// before any request goes out.
    pub async fn create_textpad(&self, textpad: &Textpad, token: &str) -> Result<Textpad, ApiError> {
        if textpad.title.trim().is_empty() {
            return Err(ApiError::EmptyTitle);
        }
        let url = format!("{}/v1/library/{}", self.base_url, textpad.owner);
        debug!(%url, "creating textpad");
        let response = self
            .http
            .post(url)
            .header("X-Auth-Token", token)
            .json(textpad)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }
        let envelope: Envelope<Textpad> = response.json().await?;
        Ok(envelope.data)
    }

    /// Pre-flight reachability probe run before any command touches the
    /// service. Any failure collapses into a single environment error.
    pub async fn check_reachable(&self, probe_url: &str) -> Result<(), ApiError> {
        let response = self.http.get(probe_url).send().await.map_err(|err| {
            debug!(%err, "reachability probe failed");
            ApiError::NoConnection
        })?;
        if !response.status().is_success() {
            return Err(ApiError::NoConnection);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Default)]
struct SignInRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    password: &'a str,
}

impl<'a> SignInRequest<'a> {
    fn with_password(password: &'a str) -> Self {
        Self {
            password,
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Authenticated credential bundle returned by a login call and persisted for
/// later message/textpad invocations. The client never refreshes it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: PrivateUser,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivateUser {
    pub uuid: String,
    pub id: i64,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub display_name: Option<String>,
    pub user_name: String,
    pub is_online: bool,
    pub is_guest: bool,
}

impl PrivateUser {
    /// Drops the private fields for inclusion in outgoing payloads.
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            uuid: self.uuid.clone(),
            online: self.is_online,
            user_name: self.user_name.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            guest: self.is_guest,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PublicUser {
    pub id: i64,
    pub uuid: String,
    pub online: bool,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub guest: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub status: String,
    #[serde(default)]
    pub user: PublicUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
}

impl Message {
    pub fn new(text: impl Into<String>, user: &PrivateUser) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            kind: "USER_TEXT".to_string(),
            text: text.into(),
            status: "SENDING".to_string(),
            user: user.to_public(),
            created_at: None,
            updated_at: None,
            attachments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Textpad {
    #[serde(rename = "type")]
    pub kind: String,
    pub uuid: String,
    pub title: String,
    pub sub_title: String,
    #[serde(default)]
    pub user: PublicUser,
    #[serde(default)]
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default)]
    pub delta: Delta,
}

impl Textpad {
    /// Builds a blank textpad: a single-newline delta body owned by `user`.
    pub fn new(title: impl Into<String>, subtitle: impl Into<String>, user: &PrivateUser) -> Self {
        Self {
            kind: "TEXTPAD".to_string(),
            uuid: Uuid::new_v4().to_string(),
            title: title.into(),
            sub_title: subtitle.into(),
            user: user.to_public(),
            owner: user.uuid.clone(),
            created_at: None,
            updated_at: None,
            version: None,
            delta: Delta {
                ops: vec![Op {
                    insert: "\n".to_string(),
                    attributes: None,
                }],
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Delta {
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Op {
    pub insert: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fixture_user() -> serde_json::Value {
        json!({
            "uuid": "7f1a9a2e-4f0b-4d0c-9a1e-2b7c8d3e5f60",
            "id": 42,
            "email": "ada@example.com",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "userName": "ada",
            "isOnline": true,
            "isGuest": false
        })
    }

    fn login_body() -> serde_json::Value {
        json!({
            "data": {
                "accessToken": "tok-123",
                "refreshToken": "ref-456",
                "user": fixture_user()
            }
        })
    }

    fn test_user() -> PrivateUser {
        PrivateUser {
            uuid: "7f1a9a2e-4f0b-4d0c-9a1e-2b7c8d3e5f60".to_string(),
            id: 42,
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            user_name: "ada".to_string(),
            ..PrivateUser::default()
        }
    }

    #[tokio::test]
    async fn login_by_email_returns_session_profile() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/users/sessions"))
            .and(body_partial_json(json!({"email": "ada@example.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_body()))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let session = api
            .login_by_email("ada@example.com", "secret")
            .await
            .unwrap();
        assert_eq!(session.access_token, "tok-123");
        assert_eq!(session.user.first_name, "Ada");
        assert_eq!(session.user.last_name, "Lovelace");
    }

    #[tokio::test]
    async fn login_by_phone_hits_phone_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/users/sessions/phone"))
            .and(body_partial_json(json!({"phone": "+15550100"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_body()))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let session = api.login_by_phone("+15550100", "secret").await.unwrap();
        assert_eq!(session.user.uuid, "7f1a9a2e-4f0b-4d0c-9a1e-2b7c8d3e5f60");
    }

    #[tokio::test]
    async fn login_by_username_hits_username_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/users/sessions/username"))
            .and(body_partial_json(json!({"username": "ada"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_body()))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let session = api.login_by_username("ada", "secret").await.unwrap();
        assert_eq!(session.refresh_token, "ref-456");
    }

    #[tokio::test]
    async fn unauthorized_login_maps_to_identifier_specific_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let err = api.login_by_email("x@y.z", "bad").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidEmail));
        let err = api.login_by_phone("+123456", "bad").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidPhone));
        let err = api.login_by_username("nobody", "bad").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidUsername));
    }

    #[tokio::test]
    async fn failed_login_keeps_status_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let err = api
            .login_by_email("ada@example.com", "secret")
            .await
            .unwrap_err();
        match err {
            ApiError::Status { code, text } => {
                assert_eq!(code, 503);
                assert_eq!(text, "Service Unavailable");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_message_posts_to_chat_with_auth_token() {
        let server = MockServer::start().await;
        let message = Message::new("hello", &test_user());
        Mock::given(method("POST"))
            .and(path("/v1/workspaces/chat-1/chat"))
            .and(header("x-auth-token", "tok-123"))
            .and(body_partial_json(json!({
                "type": "USER_TEXT",
                "status": "SENDING",
                "text": "hello"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "uuid": message.uuid,
                    "type": "USER_TEXT",
                    "text": "hello",
                    "status": "SENDING",
                    "user": test_user().to_public(),
                    "createdAt": 1700000000i64
                }
            })))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let sent = api.send_message(&message, "chat-1", "tok-123").await.unwrap();
        assert_eq!(sent.text, "hello");
        assert_eq!(sent.created_at, Some(1700000000));
    }

    #[tokio::test]
    async fn send_message_maps_internal_error_to_soft_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let message = Message::new("hello", &test_user());
        let err = api.send_message(&message, "chat-1", "tok").await.unwrap_err();
        assert!(matches!(err, ApiError::MessageInternal));
    }

    #[tokio::test]
    async fn send_message_other_statuses_are_generic_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let message = Message::new("hello", &test_user());
        let err = api.send_message(&message, "chat-1", "tok").await.unwrap_err();
        assert!(matches!(err, ApiError::Status { code: 404, .. }));
    }

    #[tokio::test]
    async fn create_textpad_posts_to_owner_library() {
        let server = MockServer::start().await;
        let textpad = Textpad::new("Notes", "", &test_user());
        Mock::given(method("POST"))
            .and(path("/v1/library/7f1a9a2e-4f0b-4d0c-9a1e-2b7c8d3e5f60"))
            .and(header("x-auth-token", "tok-123"))
            .and(body_partial_json(json!({
                "type": "TEXTPAD",
                "title": "Notes",
                "delta": {"ops": [{"insert": "\n"}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "uuid": textpad.uuid,
                    "type": "TEXTPAD",
                    "title": "Notes",
                    "subTitle": "",
                    "owner": textpad.owner,
                    "version": 1
                }
            })))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let created = api.create_textpad(&textpad, "tok-123").await.unwrap();
        assert_eq!(created.title, "Notes");
        assert_eq!(created.version, Some(1));
    }

    #[tokio::test]
    async fn empty_textpad_title_is_rejected_before_any_request() {
        let server = MockServer::start().await;
        let api = ApiClient::new(server.uri()).unwrap();
        let textpad = Textpad::new("  ", "", &test_user());
        let err = api.create_textpad(&textpad, "tok").await.unwrap_err();
        assert!(matches!(err, ApiError::EmptyTitle));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reachability_probe_accepts_ok_and_rejects_the_rest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let probe = format!("{}/login", server.uri());
        api.check_reachable(&probe).await.unwrap();

        let err = api
            .check_reachable("http://127.0.0.1:1/login")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NoConnection));
    }

    #[test]
    fn public_projection_strips_private_fields() {
        let mut user = test_user();
        user.email = Some("ada@example.com".to_string());
        user.phone = Some("+15550100".to_string());
        let public = user.to_public();
        let value = serde_json::to_value(&public).unwrap();
        assert!(value.get("email").is_none());
        assert!(value.get("phone").is_none());
        assert_eq!(value["userName"], "ada");
    }
}

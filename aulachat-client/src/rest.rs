//! Awaitable REST fallbacks for every realtime action.
//!
//! Unlike the realtime emits, these calls return errors to the caller:
//! a failed request is a [`ClientError`], never a silent drop.

use reqwest::multipart;
use serde::Serialize;
use serde_json::Value;
use shared::models::{
    Conversation, ConversationSettings, ConversationSummary, CreateConversationRequest, Message,
    MessagePage, TypingStatus, UnreadCount,
};
use url::Url;
use uuid::Uuid;

use crate::error::ClientError;

/// One file to attach to an outgoing message.
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// HTTP client for the `/api/messages` surface.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl RestClient {
    /// # Errors
    /// Returns an error when `base_url` cannot be parsed.
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(&format!("api/messages/{path}"))?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // Problem-details body when the server produced one, the raw
        // status otherwise.
        let message = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| body["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });

        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .http
            .get(self.endpoint(path)?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let response = self
            .http
            .post(self.endpoint(path)?)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// # Errors
    /// Returns transport or API errors.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        self.get_json("conversations").await
    }

    /// Finds or creates the conversation with `recipient_id`.
    ///
    /// # Errors
    /// Returns transport or API errors.
    pub async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation, ClientError> {
        self.post_json("conversations", request).await
    }

    /// # Errors
    /// Returns transport or API errors.
    pub async fn conversation(&self, conversation_id: Uuid) -> Result<Conversation, ClientError> {
        self.get_json(&format!("conversations/{conversation_id}")).await
    }

    /// One page of history, newest first, keyed on the `before_id`
    /// cursor.
    ///
    /// # Errors
    /// Returns transport or API errors.
    pub async fn messages(
        &self,
        conversation_id: Uuid,
        before_id: Option<Uuid>,
        limit: Option<i64>,
    ) -> Result<MessagePage, ClientError> {
        let mut url = self.endpoint(&format!("conversations/{conversation_id}/messages"))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(before_id) = before_id {
                query.append_pair("beforeId", &before_id.to_string());
            }
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
        }

        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Who is typing in the conversation right now, with expired
    /// indicators already filtered out server-side.
    ///
    /// # Errors
    /// Returns transport or API errors.
    pub async fn typing_in(&self, conversation_id: Uuid) -> Result<Vec<TypingStatus>, ClientError> {
        self.get_json(&format!("conversations/{conversation_id}/typing"))
            .await
    }

    /// Sends a message, optionally with file attachments. The realtime
    /// push of this message to the peer is a server side effect, not
    /// part of this call.
    ///
    /// # Errors
    /// Returns transport or API errors.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        body: &str,
        attachments: Vec<AttachmentUpload>,
    ) -> Result<Message, ClientError> {
        let mut form = multipart::Form::new().text("body", body.to_string());
        for attachment in attachments {
            let part = multipart::Part::bytes(attachment.bytes)
                .file_name(attachment.file_name)
                .mime_str(&attachment.mime_type)?;
            form = form.part("files", part);
        }

        let response = self
            .http
            .post(self.endpoint(&format!("conversations/{conversation_id}/messages"))?)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Awaitable variant of the mark-read realtime emit.
    ///
    /// # Errors
    /// Returns transport or API errors.
    pub async fn mark_read(&self, message_id: Uuid) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.endpoint(&format!("messages/{message_id}/read"))?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// # Errors
    /// Returns transport or API errors.
    pub async fn mark_conversation_read(&self, conversation_id: Uuid) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.endpoint(&format!("conversations/{conversation_id}/read"))?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// # Errors
    /// Returns transport or API errors.
    pub async fn set_archived(
        &self,
        conversation_id: Uuid,
        archived: bool,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.endpoint(&format!("conversations/{conversation_id}/archive"))?)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "archived": archived }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// # Errors
    /// Returns transport or API errors.
    pub async fn update_settings(
        &self,
        conversation_id: Uuid,
        settings: &ConversationSettings,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .patch(self.endpoint(&format!("conversations/{conversation_id}/settings"))?)
            .bearer_auth(&self.token)
            .json(settings)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// # Errors
    /// Returns transport or API errors.
    pub async fn unread_count(&self) -> Result<UnreadCount, ClientError> {
        self.get_json("unread-count").await
    }

    /// # Errors
    /// Returns transport or API errors.
    pub async fn search(&self, query: &str, limit: Option<i64>) -> Result<Vec<Message>, ClientError> {
        let mut url = self.endpoint("search")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query);
            if let Some(limit) = limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }

        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Downloads a stored attachment by its storage name.
    ///
    /// # Errors
    /// Returns transport or API errors.
    pub async fn fetch_attachment(&self, file_name: &str) -> Result<Vec<u8>, ClientError> {
        let response = self
            .http
            .get(self.endpoint(&format!("attachments/{file_name}"))?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_resolve_under_the_api_prefix() {
        let client = RestClient::new("http://localhost:3000/", "token").unwrap();
        let url = client.endpoint("unread-count").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/messages/unread-count");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            RestClient::new("not a url", "token"),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}

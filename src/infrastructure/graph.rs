//! Thin Microsoft Graph REST adapter. Each operation is a single REST call
//! with static payload shaping; authentication is an opaque bearer token
//! obtained out-of-band.

use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_BETA_URL: &str = "https://graph.microsoft.com/beta";

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Microsoft Graph request failed: {source}")]
    Request {
        #[source]
        source: reqwest::Error,
    },
}

impl From<reqwest::Error> for GraphError {
    fn from(source: reqwest::Error) -> Self {
        Self::Request { source }
    }
}

#[derive(Clone)]
pub struct GraphClient {
    base_url: String,
    beta_url: String,
    access_token: String,
    http: Client,
}

impl GraphClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_base_urls(access_token, DEFAULT_BASE_URL, DEFAULT_BETA_URL)
    }

    pub fn with_base_urls(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
        beta_url: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            beta_url: beta_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            http: Client::new(),
        }
    }

    /// Send an email via `/me/sendMail`.
    pub async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, GraphError> {
        let endpoint = format!("{}/me/sendMail", self.base_url);
        self.post(&endpoint, &email_payload(to_email, subject, body))
            .await?;
        info!(to = to_email, "Email sent via Microsoft Graph");
        Ok("Email sent successfully".to_string())
    }

    /// Forward a caller-assembled `sendMail` payload unchanged.
    pub async fn send_email_payload(&self, payload: &Value) -> Result<(), GraphError> {
        let endpoint = format!("{}/me/sendMail", self.base_url);
        self.post(&endpoint, payload).await?;
        Ok(())
    }

    /// Create a calendar event via `/me/events`; times are UTC.
    pub async fn create_event(
        &self,
        subject: &str,
        start_time: &str,
        end_time: &str,
        attendees: Option<&[String]>,
    ) -> Result<String, GraphError> {
        let endpoint = format!("{}/me/events", self.base_url);
        self.post(&endpoint, &event_payload(subject, start_time, end_time, attendees))
            .await?;
        Ok("Event created successfully".to_string())
    }

    /// Create a contact via `/me/contacts`.
    pub async fn create_contact(
        &self,
        display_name: &str,
        email: &str,
        phone: Option<&str>,
    ) -> Result<String, GraphError> {
        let endpoint = format!("{}/me/contacts", self.base_url);
        self.post(&endpoint, &contact_payload(display_name, email, phone))
            .await?;
        Ok("Contact created successfully".to_string())
    }

    /// Create a task in a specific task list.
    pub async fn create_task(
        &self,
        task_list_id: &str,
        title: &str,
        due_date: Option<&str>,
    ) -> Result<String, GraphError> {
        let endpoint = format!("{}/me/todo/lists/{task_list_id}/tasks", self.base_url);
        self.post(&endpoint, &task_payload(title, due_date)).await?;
        Ok("Task created successfully".to_string())
    }

    /// Retrieve recent mail messages, optionally narrowed by an OData
    /// `$filter` expression.
    pub async fn get_messages(&self, top: u32, filter: Option<&str>) -> Result<Value, GraphError> {
        let endpoint = format!("{}/me/messages", self.base_url);
        let mut query = vec![("$top", top.to_string())];
        if let Some(filter) = filter {
            query.push(("$filter", filter.to_string()));
        }
        self.get_with_query(&endpoint, &query).await
    }

    /// List the mailbox's folders.
    pub async fn list_folders(&self) -> Result<Value, GraphError> {
        let endpoint = format!("{}/me/mailFolders", self.base_url);
        self.get(&endpoint).await
    }

    /// List recent emails from a named folder.
    pub async fn list_emails(&self, folder: &str, limit: u32) -> Result<Value, GraphError> {
        let endpoint = format!(
            "{}/me/mailFolders/{folder}/messages?$top={limit}",
            self.base_url
        );
        self.get(&endpoint).await
    }

    /// List OneDrive root items.
    pub async fn list_drive_items(&self) -> Result<Value, GraphError> {
        let endpoint = format!("{}/me/drive/root/children", self.base_url);
        self.get(&endpoint).await
    }

    /// Retrieve the user profile. Profile details are only available on the
    /// beta endpoint.
    pub async fn get_user_profile(&self) -> Result<Value, GraphError> {
        let endpoint = format!("{}/me/profile", self.beta_url);
        self.get(&endpoint).await
    }

    async fn get(&self, endpoint: &str) -> Result<Value, GraphError> {
        self.get_with_query(endpoint, &[]).await
    }

    async fn get_with_query(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Value, GraphError> {
        debug!(endpoint, "Graph GET");
        let response = self
            .http
            .get(endpoint)
            .query(query)
            .bearer_auth(&self.access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }

    async fn post(&self, endpoint: &str, payload: &Value) -> Result<(), GraphError> {
        debug!(endpoint, "Graph POST");
        self.http
            .post(endpoint)
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn email_payload(to_email: &str, subject: &str, body: &str) -> Value {
    json!({
        "message": {
            "subject": subject,
            "body": {
                "contentType": "Text",
                "content": body
            },
            "toRecipients": [
                { "emailAddress": { "address": to_email } }
            ]
        }
    })
}

fn event_payload(
    subject: &str,
    start_time: &str,
    end_time: &str,
    attendees: Option<&[String]>,
) -> Value {
    let mut payload = json!({
        "subject": subject,
        "start": { "dateTime": start_time, "timeZone": "UTC" },
        "end": { "dateTime": end_time, "timeZone": "UTC" }
    });
    if let Some(attendees) = attendees {
        payload["attendees"] = attendees
            .iter()
            .map(|attendee| json!({ "emailAddress": { "address": attendee } }))
            .collect();
    }
    payload
}

fn contact_payload(display_name: &str, email: &str, phone: Option<&str>) -> Value {
    let mut payload = json!({
        "displayName": display_name,
        "emailAddresses": [ { "address": email } ]
    });
    if let Some(phone) = phone {
        payload["businessPhones"] = json!([phone]);
    }
    payload
}

fn task_payload(title: &str, due_date: Option<&str>) -> Value {
    let mut payload = json!({ "title": title });
    if let Some(due_date) = due_date {
        payload["dueDateTime"] = json!({ "dateTime": due_date, "timeZone": "UTC" });
    }
    payload
}

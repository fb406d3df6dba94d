use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded push notification.
///
/// Immutable once built; the only permitted change is attaching the display name of the
/// originating application, and only once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    id: i64,
    app_id: i64,
    title: String,
    body: String,
    priority: i64,
    timestamp: DateTime<Utc>,
    app_name: Option<String>,
}

impl NotificationMessage {
    pub fn new(
        id: i64,
        app_id: i64,
        title: impl Into<String>,
        body: impl Into<String>,
        priority: i64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            app_id,
            title: title.into(),
            body: body.into(),
            priority,
            timestamp,
            app_name: None,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn app_id(&self) -> i64 {
        self.app_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    /// Attach the resolved application name. Returns `false` if a name was already present.
    pub fn attach_app_name(&mut self, name: impl Into<String>) -> bool {
        if self.app_name.is_some() {
            return false;
        }
        self.app_name = Some(name.into());
        true
    }

    /// Display name, falling back to `App #<app_id>` when no name has been attached.
    pub fn display_app_name(&self) -> String {
        match &self.app_name {
            Some(name) => name.clone(),
            None => fallback_app_name(self.app_id),
        }
    }
}

pub fn fallback_app_name(app_id: i64) -> String {
    format!("App #{app_id}")
}

/// Inbound wire shape. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub(crate) struct WireMessage {
    #[serde(default)]
    pub(crate) id: Option<i64>,
    #[serde(default)]
    pub(crate) appid: i64,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) priority: Option<i64>,
    #[serde(default)]
    pub(crate) date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) appname: Option<String>,
}

impl WireMessage {
    /// `None` when the payload has no `id`, i.e. it is not a notification.
    pub(crate) fn into_message(self, received_at: DateTime<Utc>) -> Option<NotificationMessage> {
        let id = self.id?;
        let mut message = NotificationMessage::new(
            id,
            self.appid,
            self.title.unwrap_or_default(),
            self.message.unwrap_or_default(),
            self.priority.unwrap_or(0),
            self.date.unwrap_or(received_at),
        );
        if let Some(name) = self.appname.filter(|name| !name.is_empty()) {
            message.attach_app_name(name);
        }
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_attaches_once() {
        let mut msg = NotificationMessage::new(1, 7, "t", "b", 0, Utc::now());
        assert_eq!(msg.display_app_name(), "App #7");
        assert!(msg.attach_app_name("backups"));
        assert!(!msg.attach_app_name("other"));
        assert_eq!(msg.app_name(), Some("backups"));
    }
}

use serde::Serialize;

/// Account as seen from the communications side (read-only directory)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub role: String,
    pub email_notify: bool,
    pub is_active: bool,
}

impl UserAccount {
    /// "first last", or the username when both names are blank
    pub fn display_name(&self) -> String {
        display_name(&self.first_name, &self.last_name, &self.username)
    }

    /// Address to notify, if the account wants mail and has somewhere to send it
    pub fn notification_address(&self) -> Option<&str> {
        if !self.email_notify || !self.is_active {
            return None;
        }
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

pub fn display_name(first: &str, last: &str, username: &str) -> String {
    let full = format!("{} {}", first.trim(), last.trim());
    let full = full.trim();
    if full.is_empty() {
        username.to_string()
    } else {
        full.to_string()
    }
}

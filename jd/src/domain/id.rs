//! Domain ID generation
//!
//! Job IDs use the format: `{6-char-hex}-{kind}-{slug}`
//! Example: `019430-job-funds-march`

use tracing::debug;

/// Generate a domain ID from kind and title
pub fn generate_id(kind: &str, title: &str) -> String {
    debug!(%kind, %title, "generate_id: called");
    let uuid = uuid::Uuid::now_v7();
    let simple = uuid.simple().to_string();
    let hex_prefix = &simple[simple.len() - 6..];
    let slug = slugify(title);
    if slug.is_empty() {
        debug!("generate_id: empty slug, omitting");
        format!("{}-{}", hex_prefix, kind)
    } else {
        format!("{}-{}-{}", hex_prefix, kind, slug)
    }
}

/// Generate a task ID (plain UUIDv7, sortable by creation)
pub fn generate_task_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Slugify a title for use in IDs
fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c)
            } else if c == '\'' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-")
}

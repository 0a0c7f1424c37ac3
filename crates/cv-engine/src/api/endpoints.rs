//! API endpoint URL builders

use cv_common::ContentType;

/// Collection segment for a content type
pub fn collection_path(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Dashboard => "dashboards",
        ContentType::SavedQuery => "saved_queries",
        ContentType::Model => "models",
        ContentType::Explore => "explores",
        ContentType::Folder => "folders",
        ContentType::Collection => "collections",
        ContentType::User => "users",
        ContentType::Group => "groups",
        ContentType::Role => "roles",
        ContentType::PermissionSet => "permission_sets",
        ContentType::ModelSet => "model_sets",
        ContentType::ScheduledPlan => "scheduled_plans",
    }
}

/// Build the paginated list URL
pub fn list_url(base_url: &str, content_type: ContentType, offset: u64, limit: u64) -> String {
    format!(
        "{}?offset={}&limit={}",
        collection_url(base_url, content_type),
        offset,
        limit
    )
}

/// Build the create URL
pub fn collection_url(base_url: &str, content_type: ContentType) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        collection_path(content_type)
    )
}

/// Build the single-item URL used for updates
pub fn item_url(base_url: &str, content_type: ContentType, id: &str) -> String {
    format!("{}/{}", collection_url(base_url, content_type), id)
}

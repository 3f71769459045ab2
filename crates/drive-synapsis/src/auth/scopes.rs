//! OAuth scopes requested from Google for Drive, Docs, and Sheets access.

/// Identity scopes required for user identification.
pub const USERINFO_EMAIL_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.email";
pub const USERINFO_PROFILE_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.profile";
pub const OPENID_SCOPE: &str = "openid";

/// Google Drive scopes.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Google Docs scopes.
pub const DOCS_WRITE_SCOPE: &str = "https://www.googleapis.com/auth/documents";
pub const DOCS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/documents.readonly";

/// Google Sheets scopes.
pub const SHEETS_WRITE_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const SHEETS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";

const BASE_SCOPES: &[&str] = &[USERINFO_EMAIL_SCOPE, USERINFO_PROFILE_SCOPE, OPENID_SCOPE];

/// The full scope set requested by Drive Synapsis, deduplicated.
///
/// Full write access to Drive, Docs, and Sheets plus the identity scopes.
#[must_use]
pub fn scopes() -> Vec<String> {
    dedup([DRIVE_SCOPE, DOCS_WRITE_SCOPE, SHEETS_WRITE_SCOPE].iter().chain(BASE_SCOPES))
}

/// Minimal read-only scope set for low-privilege callers.
#[must_use]
pub fn read_only_scopes() -> Vec<String> {
    dedup(
        [DRIVE_READONLY_SCOPE, DOCS_READONLY_SCOPE, SHEETS_READONLY_SCOPE]
            .iter()
            .chain(BASE_SCOPES),
    )
}

fn dedup<'a>(scopes: impl Iterator<Item = &'a &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for scope in scopes {
        if !out.iter().any(|s| s == scope) {
            out.push((*scope).to_string());
        }
    }
    out
}

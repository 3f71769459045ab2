//! HTML pages rendered by the OAuth callback listener.

/// Render the page shown after a successful authorization.
///
/// The email is HTML-escaped to prevent XSS.
#[must_use]
pub fn render_success_page(user_email: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Authentication Successful</title>
<style>
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }}
.card {{ background: #fff; border-radius: 12px; box-shadow: 0 10px 40px rgba(0,0,0,0.2); padding: 40px; max-width: 400px; text-align: center; }}
.icon {{ font-size: 64px; margin-bottom: 20px; }}
h1 {{ font-size: 22px; margin: 0 0 10px; color: #333; }}
.email {{ color: #667eea; font-weight: bold; }}
p {{ color: #666; line-height: 1.6; }}
</style>
</head>
<body>
<div class="card">
<div class="icon">&#10004;</div>
<h1>Authentication Successful!</h1>
<p>You have successfully authenticated as:</p>
<p class="email">{email}</p>
<p>You can close this window and return to your application.</p>
</div>
</body>
</html>"#,
        email = html_escape(user_email),
    )
}

/// Render the page shown when authorization fails.
#[must_use]
pub fn render_error_page(error_message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Authentication Failed</title>
<style>
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: linear-gradient(135deg, #ff6b6b 0%, #ee5a5a 100%); margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }}
.card {{ background: #fff; border-radius: 12px; box-shadow: 0 10px 40px rgba(0,0,0,0.2); padding: 40px; max-width: 400px; text-align: center; }}
.icon {{ font-size: 64px; margin-bottom: 20px; }}
h1 {{ font-size: 22px; margin: 0 0 10px; color: #333; }}
.error {{ color: #ee5a5a; background: #fff5f5; padding: 15px; border-radius: 8px; margin: 20px 0; }}
p {{ color: #666; line-height: 1.6; }}
</style>
</head>
<body>
<div class="card">
<div class="icon">&#10060;</div>
<h1>Authentication Failed</h1>
<div class="error">{message}</div>
<p>Please try again or contact support if the issue persists.</p>
</div>
</body>
</html>"#,
        message = html_escape(error_message),
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

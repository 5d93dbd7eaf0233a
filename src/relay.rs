//! Popup relay for the federated sign-in flow.
//!
//! The provider redirects the popup here with `code` or `error` query
//! parameters. The rendered page POSTs the code to the JSON endpoint, then
//! hands `{type, user, token}` back to the window that opened the popup via
//! `postMessage`, scoped to the exact configured application origin. Without
//! an opener it falls back to a delayed redirect. Failure states render the
//! reason with an explicit Close button and never close on their own.

use axum::{
    extract::{Query, State},
    response::Html,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::state::AppState;

pub const AUTH_SUCCESS_MESSAGE_TYPE: &str = "FEDERATED_AUTH_SUCCESS";

const AUTH_ENDPOINT: &str = "/auth/google";

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/auth/google/callback", get(google_callback))
}

#[instrument(skip(state, params))]
pub async fn google_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Html<String> {
    if let Some(reason) = params.error {
        warn!(reason = %reason, "provider redirected with error");
        return Html(render_error_page(&format!("Sign-in was cancelled: {reason}")));
    }
    match params.code.as_deref() {
        Some(code) if !code.trim().is_empty() => {
            Html(render_relay_page(code, &state.config.app_origin))
        }
        _ => Html(render_error_page("Authorization code is required")),
    }
}

const RELAY_TEMPLATE: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Signing in</title>
<style>
  body { font-family: system-ui, sans-serif; display: flex; align-items: center;
         justify-content: center; height: 100vh; margin: 0; }
  #status { text-align: center; }
  button { margin-top: 1em; padding: 0.5em 1.5em; }
</style>
</head>
<body>
<div id="status"><p>Completing sign-in&hellip;</p></div>
<script>
(function () {
  var appOrigin = __APP_ORIGIN__;
  var code = __CODE__;
  var messageType = __MESSAGE_TYPE__;

  function showError(message) {
    var box = document.getElementById("status");
    box.innerHTML = "";
    var p = document.createElement("p");
    p.textContent = message;
    var button = document.createElement("button");
    button.textContent = "Close";
    button.onclick = function () { window.close(); };
    box.appendChild(p);
    box.appendChild(button);
  }

  fetch(__AUTH_ENDPOINT__, {
    method: "POST",
    headers: { "Content-Type": "application/json" },
    body: JSON.stringify({ code: code })
  })
    .then(function (res) {
      return res.json().then(function (body) { return { ok: res.ok, body: body }; });
    })
    .then(function (out) {
      if (!out.ok || !out.body.success) {
        showError(out.body && out.body.message ? out.body.message : "Sign-in failed");
        return;
      }
      if (window.opener && !window.opener.closed) {
        window.opener.postMessage(
          { type: messageType, user: out.body.user, token: out.body.token },
          appOrigin
        );
        window.close();
      } else {
        document.getElementById("status").innerHTML = "<p>Signed in. Redirecting&hellip;</p>";
        setTimeout(function () { window.location.assign(appOrigin); }, 1500);
      }
    })
    .catch(function () {
      showError("Could not reach the server. Please try again.");
    });
})();
</script>
</body>
</html>
"#;

const ERROR_TEMPLATE: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>Sign-in failed</title>
<style>
  body { font-family: system-ui, sans-serif; display: flex; align-items: center;
         justify-content: center; height: 100vh; margin: 0; }
  #status { text-align: center; }
  button { margin-top: 1em; padding: 0.5em 1.5em; }
</style>
</head>
<body>
<div id="status">
  <p>__MESSAGE__</p>
  <button onclick="window.close()">Close</button>
</div>
</body>
</html>
"#;

/// Values embedded into the script are JSON-encoded, then `<`, `>` and `&`
/// are escaped as `\uXXXX`. JSON alone leaves those characters intact, and a
/// literal `</script>` inside the string would close the script element at
/// the HTML-parsing level.
fn js_string(value: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

fn render_relay_page(code: &str, app_origin: &str) -> String {
    RELAY_TEMPLATE
        .replace("__APP_ORIGIN__", &js_string(app_origin))
        .replace("__CODE__", &js_string(code))
        .replace("__MESSAGE_TYPE__", &js_string(AUTH_SUCCESS_MESSAGE_TYPE))
        .replace("__AUTH_ENDPOINT__", &js_string(AUTH_ENDPOINT))
}

fn render_error_page(message: &str) -> String {
    ERROR_TEMPLATE.replace("__MESSAGE__", &html_escape(message))
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_page_targets_the_exact_app_origin() {
        let page = render_relay_page("abc123", "https://app.example.com");
        assert!(page.contains(r#"var appOrigin = "https://app.example.com";"#));
        assert!(page.contains(r#"var code = "abc123";"#));
        assert!(page.contains("FEDERATED_AUTH_SUCCESS"));
        // result is posted to the opener with the origin, never the wildcard
        assert!(!page.contains(r#""*""#));
    }

    #[test]
    fn relay_page_encodes_hostile_code() {
        let page = render_relay_page("</script><script>alert(1)", "https://app.example.com");
        assert!(!page.contains("</script><script>alert(1)"));
        // the payload stays inside the string literal as \uXXXX escapes
        assert!(page.contains(r#"var code = "\u003c/script\u003e\u003cscript\u003ealert(1)";"#));
    }

    #[test]
    fn error_page_escapes_message_and_never_auto_closes() {
        let page = render_error_page("<img src=x onerror=alert(1)>");
        assert!(page.contains("&lt;img src=x onerror=alert(1)&gt;"));
        assert!(page.contains("window.close()"));
        // no timers: the user must dismiss the failure themselves
        assert!(!page.contains("setTimeout"));
    }

    #[tokio::test]
    async fn callback_without_code_renders_the_error_state() {
        let state = crate::state::AppState::fake();
        let Html(page) = google_callback(
            State(state),
            Query(CallbackParams {
                code: None,
                error: None,
            }),
        )
        .await;
        assert!(page.contains("Authorization code is required"));
        assert!(!page.contains("fetch("));
    }

    #[tokio::test]
    async fn callback_with_provider_error_renders_the_reason() {
        let state = crate::state::AppState::fake();
        let Html(page) = google_callback(
            State(state),
            Query(CallbackParams {
                code: Some("abc123".to_string()),
                error: Some("access_denied".to_string()),
            }),
        )
        .await;
        assert!(page.contains("access_denied"));
        assert!(!page.contains("fetch("));
    }

    #[tokio::test]
    async fn callback_with_code_renders_the_relay() {
        let state = crate::state::AppState::fake();
        let Html(page) = google_callback(
            State(state),
            Query(CallbackParams {
                code: Some("abc123".to_string()),
                error: None,
            }),
        )
        .await;
        assert!(page.contains(r#"var code = "abc123";"#));
        assert!(page.contains("/auth/google"));
    }
}

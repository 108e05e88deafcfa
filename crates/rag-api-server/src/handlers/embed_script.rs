use axum::extract::Path;
use axum::http::header;
use axum::response::{IntoResponse, Response};

/// Serves the embeddable widget script, parameterized with the
/// caller's embed key so the snippet a customer pastes into their site
/// needs no further configuration. The script itself only ever talks
/// to the widget WebSocket transport — it carries no REST credentials.
pub async fn widget_script(Path(raw): Path<String>) -> Response {
    let key = raw.strip_suffix(".js").unwrap_or(&raw);
    let body = render_widget_script(key);
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        body,
    )
        .into_response()
}

fn render_widget_script(key: &str) -> String {
    format!(
        r#"(function () {{
  const EMBED_KEY = {key:?};
  const GREETINGS = [
    "Hi there! What can I help you find?",
    "Welcome — ask me anything about this site's docs.",
    "Hello! I can answer questions grounded in our knowledge base.",
  ];

  function pickGreeting() {{
    const storageKey = "rag_widget_greeting_index";
    let idx = parseInt(window.localStorage.getItem(storageKey) || "0", 10);
    if (Number.isNaN(idx)) idx = 0;
    const greeting = GREETINGS[idx % GREETINGS.length];
    window.localStorage.setItem(storageKey, String((idx + 1) % GREETINGS.length));
    return greeting;
  }}

  const root = document.createElement("div");
  root.id = "rag-widget-root";
  root.innerHTML =
    '<div class="rag-widget-log"></div>' +
    '<div class="rag-widget-typing" hidden>...</div>' +
    '<form class="rag-widget-form">' +
    '<input class="rag-widget-input" autocomplete="off" />' +
    '<button type="submit">Send</button>' +
    "</form>";
  document.body.appendChild(root);

  const log = root.querySelector(".rag-widget-log");
  const typingEl = root.querySelector(".rag-widget-typing");
  const form = root.querySelector(".rag-widget-form");
  const input = root.querySelector(".rag-widget-input");

  function appendBubble(role, text, sources) {{
    const bubble = document.createElement("div");
    bubble.className = "rag-widget-bubble rag-widget-bubble-" + role;
    bubble.textContent = text;
    if (sources && sources.length) {{
      const cites = document.createElement("div");
      cites.className = "rag-widget-sources";
      cites.textContent =
        "Sources: " +
        sources.map(function (s) {{ return "[" + s.index + "] " + s.document_title; }}).join(", ");
      bubble.appendChild(cites);
    }}
    log.appendChild(bubble);
    log.scrollTop = log.scrollHeight;
  }}

  appendBubble("assistant", pickGreeting(), null);

  const proto = window.location.protocol === "https:" ? "wss:" : "ws:";
  const ws = new WebSocket(
    proto + "//" + window.location.host + "/widget/ws?key=" + encodeURIComponent(EMBED_KEY)
  );

  let pendingId = null;

  ws.addEventListener("message", function (event) {{
    const frame = JSON.parse(event.data);
    if (frame.type === "typing") {{
      typingEl.hidden = false;
    }} else if (frame.type === "chat_complete") {{
      typingEl.hidden = true;
      appendBubble("assistant", frame.content, frame.sources);
      pendingId = null;
    }} else if (frame.type === "error") {{
      typingEl.hidden = true;
      appendBubble("assistant", "Sorry, something went wrong: " + frame.message, null);
    }}
  }});

  form.addEventListener("submit", function (event) {{
    event.preventDefault();
    const text = input.value.trim();
    if (!text) return;
    appendBubble("user", text, null);
    pendingId = String(Date.now());
    typingEl.hidden = false;
    ws.send(JSON.stringify({{ type: "chat_message", id: pendingId, data: {{ content: text }} }}));
    input.value = "";
  }});

  input.addEventListener("input", function () {{
    ws.send(JSON.stringify({{ type: "typing", data: {{}} }}));
  }});
}})();
"#,
        key = key
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_the_caller_key_as_a_js_string_literal() {
        let script = render_widget_script("wck_abc123");
        assert!(script.contains("\"wck_abc123\""));
    }
}

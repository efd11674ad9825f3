use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use pom_pilot::{AutomationStep, GeneratedFiles, ProcessState};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

/// Work queued by the page. Handled one at a time by the main loop.
#[derive(Debug)]
pub enum StudioCommand {
    Instruction(String),
    Generate,
}

/// Events streamed to the browser via SSE.
#[derive(Clone, Debug)]
pub enum StudioEvent {
    Thinking,
    Steps {
        message: String,
        new_url: String,
        steps: Vec<AutomationStep>,
    },
    Error {
        message: String,
    },
    Code {
        files: GeneratedFiles,
    },
    Ready,
}

impl StudioEvent {
    fn to_sse_event(&self) -> Event {
        match self {
            StudioEvent::Thinking => Event::default().event("thinking").data("{}"),
            StudioEvent::Steps {
                message,
                new_url,
                steps,
            } => Event::default().event("steps").data(
                json!({"message": message, "newUrl": new_url, "steps": steps}).to_string(),
            ),
            StudioEvent::Error { message } => Event::default()
                .event("error")
                .data(json!({"message": message}).to_string()),
            StudioEvent::Code { files } => Event::default()
                .event("code")
                .data(json!({"files": files}).to_string()),
            StudioEvent::Ready => Event::default().event("ready").data("{}"),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<StudioCommand>,
    pub event_tx: broadcast::Sender<StudioEvent>,
    pub session: Arc<Mutex<ProcessState>>,
}

#[derive(Deserialize)]
struct InstructionPayload {
    instruction: String,
}

/// Start the web server on localhost:3000 (or the next free port up to 3009).
pub async fn start_server(
    session: Arc<Mutex<ProcessState>>,
) -> anyhow::Result<(mpsc::Receiver<StudioCommand>, broadcast::Sender<StudioEvent>)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<StudioCommand>(8);
    let (event_tx, _) = broadcast::channel::<StudioEvent>(64);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: event_tx.clone(),
        session,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/state", get(state_handler))
        .route("/instruction", post(instruction_handler))
        .route("/generate", post(generate_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for port in 3000..3010 {
        if let Ok(listener) = tokio::net::TcpListener::bind(format!("127.0.0.1:{port}")).await {
            bound = Some((listener, port));
            break;
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow::anyhow!("Could not bind to any port 3000-3009. Stop the other studio first.")
    })?;

    info!("Studio running at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "studio server stopped");
        }
    });

    Ok((cmd_rx, event_tx))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn state_handler(State(state): State<Arc<AppState>>) -> Json<ProcessState> {
    Json(state.session.lock().await.clone())
}

async fn instruction_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<InstructionPayload>,
) -> StatusCode {
    let instruction = payload.instruction.trim().to_string();
    if instruction.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    debug!(%instruction, "POST /instruction");
    match state.cmd_tx.send(StudioCommand::Instruction(instruction)).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn generate_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.cmd_tx.send(StudioCommand::Generate).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<StudioEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>POM Pilot Studio</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { background: #0a0a0f; color: #e0e0e0; font-family: system-ui, sans-serif; height: 100vh; display: flex; flex-direction: column; }
  header { padding: 20px 32px; border-bottom: 1px solid #1a1a2e; display: flex; gap: 16px; align-items: center; }
  header h1 { font-size: 20px; color: #fff; }
  #url { font-family: monospace; color: #93c5fd; }
  .main { flex: 1; display: grid; grid-template-columns: 2fr 1fr; gap: 16px; padding: 24px 32px; overflow: hidden; }
  .panel { background: #111118; border-radius: 8px; padding: 12px; overflow-y: auto; }
  .step { font-family: monospace; font-size: 13px; padding: 6px 0; border-bottom: 1px solid #1a1a2e; }
  .step .page { color: #a78bfa; }
  .msg { padding: 8px 10px; border-radius: 6px; margin-bottom: 8px; font-size: 14px; }
  .msg.user { background: #1a1a2e; border-left: 3px solid #6366f1; }
  .msg.ai { background: #0a1a0a; border-left: 3px solid #22c55e; }
  .msg.error { background: #1a0a0a; border-left: 3px solid #ef4444; }
  pre { white-space: pre-wrap; font-size: 12px; background: #050508; padding: 8px; margin: 6px 0 12px; }
  .input-area { display: flex; gap: 8px; padding: 0 32px 24px; }
  #cmd { flex: 1; background: #111118; border: 1px solid #222; border-radius: 8px; padding: 12px; color: #fff; font-size: 16px; }
  button { background: #6366f1; color: #fff; border: none; border-radius: 8px; padding: 12px 20px; cursor: pointer; }
  button:disabled { background: #333; cursor: not-allowed; }
</style>
</head>
<body>
  <header><h1>POM Pilot Studio</h1><span id="url">about:blank</span></header>
  <div class="main">
    <div class="panel"><div id="steps"></div><div id="code"></div></div>
    <div class="panel" id="chat"></div>
  </div>
  <div class="input-area">
    <input type="text" id="cmd" placeholder="e.g. Go to saucedemo.com" autofocus />
    <button id="send" onclick="send()">Send</button>
    <button id="gen" onclick="generate()">Generate POM</button>
  </div>
<script>
  const esc = s => String(s ?? '').replace(/&/g,'&amp;').replace(/</g,'&lt;');
  const chat = document.getElementById('chat');
  const stepsEl = document.getElementById('steps');
  const codeEl = document.getElementById('code');
  const cmd = document.getElementById('cmd');

  function say(cls, text) {
    const div = document.createElement('div');
    div.className = 'msg ' + cls;
    div.textContent = text;
    chat.appendChild(div);
    chat.scrollTop = chat.scrollHeight;
  }
  function setBusy(b) {
    for (const id of ['cmd','send','gen']) document.getElementById(id).disabled = b;
    if (!b) cmd.focus();
  }
  function addSteps(steps) {
    for (const s of steps) {
      const div = document.createElement('div');
      div.className = 'step';
      div.innerHTML = '#' + s.order + ' <span class="page">[' + esc(s.pageContext) + ']</span> '
        + esc(s.actionType) + ' ' + esc(s.targetElement) + ' <code>' + esc(s.simulatedSelector) + '</code>'
        + (s.value ? ' = ' + esc(s.value) : '');
      stepsEl.appendChild(div);
    }
  }
  async function load() {
    const state = await (await fetch('/state')).json();
    document.getElementById('url').textContent = state.currentUrl;
    addSteps(state.steps);
    for (const m of state.chatHistory) say(m.role, m.content);
  }
  async function send() {
    const text = cmd.value.trim();
    if (!text) return;
    cmd.value = '';
    say('user', text);
    setBusy(true);
    await fetch('/instruction', { method: 'POST', headers: {'Content-Type': 'application/json'}, body: JSON.stringify({instruction: text}) });
  }
  async function generate() {
    setBusy(true);
    await fetch('/generate', { method: 'POST' });
  }
  cmd.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  const es = new EventSource('/events');
  es.addEventListener('thinking', () => say('ai', 'Thinking...'));
  es.addEventListener('steps', e => {
    const d = JSON.parse(e.data);
    document.getElementById('url').textContent = d.newUrl;
    addSteps(d.steps);
    say('ai', d.message);
  });
  es.addEventListener('error', e => { if (e.data) say('error', JSON.parse(e.data).message); });
  es.addEventListener('code', e => {
    const files = JSON.parse(e.data).files;
    codeEl.innerHTML = Object.entries(files).map(([p, c]) => '<h4>' + esc(p) + '</h4><pre>' + esc(c) + '</pre>').join('');
  });
  es.addEventListener('ready', () => setBusy(false));
  load();
</script>
</body>
</html>
"##;

//! Demo relay server with an xterm.js front end.
//!
//! Run with: cargo run -p relay-server-demo
//!
//! Then open http://localhost:3000 in your browser. The page requests a
//! session id over HTTP, opens a WebSocket, and binds with that id; the
//! server attaches a local shell behind the session.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Json},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use term_relay_exec::PtyExecutor;
use term_relay_session::Coordinator;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    coordinator: Arc<Coordinator>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let registry = Arc::new(term_relay_session::SessionRegistry::new());
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&registry),
        Arc::new(PtyExecutor::new()),
    ));

    // Build router: the HTTP API plus the WebSocket binder endpoint.
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/api/terminal", post(create_terminal))
        .with_state(AppState { coordinator })
        .merge(term_relay_transport::router(registry))
        .layer(CorsLayer::permissive());

    let addr = std::env::var("RELAY_ADDR")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 3000)));
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(serde::Deserialize)]
struct CreateParams {
    shell: Option<String>,
}

#[derive(serde::Serialize)]
struct CreatedSession {
    id: String,
}

/// Register a new session and spawn its lifecycle task. The returned id
/// is what the client binds with over the WebSocket.
async fn create_terminal(
    State(state): State<AppState>,
    Query(params): Query<CreateParams>,
) -> impl IntoResponse {
    match state.coordinator.create_session() {
        Ok(id) => {
            let coordinator = Arc::clone(&state.coordinator);
            let session_id = id.clone();
            tokio::spawn(async move {
                if let Err(e) = coordinator.run(&session_id, params.shell.as_deref()).await {
                    tracing::warn!(session = %session_id, "Session ended with error: {e}");
                }
            });
            Json(CreatedSession { id }).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to create session: {e}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Terminal Relay</title>
    <link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/xterm@5.3.0/css/xterm.css" />
    <script src="https://cdn.jsdelivr.net/npm/xterm@5.3.0/lib/xterm.js"></script>
    <script src="https://cdn.jsdelivr.net/npm/xterm-addon-fit@0.8.0/lib/xterm-addon-fit.js"></script>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        #terminal-container {
            width: 100%;
            height: calc(100vh - 100px);
        }
        .status {
            color: #888;
            font-size: 14px;
            margin-bottom: 10px;
        }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
    </style>
</head>
<body>
    <h1>Terminal Relay</h1>
    <div class="status" id="status">Connecting...</div>
    <div id="terminal-container"></div>

    <script>
        const term = new Terminal({
            cursorBlink: true,
            fontSize: 14,
            fontFamily: 'Menlo, Monaco, "Courier New", monospace',
            theme: {
                background: '#1e1e1e',
                foreground: '#d4d4d4',
            }
        });

        const fitAddon = new FitAddon.FitAddon();
        term.loadAddon(fitAddon);
        term.open(document.getElementById('terminal-container'));
        fitAddon.fit();

        const status = document.getElementById('status');
        let ws;

        async function connect() {
            const resp = await fetch('/api/terminal', { method: 'POST' });
            if (!resp.ok) {
                status.textContent = 'Failed to create session';
                status.className = 'status disconnected';
                return;
            }
            const { id } = await resp.json();

            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onopen = () => {
                status.textContent = 'Connected';
                status.className = 'status connected';

                // Bind first, then report the real terminal size.
                ws.send(JSON.stringify({ operation: 'bind', sessionId: id }));
                const { cols, rows } = term;
                ws.send(JSON.stringify({ operation: 'resize', cols, rows }));
            };

            ws.onclose = (event) => {
                status.textContent = `Disconnected: ${event.reason || 'connection lost'}`;
                status.className = 'status disconnected';
            };

            ws.onerror = (err) => {
                console.error('WebSocket error:', err);
            };

            ws.onmessage = (event) => {
                try {
                    const msg = JSON.parse(event.data);
                    if (msg.operation === 'stdout') {
                        term.write(msg.data);
                    } else if (msg.operation === 'toast') {
                        term.writeln(`\r\n[${msg.data}]\r\n`);
                    }
                } catch (e) {
                    console.error('Failed to parse message:', e);
                }
            };
        }

        // Handle terminal input
        term.onData((data) => {
            if (ws && ws.readyState === WebSocket.OPEN) {
                ws.send(JSON.stringify({ operation: 'stdin', data }));
            }
        });

        // Handle resize
        window.addEventListener('resize', () => {
            fitAddon.fit();
            if (ws && ws.readyState === WebSocket.OPEN) {
                const { cols, rows } = term;
                ws.send(JSON.stringify({ operation: 'resize', cols, rows }));
            }
        });

        // Start connection
        connect();
    </script>
</body>
</html>
"#;

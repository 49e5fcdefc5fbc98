//! Demonstration page served at `/`.

use crate::config::Model;

/// HTML for the landing page of a server running `model`.
pub fn index(model: Model) -> String {
    let title = match model {
        Model::Concurrent => "Multithreaded",
        Model::Sequential => "Single-threaded",
    };
    INDEX_TEMPLATE.replace("{{TITLE}}", title)
}

const INDEX_TEMPLATE: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>{{TITLE}} Demo</title>
<style>
body{font-family:sans-serif;margin:2rem}
input,button{margin:.25rem}
#log{white-space:pre-wrap;border:1px solid #ccc;padding:8px;height:200px;overflow:auto}
</style>
</head>
<body>
<h1>{{TITLE}} Server</h1>
<p>Endpoints:
<a href="/hello">/hello</a>,
<a href="/compute?ms=50">/compute</a>,
<a href="/io?bytes=1048576">/io</a>,
<a href="/metrics">/metrics</a></p>
<h2>Signaling room (WebSocket /ws)</h2>
<div>
<label>Room: <input id="room" value="demo"></label>
<button id="connect">Connect</button>
</div>
<div>
<input id="msg" placeholder="message">
<button id="send" disabled>Send</button>
</div>
<div id="log"></div>
<script>
const log = (...a) => {
  const el = document.getElementById('log');
  el.textContent += a.join(' ') + '\n';
  el.scrollTop = el.scrollHeight;
};
let ws;
document.getElementById('connect').onclick = () => {
  const room = document.getElementById('room').value || 'default';
  ws = new WebSocket(`ws://${location.host}/ws?room=${encodeURIComponent(room)}`);
  ws.onopen = () => { log('ws open'); document.getElementById('send').disabled = false; };
  ws.onmessage = ev => log('recv', ev.data);
  ws.onclose = () => { log('ws close'); document.getElementById('send').disabled = true; };
};
document.getElementById('send').onclick = () => {
  const text = document.getElementById('msg').value;
  ws.send(JSON.stringify({type: 'chat', text}));
  log('sent', text);
};
</script>
</body>
</html>
"#;

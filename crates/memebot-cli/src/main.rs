use std::fs;
use std::io::{self, Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memebot_contracts::events::{EventPayload, EventWriter};
use memebot_contracts::gallery::{GalleryQuery, SortDirection, SortKey};
use memebot_contracts::templates::SnapshotStore;
use memebot_engine::{
    render_caption, Attachment, CaptionFont, ChatMessage, Dispatcher, FontRenderer, ImageSource,
    Outcome, RenderOptions, Reply, StaticGate, TemplateStore,
};
use serde_json::{json, Value};
use url::Url;

#[derive(Debug, Parser)]
#[command(name = "memebot", version, about = "Caption-meme chat bot and template gallery")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Line-oriented chat session: every stdin line is one inbound message.
    Chat(ChatArgs),
    /// One-shot render of a saved template or ad-hoc URL.
    Render(RenderArgs),
    /// Read-only HTTP API over the template snapshot for the gallery page.
    Gallery(GalleryArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    data_dir: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, env = "MEMEBOT_FONT")]
    font: PathBuf,
    /// Author name attached to every inbound message.
    #[arg(long, default_value = "memer")]
    user: String,
    /// Grant the session user the template-admin capability.
    #[arg(long)]
    admin: bool,
    /// Where rendered replies are written (default: <data-dir>/renders).
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct RenderArgs {
    #[arg(long)]
    data_dir: PathBuf,
    #[arg(long, env = "MEMEBOT_FONT")]
    font: PathBuf,
    /// Template name or image URL.
    #[arg(long)]
    target: String,
    #[arg(long)]
    text: String,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct GalleryArgs {
    #[arg(long)]
    data_dir: PathBuf,
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("memebot error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => run_chat(args),
        Command::Render(args) => run_render(args),
        Command::Gallery(args) => run_gallery(args),
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.data_dir.join("events.jsonl"));
    let events = EventWriter::for_new_session(&events_path);
    let store = TemplateStore::open(&args.data_dir, events)?;
    let font = CaptionFont::load(&args.font)?;
    let renderer = FontRenderer::new(font, RenderOptions::default());
    let gate = StaticGate::new(if args.admin {
        vec![args.user.clone()]
    } else {
        Vec::new()
    });
    let dispatcher = Dispatcher::new(&store, &renderer, &gate);

    let out_dir = args
        .out
        .clone()
        .unwrap_or_else(|| args.data_dir.join("renders"));
    fs::create_dir_all(&out_dir)?;

    store.emit_event(
        "session_started",
        json_payload(json!({ "user": args.user, "admin": args.admin })),
    );
    println!("Memebot chat started. Type !say help for commands.");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        if input.trim().is_empty() {
            continue;
        }

        let message = build_message(&args.user, input);
        let outcome = dispatcher.handle(&message);
        deliver(&store, &out_dir, outcome)?;
    }
    Ok(())
}

/// Turn one input line into a chat message. An `attach:<path>` token stands
/// in for a platform upload: the file's bytes ride along as an attachment
/// and the token disappears from the message text.
fn build_message(author: &str, input: &str) -> ChatMessage {
    let mut attachments = Vec::new();
    let mut content_parts = Vec::new();

    for token in input.split(' ') {
        let Some(path) = token.strip_prefix("attach:") else {
            content_parts.push(token);
            continue;
        };
        match fs::read(path) {
            Ok(bytes) => {
                let filename = Path::new(path)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.to_string());
                attachments.push(Attachment { filename, bytes });
            }
            Err(err) => eprintln!("could not read attachment {path}: {err}"),
        }
    }

    ChatMessage {
        author: author.to_string(),
        content: content_parts.join(" "),
        attachments,
    }
}

fn deliver(store: &TemplateStore, out_dir: &Path, outcome: Outcome) -> Result<()> {
    for reply in outcome.replies {
        match reply {
            Reply::Text(text) => println!("{text}"),
            Reply::Image { filename, png } => {
                let stamp = chrono::Utc::now().timestamp_millis();
                let path = out_dir.join(format!("render-{stamp}-{filename}"));
                fs::write(&path, png)?;
                println!("Saved render to {}", path.display());
            }
        }
    }

    if outcome.delete_trigger {
        // Reply first, then delete: a real platform transport removes the
        // triggering message here and logs (never retries) a failure. Over
        // stdin there is nothing left to remove beyond acknowledging it.
        println!("(ephemeral trigger deleted)");
        store.emit_event("trigger_deleted", EventPayload::new());
    }
    Ok(())
}

fn run_render(args: RenderArgs) -> Result<()> {
    let events = EventWriter::for_new_session(args.data_dir.join("events.jsonl"));
    let store = TemplateStore::open(&args.data_dir, events)?;
    let font = CaptionFont::load(&args.font)?;

    let image = match Url::parse(&args.target) {
        Ok(url) => store.fetch(&ImageSource::Url(url))?,
        Err(_) => {
            let record = store
                .get(&args.target)
                .with_context(|| format!("unknown template '{}'", args.target))?;
            store.read_raster(&record)?
        }
    };

    let png = render_caption(&image, &args.text, &font, &RenderOptions::default())?;
    fs::write(&args.out, png)?;
    println!("Wrote {}", args.out.display());
    Ok(())
}

fn run_gallery(args: GalleryArgs) -> Result<()> {
    let snapshot = SnapshotStore::new(args.data_dir.join("config.json"));
    snapshot.ensure_initialized()?;
    let images_dir = args.data_dir.join("images");

    let server = tiny_http::Server::http(&args.addr)
        .map_err(|err| anyhow::anyhow!("binding {}: {err}", args.addr))?;
    println!("Gallery API listening on http://{}", args.addr);

    for request in server.incoming_requests() {
        if let Err(err) = respond(request, &snapshot, &images_dir) {
            eprintln!("gallery request failed: {err:#}");
        }
    }
    Ok(())
}

fn respond(request: tiny_http::Request, snapshot: &SnapshotStore, images_dir: &Path) -> Result<()> {
    let url = Url::parse(&format!("http://gallery{}", request.url()))?;
    let path = url.path().to_string();

    if path == "/api/templates" {
        // Reload per request: each response is a point-in-time snapshot of
        // the file, independent of whichever process is writing it.
        let records = snapshot.load().unwrap_or_default();
        let view = gallery_query(&url).apply(&records);
        let body = serde_json::to_vec(&view)?;
        return respond_with(request, 200, "application/json", body);
    }

    if let Some(filename) = path.strip_prefix("/images/") {
        if is_plain_filename(filename) {
            if let Ok(body) = fs::read(images_dir.join(filename)) {
                return respond_with(request, 200, "image/png", body);
            }
        }
        return respond_with(request, 404, "text/plain", b"not found".to_vec());
    }

    respond_with(request, 404, "text/plain", b"not found".to_vec())
}

fn is_plain_filename(filename: &str) -> bool {
    !filename.is_empty() && !filename.contains(['/', '\\']) && !filename.contains("..")
}

fn gallery_query(url: &Url) -> GalleryQuery {
    let mut query = GalleryQuery::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "sort" => {
                if let Some(sort) = SortKey::from_param(&value) {
                    query.sort = sort;
                }
            }
            "direction" => {
                if let Some(direction) = SortDirection::from_param(&value) {
                    query.direction = direction;
                }
            }
            "filter" => query.filter = value.into_owned(),
            _ => {}
        }
    }
    query
}

fn respond_with(
    request: tiny_http::Request,
    status: u16,
    content_type: &str,
    body: Vec<u8>,
) -> Result<()> {
    let header = tiny_http::Header::from_bytes("Content-Type", content_type)
        .map_err(|()| anyhow::anyhow!("invalid content-type header"))?;
    let length = body.len();
    let response = tiny_http::Response::new(
        tiny_http::StatusCode(status),
        vec![header],
        Cursor::new(body),
        Some(length),
        None,
    );
    request.respond(response)?;
    Ok(())
}

fn json_payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

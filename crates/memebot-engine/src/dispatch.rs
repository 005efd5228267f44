use memebot_contracts::chat::{parse_intent, Intent, RenderTarget, HELP_TEXT};
use memebot_contracts::error::BotError;
use memebot_contracts::templates::TemplateRecord;
use serde_json::json;
use url::Url;

use crate::compositor::{render_caption, CaptionFont, RenderOptions};
use crate::{payload, ImageSource, TemplateStore};

const SUPPORTED_ATTACHMENT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    fn has_supported_extension(&self) -> bool {
        self.filename
            .rsplit_once('.')
            .is_some_and(|(_, ext)| {
                SUPPORTED_ATTACHMENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
            })
    }
}

/// One inbound chat message, already stripped of platform framing.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub author: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

impl ChatMessage {
    pub fn text(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
            attachments: Vec::new(),
        }
    }
}

/// External capability check: may this author administer templates? The
/// host platform decides (administrator permission or a named role); the
/// dispatcher only asks.
pub trait PermissionGate {
    fn may_administer(&self, author: &str) -> bool;
}

/// Gate over a fixed admin list, enough for the CLI transport and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticGate {
    admins: Vec<String>,
}

impl StaticGate {
    pub fn new(admins: Vec<String>) -> Self {
        Self { admins }
    }
}

impl PermissionGate for StaticGate {
    fn may_administer(&self, author: &str) -> bool {
        self.admins.iter().any(|admin| admin == author)
    }
}

/// Seam between dispatch and the compositor so transports and tests can
/// swap the rendering backend.
pub trait CaptionRenderer {
    fn render(&self, image: &[u8], text: &str) -> Result<Vec<u8>, BotError>;
}

pub struct FontRenderer {
    font: CaptionFont,
    options: RenderOptions,
}

impl FontRenderer {
    pub fn new(font: CaptionFont, options: RenderOptions) -> Self {
        Self { font, options }
    }
}

impl CaptionRenderer for FontRenderer {
    fn render(&self, image: &[u8], text: &str) -> Result<Vec<u8>, BotError> {
        render_caption(image, text, &self.font, &self.options)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Image { filename: String, png: Vec<u8> },
}

/// What the transport should do with one handled message: send the replies,
/// then (for ephemeral triggers) delete the triggering message best-effort.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub replies: Vec<Reply>,
    pub delete_trigger: bool,
}

impl Outcome {
    fn none() -> Self {
        Self::default()
    }

    fn text(message: impl Into<String>) -> Self {
        Self {
            replies: vec![Reply::Text(message.into())],
            delete_trigger: false,
        }
    }
}

/// Stateless per-message command dispatch. Every [`BotError`] coming out of
/// the store or renderer turns into a text reply; nothing propagates.
pub struct Dispatcher<'a> {
    store: &'a TemplateStore,
    renderer: &'a dyn CaptionRenderer,
    gate: &'a dyn PermissionGate,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        store: &'a TemplateStore,
        renderer: &'a dyn CaptionRenderer,
        gate: &'a dyn PermissionGate,
    ) -> Self {
        Self {
            store,
            renderer,
            gate,
        }
    }

    pub fn handle(&self, message: &ChatMessage) -> Outcome {
        match parse_intent(&message.content, !message.attachments.is_empty()) {
            Intent::Noop => self.handle_custom_prefix(message),
            Intent::Help => Outcome::text(HELP_TEXT),
            Intent::Render {
                target,
                text,
                ephemeral,
            } => self.handle_render(target, &text, ephemeral),
            config_intent => self.handle_config(message, config_intent),
        }
    }

    fn handle_config(&self, message: &ChatMessage, intent: Intent) -> Outcome {
        if !self.gate.may_administer(&message.author) {
            self.store.emit_event(
                "permission_denied",
                payload(json!({ "author": message.author })),
            );
            return Outcome::text(BotError::PermissionDenied.user_message());
        }

        match intent {
            Intent::ConfigAdd {
                name,
                image_url,
                custom_prefix,
            } => self.handle_add(message, &name, image_url, custom_prefix),
            Intent::ConfigRemove { name } => match self.store.remove(&name) {
                Ok(record) => Outcome::text(format!("Removed meme {}!", record.name)),
                Err(err) => Outcome::text(err.user_message()),
            },
            Intent::ConfigList => self.handle_list(),
            Intent::ConfigMissingName => Outcome::text("Please specify a name!"),
            Intent::ConfigInvalid => Outcome::text("Invalid operation!"),
            _ => Outcome::none(),
        }
    }

    fn handle_add(
        &self,
        message: &ChatMessage,
        name: &str,
        image_url: Option<String>,
        custom_prefix: Option<String>,
    ) -> Outcome {
        let source = if !message.attachments.is_empty() {
            match message
                .attachments
                .iter()
                .find(|attachment| attachment.has_supported_extension())
            {
                Some(attachment) => ImageSource::Bytes(attachment.bytes.clone()),
                None => return Outcome::text("Unsupported image type!"),
            }
        } else if let Some(url_text) = image_url {
            match Url::parse(&url_text) {
                Ok(url) => ImageSource::Url(url),
                Err(_) => return Outcome::text(BotError::InvalidUrl(url_text).user_message()),
            }
        } else {
            return Outcome::text("No image specified!");
        };

        match self.store.add(name, source, custom_prefix) {
            Ok(record) => Outcome::text(format!("Added meme {}!", record.name)),
            Err(err) => Outcome::text(err.user_message()),
        }
    }

    fn handle_list(&self) -> Outcome {
        let mut list = String::new();
        for record in self.store.list() {
            match &record.custom_prefix {
                Some(prefix) => list.push_str(&format!(" - {} (`{prefix}`)\n", record.name)),
                None => list.push_str(&format!(" - {}\n", record.name)),
            }
        }
        Outcome::text(format!("Available memes: \n{list}"))
    }

    fn handle_render(&self, target: RenderTarget, text: &str, ephemeral: bool) -> Outcome {
        match target {
            RenderTarget::Template(name) => {
                let Some(record) = self.store.get(&name) else {
                    // Unknown template never triggers the ephemeral delete;
                    // the caller's message stays put alongside the reply.
                    return Outcome::text(BotError::NotFound(name).user_message());
                };
                let mut outcome = self.render_record(&record, text);
                outcome.delete_trigger = ephemeral;
                outcome
            }
            RenderTarget::Url(url_text) => {
                let mut outcome = self.render_url(&url_text, text);
                outcome.delete_trigger = ephemeral;
                outcome
            }
        }
    }

    fn render_record(&self, record: &TemplateRecord, text: &str) -> Outcome {
        let rendered = self
            .store
            .read_raster(record)
            .and_then(|image| self.renderer.render(&image, text));
        self.finish_render(rendered, &record.filename, Some(&record.name))
    }

    fn render_url(&self, url_text: &str, text: &str) -> Outcome {
        let rendered = Url::parse(url_text)
            .map_err(|_| BotError::InvalidUrl(url_text.to_string()))
            .and_then(|url| self.store.fetch(&ImageSource::Url(url)))
            .and_then(|image| self.renderer.render(&image, text));
        self.finish_render(rendered, "meme.png", None)
    }

    fn finish_render(
        &self,
        rendered: Result<Vec<u8>, BotError>,
        filename: &str,
        template: Option<&str>,
    ) -> Outcome {
        match rendered {
            Ok(png) => {
                self.store.emit_event(
                    "render_completed",
                    payload(json!({ "template": template, "filename": filename })),
                );
                Outcome {
                    replies: vec![Reply::Image {
                        filename: filename.to_string(),
                        png,
                    }],
                    delete_trigger: false,
                }
            }
            Err(err) => {
                self.store.emit_event(
                    "render_failed",
                    payload(json!({ "template": template, "error": err.to_string() })),
                );
                Outcome::text(err.user_message())
            }
        }
    }

    fn handle_custom_prefix(&self, message: &ChatMessage) -> Outcome {
        match self.store.resolve_custom_prefix(&message.content) {
            // Custom prefixes behave like `!say <name>`: never ephemeral.
            Some((record, text)) => self.render_record(&record, &text),
            None => Outcome::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, RgbImage};
    use memebot_contracts::error::BotError;
    use memebot_contracts::events::EventWriter;

    use crate::{ImageSource, TemplateStore};

    use super::{
        Attachment, CaptionRenderer, ChatMessage, Dispatcher, Outcome, Reply, StaticGate,
    };

    struct StubRenderer;

    impl CaptionRenderer for StubRenderer {
        fn render(&self, _image: &[u8], text: &str) -> Result<Vec<u8>, BotError> {
            if text.trim().is_empty() {
                return Err(BotError::EmptyInput);
            }
            Ok(b"rendered".to_vec())
        }
    }

    fn test_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::new(width, height);
        let mut cursor = Cursor::new(Vec::new());
        image
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("encode test png");
        cursor.into_inner()
    }

    fn open_store(data_dir: &std::path::Path) -> TemplateStore {
        let events = EventWriter::new(data_dir.join("events.jsonl"), "test-session");
        TemplateStore::open(data_dir, events).expect("open store")
    }

    fn admin_gate() -> StaticGate {
        StaticGate::new(vec!["admin".to_string()])
    }

    fn reply_text(outcome: &Outcome) -> &str {
        match outcome.replies.first() {
            Some(Reply::Text(text)) => text,
            other => panic!("expected text reply, got {other:?}"),
        }
    }

    fn message_with_attachment(author: &str, content: &str, filename: &str) -> ChatMessage {
        ChatMessage {
            author: author.to_string(),
            content: content.to_string(),
            attachments: vec![Attachment {
                filename: filename.to_string(),
                bytes: test_png(400, 300),
            }],
        }
    }

    #[test]
    fn help_lists_the_command_surface() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = open_store(temp.path());
        let gate = admin_gate();
        let dispatcher = Dispatcher::new(&store, &StubRenderer, &gate);

        let outcome = dispatcher.handle(&ChatMessage::text("guest", "!say help"));
        assert!(reply_text(&outcome).contains("!say config add"));
        assert!(!outcome.delete_trigger);
    }

    #[test]
    fn non_admin_config_is_refused_and_state_untouched() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path());
        store.add("doge", ImageSource::Bytes(test_png(40, 30)), None)?;
        let snapshot_before = std::fs::read_to_string(store.snapshot_path())?;

        let gate = admin_gate();
        let dispatcher = Dispatcher::new(&store, &StubRenderer, &gate);
        let outcome = dispatcher.handle(&ChatMessage::text("guest", "!say config remove doge"));

        assert_eq!(reply_text(&outcome), "You don't have permission to do that!");
        assert!(store.get("doge").is_some());
        assert_eq!(std::fs::read_to_string(store.snapshot_path())?, snapshot_before);
        Ok(())
    }

    #[test]
    fn admin_adds_template_from_attachment() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = open_store(temp.path());
        let gate = admin_gate();
        let dispatcher = Dispatcher::new(&store, &StubRenderer, &gate);

        let message = message_with_attachment("admin", "!say config add doge !doge", "doge.png");
        let outcome = dispatcher.handle(&message);

        assert_eq!(reply_text(&outcome), "Added meme doge!");
        let record = store.get("doge").expect("added");
        assert_eq!(record.custom_prefix.as_deref(), Some("!doge"));
    }

    #[test]
    fn add_argument_errors_map_to_replies() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = open_store(temp.path());
        let gate = admin_gate();
        let dispatcher = Dispatcher::new(&store, &StubRenderer, &gate);

        let outcome = dispatcher.handle(&ChatMessage::text("admin", "!say config add doge"));
        assert_eq!(reply_text(&outcome), "No image specified!");

        let outcome =
            dispatcher.handle(&ChatMessage::text("admin", "!say config add doge not-a-url"));
        assert_eq!(reply_text(&outcome), "Invalid URL!");

        let message = message_with_attachment("admin", "!say config add doge", "doge.gif");
        assert_eq!(reply_text(&dispatcher.handle(&message)), "Unsupported image type!");

        let outcome = dispatcher.handle(&ChatMessage::text("admin", "!say config add"));
        assert_eq!(reply_text(&outcome), "Please specify a name!");

        let outcome = dispatcher.handle(&ChatMessage::text("admin", "!say config frobnicate"));
        assert_eq!(reply_text(&outcome), "Invalid operation!");
    }

    #[test]
    fn duplicate_add_reports_existing_meme() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path());
        store.add("doge", ImageSource::Bytes(test_png(40, 30)), None)?;
        let gate = admin_gate();
        let dispatcher = Dispatcher::new(&store, &StubRenderer, &gate);

        let message = message_with_attachment("admin", "!say config add doge", "doge.png");
        assert_eq!(reply_text(&dispatcher.handle(&message)), "That meme already exists!");
        Ok(())
    }

    #[test]
    fn remove_and_list_round_trip() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path());
        store.add(
            "doge",
            ImageSource::Bytes(test_png(40, 30)),
            Some("!doge".to_string()),
        )?;
        store.add("cat", ImageSource::Bytes(test_png(40, 30)), None)?;
        let gate = admin_gate();
        let dispatcher = Dispatcher::new(&store, &StubRenderer, &gate);

        let outcome = dispatcher.handle(&ChatMessage::text("admin", "!say config list"));
        assert_eq!(
            reply_text(&outcome),
            "Available memes: \n - doge (`!doge`)\n - cat\n"
        );

        let outcome = dispatcher.handle(&ChatMessage::text("admin", "!say config remove cat"));
        assert_eq!(reply_text(&outcome), "Removed meme cat!");

        let outcome = dispatcher.handle(&ChatMessage::text("admin", "!say config remove cat"));
        assert_eq!(reply_text(&outcome), "That meme doesn't exist!");
        Ok(())
    }

    #[test]
    fn say_returns_image_reply_for_saved_template() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path());
        store.add("doge", ImageSource::Bytes(test_png(40, 30)), None)?;
        let gate = admin_gate();
        let dispatcher = Dispatcher::new(&store, &StubRenderer, &gate);

        let outcome = dispatcher.handle(&ChatMessage::text("guest", "!say doge much wow"));
        assert_eq!(
            outcome.replies,
            vec![Reply::Image {
                filename: "doge.png".to_string(),
                png: b"rendered".to_vec(),
            }]
        );
        assert!(!outcome.delete_trigger);
        Ok(())
    }

    #[test]
    fn whisper_requests_trigger_deletion_even_on_render_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path());
        store.add("doge", ImageSource::Bytes(test_png(40, 30)), None)?;
        let gate = admin_gate();
        let dispatcher = Dispatcher::new(&store, &StubRenderer, &gate);

        let outcome = dispatcher.handle(&ChatMessage::text("guest", "!whisper doge much wow"));
        assert!(outcome.delete_trigger);

        // Missing caption still counts as a handled render.
        let outcome = dispatcher.handle(&ChatMessage::text("guest", "!whisper doge"));
        assert_eq!(reply_text(&outcome), "No text provided!");
        assert!(outcome.delete_trigger);

        // Unknown template never was a render; the trigger stays.
        let outcome = dispatcher.handle(&ChatMessage::text("guest", "!whisper nope hi"));
        assert_eq!(reply_text(&outcome), "That meme doesn't exist!");
        assert!(!outcome.delete_trigger);
        Ok(())
    }

    #[test]
    fn custom_prefix_renders_without_deletion() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = open_store(temp.path());
        store.add(
            "doge",
            ImageSource::Bytes(test_png(40, 30)),
            Some("!doge".to_string()),
        )?;
        let gate = admin_gate();
        let dispatcher = Dispatcher::new(&store, &StubRenderer, &gate);

        let outcome = dispatcher.handle(&ChatMessage::text("guest", "!doge much wow"));
        assert!(matches!(outcome.replies.first(), Some(Reply::Image { .. })));
        assert!(!outcome.delete_trigger);

        let outcome = dispatcher.handle(&ChatMessage::text("guest", "plain chatter"));
        assert!(outcome.replies.is_empty());
        Ok(())
    }
}

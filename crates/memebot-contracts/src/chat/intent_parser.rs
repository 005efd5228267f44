use url::Url;

use super::command_registry::{
    ADD_KEYWORD, CONFIG_KEYWORD, HELP_KEYWORD, LIST_KEYWORD, REMOVE_KEYWORD, SAY_PREFIX,
    WHISPER_PREFIX,
};

/// What a render request points at: a saved template by name, or an ad-hoc
/// image URL used once and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderTarget {
    Template(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Noop,
    Help,
    ConfigAdd {
        name: String,
        image_url: Option<String>,
        custom_prefix: Option<String>,
    },
    ConfigRemove {
        name: String,
    },
    ConfigList,
    /// `config add`/`config remove` with no argument.
    ConfigMissingName,
    /// `config` followed by something that is not add/remove/list.
    ConfigInvalid,
    Render {
        target: RenderTarget,
        text: String,
        ephemeral: bool,
    },
}

/// Classify one inbound message by literal prefix. Stateless; custom
/// template prefixes are resolved against the registry by the dispatcher,
/// not here. `has_attachment` shifts the `config add` argument layout the
/// way an uploaded image replaces the URL argument.
pub fn parse_intent(content: &str, has_attachment: bool) -> Intent {
    if let Some(rest) = strip_command(content, SAY_PREFIX) {
        if let Some(config_rest) = strip_command(rest, CONFIG_KEYWORD) {
            return parse_config(config_rest, has_attachment);
        }
        if strip_command(rest, HELP_KEYWORD).is_some() {
            return Intent::Help;
        }
        return parse_render(rest, false);
    }
    if let Some(rest) = strip_command(content, WHISPER_PREFIX) {
        return parse_render(rest, true);
    }
    Intent::Noop
}

/// Strip `command` from the front of `text` only at a token boundary, so
/// `!sayonara` is not a `!say` invocation.
fn strip_command<'a>(text: &'a str, command: &str) -> Option<&'a str> {
    let text = text.trim_start();
    let rest = text.strip_prefix(command)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest)
    } else {
        None
    }
}

fn parse_render(rest: &str, ephemeral: bool) -> Intent {
    let rest = rest.trim_start();
    let (target, text) = match rest.split_once(char::is_whitespace) {
        Some((target, text)) => (target, text.trim()),
        None => (rest, ""),
    };

    // Anything that parses as an absolute URL is rendered ad hoc,
    // everything else is treated as a template name.
    let target = if Url::parse(target).is_ok() {
        RenderTarget::Url(target.to_string())
    } else {
        RenderTarget::Template(target.to_string())
    };

    Intent::Render {
        target,
        text: text.to_string(),
        ephemeral,
    }
}

fn parse_config(rest: &str, has_attachment: bool) -> Intent {
    if let Some(tail) = strip_command(rest, ADD_KEYWORD) {
        let args: Vec<&str> = tail.split_whitespace().collect();
        let Some(name) = args.first() else {
            return Intent::ConfigMissingName;
        };
        let (image_url, custom_prefix) = if has_attachment {
            (None, args.get(1))
        } else {
            (args.get(1), args.get(2))
        };
        return Intent::ConfigAdd {
            name: name.to_string(),
            image_url: image_url.map(|value| value.to_string()),
            custom_prefix: custom_prefix.map(|value| value.to_string()),
        };
    }
    if let Some(tail) = strip_command(rest, REMOVE_KEYWORD) {
        let Some(name) = tail.split_whitespace().next() else {
            return Intent::ConfigMissingName;
        };
        return Intent::ConfigRemove {
            name: name.to_string(),
        };
    }
    if strip_command(rest, LIST_KEYWORD).is_some() {
        return Intent::ConfigList;
    }
    Intent::ConfigInvalid
}

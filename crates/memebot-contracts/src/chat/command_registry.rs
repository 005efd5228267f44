pub const SAY_PREFIX: &str = "!say";
pub const WHISPER_PREFIX: &str = "!whisper";

pub(crate) const CONFIG_KEYWORD: &str = "config";
pub(crate) const HELP_KEYWORD: &str = "help";

pub(crate) const ADD_KEYWORD: &str = "add";
pub(crate) const REMOVE_KEYWORD: &str = "remove";
pub(crate) const LIST_KEYWORD: &str = "list";

pub const HELP_TEXT: &str = "\
!say [meme name] [text]
!whisper [meme name] [text]
!say help

Only for administrators and template admins:
!say config add [meme name] [image url] [custom prefix (optional)]
!say config add [meme name] [custom prefix (optional)] (send image as attachment)
!say config remove [meme name]
!say config list";

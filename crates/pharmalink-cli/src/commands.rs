//! Line commands typed at the prompt.

use std::path::{Path, PathBuf};

use thiserror::Error;

use pharmalink_shared::{NotificationId, PharmacyId};

pub const HELP: &str = "\
Commands:
  /list                 pharmacies and who is online
  /open <pharmacy-id>   open a conversation
  /image <path> [text]  send an image, with optional caption
  /notifications        unread notifications
  /ack <id>             mark a notification as read
  /status               connection state and badge
  /help                 this text
  /quit                 leave
Any other line is sent as a message to the open conversation.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Open(PharmacyId),
    Send(String),
    Image { path: PathBuf, caption: Option<String> },
    Notifications,
    Ack(NotificationId),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command /{0}, try /help")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Unsupported image type: {0}")]
    UnsupportedImage(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "list" | "ls" => Command::List,
        "open" => {
            if arg.is_empty() {
                return Err(CommandError::Usage("/open <pharmacy-id>"));
            }
            Command::Open(PharmacyId::new(arg))
        }
        "image" | "img" => {
            let (path, caption) = match arg.split_once(char::is_whitespace) {
                Some((path, caption)) => (path, Some(caption.trim().to_string())),
                None => (arg, None),
            };
            if path.is_empty() {
                return Err(CommandError::Usage("/image <path> [text]"));
            }
            Command::Image {
                path: PathBuf::from(path),
                caption: caption.filter(|c| !c.is_empty()),
            }
        }
        "notifications" | "n" => Command::Notifications,
        "ack" => {
            if arg.is_empty() {
                return Err(CommandError::Usage("/ack <notification-id>"));
            }
            Command::Ack(NotificationId::new(arg))
        }
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// MIME type from the file extension.
pub fn image_mime(path: &Path) -> Result<&'static str, CommandError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "gif" => Ok("image/gif"),
        "webp" => Ok("image/webp"),
        _ => Err(CommandError::UnsupportedImage(path.display().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line_is_a_message() {
        assert_eq!(
            parse("  need 10 boxes of amoxicillin ").unwrap(),
            Some(Command::Send("need 10 boxes of amoxicillin".into()))
        );
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn test_open_requires_id() {
        assert_eq!(
            parse("/open 65f0a1").unwrap(),
            Some(Command::Open("65f0a1".into()))
        );
        assert_eq!(parse("/open").unwrap_err(), CommandError::Usage("/open <pharmacy-id>"));
    }

    #[test]
    fn test_image_with_caption() {
        assert_eq!(
            parse("/image scan.png the invoice").unwrap(),
            Some(Command::Image {
                path: PathBuf::from("scan.png"),
                caption: Some("the invoice".into()),
            })
        );
        assert_eq!(
            parse("/img scan.png").unwrap(),
            Some(Command::Image {
                path: PathBuf::from("scan.png"),
                caption: None,
            })
        );
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(parse("/dance").unwrap_err(), CommandError::Unknown("dance".into()));
    }

    #[test]
    fn test_image_mime() {
        assert_eq!(image_mime(Path::new("a/B.JPG")).unwrap(), "image/jpeg");
        assert!(image_mime(Path::new("notes.txt")).is_err());
    }
}

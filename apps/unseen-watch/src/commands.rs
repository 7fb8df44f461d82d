//! Line commands read from stdin.

/// Something the operator asked the watcher to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Acknowledge the current count.
    Seen,
    Pause,
    Resume,
    /// Switch identity; `None` is the anonymous scope.
    User(Option<String>),
    /// Simulate the page going to the background / foreground.
    Hide,
    Show,
    /// Simulate losing / regaining connectivity.
    Offline,
    Online,
    Status,
    /// Open the feed (acknowledges the badge), load more, mark read.
    Feed,
    More,
    Read(String),
    ReadAll,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  seen              acknowledge the current count
  pause | resume    stop / restart polling
  user <id> | anon  switch identity
  hide | show       simulate page visibility
  offline | online  simulate connectivity
  status            print the current badge state
  feed | more       open the notification feed / load the next page
  read <id>         mark one notification read
  readall           mark every notification read
  quit";

pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let arg = words.next();

    let cmd = match (head.to_ascii_lowercase().as_str(), arg) {
        ("seen", None) => Command::Seen,
        ("pause", None) => Command::Pause,
        ("resume", None) => Command::Resume,
        ("user", Some(id)) => Command::User(Some(id.to_string())),
        ("user", None) => return Err("usage: user <id>".to_string()),
        ("anon", None) => Command::User(None),
        ("hide", None) => Command::Hide,
        ("show", None) => Command::Show,
        ("offline", None) => Command::Offline,
        ("online", None) => Command::Online,
        ("status", None) => Command::Status,
        ("feed", None) => Command::Feed,
        ("more", None) => Command::More,
        ("read", Some(id)) => Command::Read(id.to_string()),
        ("read", None) => return Err("usage: read <id>".to_string()),
        ("readall", None) => Command::ReadAll,
        ("help" | "?", None) => Command::Help,
        ("quit" | "exit", None) => Command::Quit,
        (other, _) => return Err(format!("unknown command: {other}")),
    };

    if words.next().is_some() {
        return Err(format!("too many arguments for {head}"));
    }
    Ok(cmd)
}

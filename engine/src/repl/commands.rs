//! Shell command parsing
//!
//! Turns one input line into a [`ShellCommand`]. Parsing is pure; the
//! shell decides what each command does.

/// A recognised shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Exit,
    Help,
    Save(Option<String>),
    Load(String),
    Sessions,
    Delete(String),
    ToggleAutoSave,
    /// `None` shows the current marker
    Eof(Option<String>),
    Settings,
    Servers,
    Tools,
    Enable(String),
    Disable(String),
    Configure(String),
    Shell(String),
    /// `>>` lists, `>>N` shows block N
    CodeBlocks(Option<usize>),
    /// `||` lists, `||N` shows table N
    Tables(Option<usize>),
    ToggleRecording,
    /// Known command used incorrectly; carries the usage line
    Usage(&'static str),
    /// Slash command nobody registered
    Unknown(String),
}

/// Help text shown by `/?`.
pub const HELP: &[(&str, &str)] = &[
    ("exit", "stop all servers and quit"),
    ("/? | /help", "show this list"),
    ("/save [title]", "save the conversation"),
    ("/load <id>", "replace the conversation with a saved session"),
    ("/sessions", "list saved sessions"),
    ("/delete <id>", "delete a saved session"),
    ("/auto", "toggle auto-save after every answer"),
    ("/eof [marker]", "show or change the end-of-input marker"),
    ("/settings", "show current settings"),
    ("/servers", "list tool servers and their state"),
    ("/tools", "list the tools the model can call"),
    ("/enable <server>", "start a server"),
    ("/disable <server>", "stop a server"),
    ("/config <server>", "enter credentials for a server, then start it"),
    ("!<cmd>", "run a shell command"),
    (">> | >>N", "list code blocks of the last answer, or show block N"),
    ("|| | ||N", "list tables of the last answer, or show table N"),
];

/// Parses a line typed at an empty buffer.
///
/// Returns `None` for ordinary message text. The voice trigger is matched
/// on the trimmed line.
pub fn parse(line: &str, voice_trigger: &str) -> Option<ShellCommand> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if !voice_trigger.is_empty() && trimmed == voice_trigger {
        return Some(ShellCommand::ToggleRecording);
    }
    if trimmed.eq_ignore_ascii_case("exit") {
        return Some(ShellCommand::Exit);
    }
    if let Some(cmd) = trimmed.strip_prefix('!') {
        let cmd = cmd.trim();
        return Some(if cmd.is_empty() {
            ShellCommand::Usage("!<cmd>")
        } else {
            ShellCommand::Shell(cmd.to_string())
        });
    }
    if let Some(rest) = trimmed.strip_prefix(">>") {
        return Some(element_command(rest, ShellCommand::CodeBlocks, ">> | >>N"));
    }
    if let Some(rest) = trimmed.strip_prefix("||") {
        return Some(element_command(rest, ShellCommand::Tables, "|| | ||N"));
    }
    if !trimmed.starts_with('/') {
        return None;
    }

    let (head, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (trimmed, ""),
    };
    let arg = (!arg.is_empty()).then(|| arg.to_string());

    let command = match head.to_ascii_lowercase().as_str() {
        "/exit" | "/quit" => ShellCommand::Exit,
        "/?" | "/help" => ShellCommand::Help,
        "/save" => ShellCommand::Save(arg),
        "/load" => required(arg, ShellCommand::Load, "/load <id>"),
        "/sessions" => ShellCommand::Sessions,
        "/delete" => required(arg, ShellCommand::Delete, "/delete <id>"),
        "/auto" => ShellCommand::ToggleAutoSave,
        "/eof" => ShellCommand::Eof(arg),
        "/settings" => ShellCommand::Settings,
        "/servers" => ShellCommand::Servers,
        "/tools" => ShellCommand::Tools,
        "/enable" => required(arg, ShellCommand::Enable, "/enable <server>"),
        "/disable" => required(arg, ShellCommand::Disable, "/disable <server>"),
        "/config" => required(arg, ShellCommand::Configure, "/config <server>"),
        // Aliases kept from the per-service setup commands
        "/config-spotify" => ShellCommand::Configure("spotify".to_string()),
        "/config-konyks" => ShellCommand::Configure("konyks".to_string()),
        _ => ShellCommand::Unknown(head.to_string()),
    };
    Some(command)
}

fn required(
    arg: Option<String>,
    build: fn(String) -> ShellCommand,
    usage: &'static str,
) -> ShellCommand {
    match arg {
        Some(arg) => build(arg),
        None => ShellCommand::Usage(usage),
    }
}

fn element_command(
    rest: &str,
    build: fn(Option<usize>) -> ShellCommand,
    usage: &'static str,
) -> ShellCommand {
    let rest = rest.trim();
    if rest.is_empty() {
        return build(None);
    }
    match rest.parse::<usize>() {
        Ok(index) => build(Some(index)),
        Err(_) => ShellCommand::Usage(usage),
    }
}

//! Line-oriented presentation: commands in, rendered session events out.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::broadcast;
use tracing::Level;

use parley_client::{PresentationHooks, SessionController, SessionSnapshot};
use parley_core::events::{PeerPresence, SessionEvent};
use parley_core::ids::UserId;
use parley_core::model::Message;
use parley_telemetry::{parse_level, TelemetryGuard};

pub const HELP: &str = "commands: /login NAME, /users, /select NAME, /leave, /logout, /log MODULE LEVEL, /quit; anything else is sent to the selected peer";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Login(String),
    Users,
    Select(String),
    Leave,
    Logout,
    LogLevel { module: String, level: Level },
    Quit,
    Help,
    Send(String),
    Unknown(String),
}

/// `None` for blank lines.
pub fn parse_command(line: &str) -> Option<Command> {
    if line.trim().is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Send(line.to_string()));
    };
    let (verb, arg) = match rest.split_once(char::is_whitespace) {
        Some((verb, arg)) => (verb, arg.trim()),
        None => (rest, ""),
    };
    let command = match (verb, arg.is_empty()) {
        ("login", false) => Command::Login(arg.to_string()),
        ("select", false) => Command::Select(arg.to_string()),
        ("users", _) => Command::Users,
        ("leave", _) => Command::Leave,
        ("logout", _) => Command::Logout,
        ("log", false) => match arg.split_once(char::is_whitespace) {
            Some((module, level)) => match parse_level(level) {
                Some(level) => Command::LogLevel {
                    module: module.to_string(),
                    level,
                },
                None => Command::Unknown(line.to_string()),
            },
            None => Command::Unknown(line.to_string()),
        },
        ("quit" | "exit", _) => Command::Quit,
        ("help", _) => Command::Help,
        _ => Command::Unknown(line.to_string()),
    };
    Some(command)
}

/// Run one command. Returns `false` when the user asked to quit.
pub async fn execute(session: &SessionController, telemetry: &TelemetryGuard, command: Command) -> bool {
    match command {
        Command::Login(name) => {
            if let Err(e) = session.on_login(&name).await {
                println!("! login failed: {e}");
            }
        }
        Command::Users => {
            let _ = session.refresh_roster().await;
            print_roster(&PresentationHooks::snapshot(session));
        }
        Command::Select(name) => match session.find_peer(&name) {
            Some(peer) => session.on_select_peer(peer).await,
            None => println!("! no such user: {name}"),
        },
        Command::Leave => {
            let _ = session.clear_peer().await;
        }
        Command::Logout => {
            let _ = session.logout();
        }
        Command::LogLevel { module, level } => match telemetry.set_module_level(&module, level) {
            Ok(()) => println!("* {module} now logs at {level}"),
            Err(e) => println!("! {e}"),
        },
        Command::Quit => return false,
        Command::Help => println!("{HELP}"),
        Command::Send(text) => {
            if !session.on_send_message(&text) {
                println!("! not sent (log in and /select a peer first)");
            }
        }
        Command::Unknown(raw) => println!("! unknown command: {raw} ({HELP})"),
    }
    true
}

/// Read commands until EOF or `/quit`.
pub async fn run<R>(
    session: &SessionController,
    telemetry: &TelemetryGuard,
    mut lines: Lines<R>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        let Some(command) = parse_command(&line) else {
            continue;
        };
        if !execute(session, telemetry, command).await {
            break;
        }
    }
    Ok(())
}

/// Print every session event until the controller goes away.
pub async fn render_events(session: Arc<SessionController>, mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = render_event(&event, &PresentationHooks::snapshot(session.as_ref())) {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "renderer lagged, dropped events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub fn render_event(event: &SessionEvent, snapshot: &SessionSnapshot) -> Option<String> {
    let line = match event {
        SessionEvent::LoggedIn { identity } => format!("* logged in as {} (#{})", identity.username, identity.id),
        SessionEvent::LoginFailed { reason } => format!("! login failed: {reason}"),
        SessionEvent::LoggedOut => "* logged out".to_string(),
        SessionEvent::PeerSelected { peer } => format!("* chatting with {}", peer.username),
        SessionEvent::PeerCleared => "* no peer selected".to_string(),
        SessionEvent::PeerPresenceChanged { peer_id, presence } => {
            let name = display_name(*peer_id, snapshot);
            match presence {
                PeerPresence::Unlisted => format!("* {name} is no longer listed"),
                PeerPresence::Listed => format!("* {name} is back"),
            }
        }
        SessionEvent::TimelineReplaced { len } if *len > 0 => {
            let mut out = String::new();
            for (i, message) in snapshot.timeline.iter().enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                out.push_str(&render_message(message, snapshot));
            }
            out
        }
        SessionEvent::MessageAppended { message } => render_message(message, snapshot),
        SessionEvent::ConnectionDropped { reason, .. } => format!("! connection lost: {reason}"),
        SessionEvent::TimelineReplaced { .. }
        | SessionEvent::RosterUpdated { .. }
        | SessionEvent::ConnectionOpened { .. } => return None,
    };
    Some(line)
}

pub fn render_message(message: &Message, snapshot: &SessionSnapshot) -> String {
    format!(
        "[{}] {}: {}",
        message.timestamp.format("%H:%M"),
        display_name(message.sender_id, snapshot),
        message.content
    )
}

fn display_name(id: UserId, snapshot: &SessionSnapshot) -> String {
    if let Some(me) = snapshot.identity.as_ref().filter(|i| i.id == id) {
        return me.username.clone();
    }
    snapshot
        .roster
        .iter()
        .chain(snapshot.peer.iter())
        .find(|e| e.id == id)
        .map_or_else(|| format!("#{id}"), |e| e.username.clone())
}

fn print_roster(snapshot: &SessionSnapshot) {
    if snapshot.roster.is_empty() {
        println!("* nobody else is here");
        return;
    }
    for entry in &snapshot.roster {
        let marker = if snapshot.peer.as_ref().is_some_and(|p| p.id == entry.id) { ">" } else { " " };
        println!("{marker} {}", entry.username);
    }
}

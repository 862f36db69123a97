use std::path::Path;

use hauhub_chat::client::config::ClientConfig;
use hauhub_chat::client::services::chat_controller::{ChatController, ChatHandle};
use hauhub_chat::client::services::event_bus::ChatEvent;
use hauhub_chat::client::services::portal_api::TcpPortalApi;
use hauhub_chat::client::services::transport::WsConnector;
use hauhub_chat::common::models::MessageStatus;
use hauhub_chat::utils::logger::ChatLogger;
use log::error;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

const HELP: &str = concat!(
    "Commands: /switch <group>, /upload <path>, /typing, /retry <clientId>, ",
    "/members, /files, /help, /quit. Anything else is sent as a message."
);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ChatLogger::init();
    let config = ClientConfig::from_env()?;

    let api = TcpPortalApi::spawn(config.api_addr.clone(), config.request_timeout);
    let handle = ChatController::start(&config, api, WsConnector).await?;
    tokio::spawn(print_events(handle.subscribe()));

    println!("[CLIENT] Connected as {}. {}", config.user_id, HELP);
    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = run_command(&handle, line).await {
            error!("[CLIENT] {}", e);
        }
        if line == "/quit" {
            break;
        }
    }
    handle.shutdown();
    Ok(())
}

async fn run_command(handle: &ChatHandle, line: &str) -> anyhow::Result<()> {
    let (command, arg) = match line.split_once(' ') {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };
    match command {
        "/switch" if !arg.is_empty() => handle.switch_group(arg)?,
        "/upload" if !arg.is_empty() => handle.upload_path(Path::new(arg)).await?,
        "/typing" => handle.typing()?,
        "/retry" if !arg.is_empty() => handle.retry(arg)?,
        "/members" => {
            let snapshot = handle.snapshot().await?;
            for member in &snapshot.view.members {
                let dot = if member.is_online { "●" } else { "○" };
                println!("  {} {} ({})", dot, member.name, member.role);
            }
        }
        "/files" => {
            let snapshot = handle.snapshot().await?;
            for file in &snapshot.view.files {
                println!("  {} [{}] {}", file.name, file.mime_type, file.url);
            }
        }
        "/help" => println!("{}", HELP),
        "/quit" => {}
        c if c.starts_with('/') => println!("[CLIENT] Invalid command syntax. {}", HELP),
        _ => handle.send_message(line)?,
    }
    Ok(())
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<ChatEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(n)) => {
                println!("[CLIENT] ({} events skipped)", n);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            ChatEvent::Connection(state) => println!("[CLIENT] connection: {:?}", state),
            ChatEvent::Switch(state) => println!("[CLIENT] group: {:?}", state),
            ChatEvent::GroupLoaded { group, history } => {
                println!(
                    "== {} · {} · {} ({} messages)",
                    group.name, group.course_code, group.instructor, history
                )
            }
            ChatEvent::MessageAdded(m) => {
                let time = chrono::DateTime::from_timestamp_millis(m.timestamp)
                    .map(|t| t.format("%H:%M").to_string())
                    .unwrap_or_default();
                let marker = if m.status == MessageStatus::Pending {
                    " …"
                } else {
                    ""
                };
                println!("[{}] {}: {}{}", time, m.sender_name, m.content, marker);
            }
            ChatEvent::MessageStatusChanged { client_id, status } => {
                if status == MessageStatus::Failed {
                    println!(
                        "[CLIENT] message {} failed, /retry {} to resend",
                        client_id, client_id
                    );
                }
            }
            ChatEvent::MemberPresence { user_id, online } => {
                let presence = if online { "online" } else { "offline" };
                println!("[CLIENT] {} is {}", user_id, presence)
            }
            ChatEvent::Typing { name, .. } => println!("[CLIENT] {} is typing…", name),
            ChatEvent::FileAdded(file) => {
                println!("[CLIENT] file: {} ({})", file.name, file.url)
            }
            ChatEvent::Notification(n) => println!("[{:?}] {}", n.level, n.text),
        }
    }
}

//! # roomcast-chat
//!
//! Line-based terminal chat for a roomcast relay.
//!
//! ```bash
//! ROOMCAST_URL=ws://127.0.0.1:3000/ws roomcast-chat
//! ```
//!
//! Type to talk in the current room. Commands: `/join <room>`, `/rooms`,
//! `/clear`, `/login <name>`, `/logout`, `/whoami`, `/quit`.

use anyhow::{Context, Result};
use roomcast_client::{
    ChatSession, ClientConfig, ClientEvent, RelayClient, SessionUpdate, SoftLogin,
};
use roomcast_protocol::{ChatMessage, CHAT_ROOMS};
use roomcast_transport::WebSocketConnector;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

enum Input {
    Line(Option<String>),
    Event(Option<ClientEvent>),
}

fn render(session: &ChatSession, message: &ChatMessage) -> String {
    let who = message.from_name.as_deref().unwrap_or(&message.from);
    let mine = if session.controller().is_mine(message) {
        " (you)"
    } else {
        ""
    };
    format!("[#{}] {}{}: {}", message.conversation_id, who, mine, message.text)
}

async fn command(session: &mut ChatSession, login: &mut SoftLogin, line: &str) -> Result<bool> {
    let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
    match cmd {
        "/quit" => return Ok(false),
        "/rooms" => {
            let active = session.controller().active_room().clone();
            for room in CHAT_ROOMS {
                let marker = if active == room { "*" } else { " " };
                println!("{} {}", marker, room);
            }
        }
        "/join" => match session.select_room(arg).await {
            Ok(()) => println!("-- joined #{}", session.controller().active_room()),
            Err(e) => println!("-- join failed: {}", e),
        },
        "/clear" => session.clear_messages(),
        "/login" => match login.login(arg) {
            Ok(user) => {
                println!("-- logged in as {}", user.name);
                session.set_display_name(Some(user.name.clone()));
                let room = session.controller().active_room().to_string();
                if let Err(e) = session.select_room(&room).await {
                    println!("-- join failed: {}", e);
                }
            }
            Err(e) => println!("-- login failed: {}", e),
        },
        "/logout" => {
            login.logout().context("Failed to clear soft login")?;
            if let Err(e) = session.logout().await {
                println!("-- leave failed: {}", e);
            }
            println!("-- logged out");
        }
        "/whoami" => {
            let name = login.current().map_or("(anonymous)", |u| u.name.as_str());
            let id = session.controller().connection_id().unwrap_or("(offline)");
            println!("-- {} on {}", name, id);
        }
        _ => println!("-- unknown command {}", cmd),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ClientConfig::from_env();
    let connector = WebSocketConnector::new(config.url.clone());
    let mut login = SoftLogin::open(SoftLogin::default_path());

    let (client, events) = RelayClient::start(connector, config);
    let mut session = ChatSession::new(client, events);
    if let Some(user) = login.current() {
        println!("-- welcome back, {}", user.name);
        session.set_display_name(Some(user.name.clone()));
    }
    let initial = session.controller().active_room().to_string();
    session.select_room(&initial).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let input = tokio::select! {
            line = lines.next_line() => Input::Line(line.context("Failed to read stdin")?),
            event = session.recv_event() => Input::Event(event),
        };

        match input {
            Input::Line(None) => break,
            Input::Line(Some(line)) => {
                let line = line.trim();
                if line.starts_with('/') {
                    if !command(&mut session, &mut login, line).await? {
                        break;
                    }
                } else {
                    match session.send(line).await {
                        Ok(Some(ack)) => {
                            if let Some(reason) = ack.error_message() {
                                println!("-- rejected: {}", reason);
                            }
                        }
                        Ok(None) if session.controller().joined().is_none() => {
                            println!("-- /join a room first");
                        }
                        Ok(None) => {}
                        Err(e) => println!("-- not sent: {}", e),
                    }
                }
            }
            Input::Event(None) => break,
            Input::Event(Some(event)) => match session.apply(event).await {
                Some(SessionUpdate::Connected {
                    connection_id,
                    rejoined,
                }) => {
                    println!("-- connected as {}", connection_id);
                    if let Some(room) = rejoined {
                        println!("-- rejoined #{}", room);
                    }
                }
                Some(SessionUpdate::Disconnected) => println!("-- disconnected, retrying"),
                Some(SessionUpdate::ConnectError { reason }) => {
                    println!("-- cannot reach relay: {}", reason)
                }
                Some(SessionUpdate::Message(message)) => {
                    println!("{}", render(&session, &message))
                }
                None => {}
            },
        }
    }

    session.shutdown().await;
    Ok(())
}

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use lesson_chat::client::config::ClientConfig;
use lesson_chat::client::services::call_session::CallSession;
use lesson_chat::client::services::chat_session::ChatSession;
use lesson_chat::client::services::lessons::{complete_lesson, CourseOverview};
use lesson_chat::client::services::presence_store::{MemoryPresenceStore, PresenceStore, RedisPresenceStore};
use lesson_chat::client::services::realtime_channel::ChannelManager;
use lesson_chat::client::services::rest_gateway::{HttpGateway, RestGateway};
use lesson_chat::client::services::ringer::LogRinger;
use lesson_chat::client::utils::session_store::SessionStore;
use lesson_chat::common::{ChatPartner, ClientError, Identity, Role, UserId};

const HELP: &str = "Commands: <text> | /partner <id> | /history | /call | /offer <sdp> | /connected | /accept | /decline | /end | /assign <course> <text> | /course <id> | /done <lesson> | /logout | /help | /quit";

fn read_identity() -> anyhow::Result<Identity> {
    let user_id: UserId = std::env::var("USER_ID")
        .context("USER_ID is not set")?
        .trim()
        .parse()
        .context("USER_ID must be a number")?;
    let role: Role = std::env::var("USER_ROLE")
        .context("USER_ROLE is not set")?
        .parse()
        .map_err(anyhow::Error::msg)?;
    Ok(Identity::new(user_id, role))
}

async fn presence_store(config: &ClientConfig) -> Arc<dyn PresenceStore> {
    match RedisPresenceStore::new(&config.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::warn!("[PRESENCE] Redis unavailable ({}), calls are limited to this process", e);
            Arc::new(MemoryPresenceStore::new())
        }
    }
}

fn report(result: Result<(), ClientError>) {
    if let Err(e) = result {
        println!("[CLIENT] {}", e);
    }
}

async fn pick_partner(chat: &ChatSession, roster: &[ChatPartner], id: UserId) -> Option<ChatPartner> {
    if let Some(found) = roster.iter().find(|p| p.id == id) {
        return Some(found.clone());
    }
    match chat.roster().await {
        Ok(students) => students.into_iter().find(|p| p.id == id),
        Err(_) => None,
    }
}

fn print_messages(identity: Identity, chat: Arc<ChatSession>) -> tokio::task::JoinHandle<()> {
    let mut updates = chat.updates();
    tokio::spawn(async move {
        let mut printed = HashSet::new();
        while updates.changed().await.is_ok() {
            for message in chat.messages().await {
                if !printed.insert(message.id) {
                    continue;
                }
                let who = if message.sent_by == identity.role { "me" } else { message.sent_by.as_str() };
                println!("[{}] {}: {}", message.created_at.format("%H:%M"), who, message.content);
            }
        }
    })
}

fn print_call_states(call: &CallSession) -> tokio::task::JoinHandle<()> {
    let mut states = call.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            println!("[CALL] {:?}", state);
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env();
    env_logger::Builder::new().parse_filters(&config.log_level).init();

    let identity = read_identity()?;
    let mut session = match std::env::var("AUTH_TOKEN") {
        Ok(token) if !token.trim().is_empty() => SessionStore::login(identity, token),
        _ => SessionStore::restore(identity),
    };
    if session.token().is_none() {
        log::warn!("[CLIENT] No session token, requests will be sent unauthenticated");
    }

    let manager = ChannelManager::new();
    let lease = manager.acquire(&config, identity, session.token().map(str::to_string));
    let gateway: Arc<dyn RestGateway> = Arc::new(HttpGateway::new(&config, session.token().map(str::to_string))?);

    let chat = Arc::new(ChatSession::new(identity, gateway.clone(), lease.hub().clone()));
    let call = CallSession::new(identity.user_id, presence_store(&config).await, Arc::new(LogRinger::new()));
    let message_printer = print_messages(identity, chat.clone());
    let state_printer = print_call_states(&call);

    let mut roster = Vec::new();
    match identity.role {
        Role::Student => {
            if let Ok(Some(teacher)) = chat.resolve_assigned_teacher().await {
                println!("[CLIENT] Chatting with {}", teacher.display_name());
                call.set_partner(Some(teacher.id)).await;
            }
        }
        Role::Teacher => {
            roster = chat.roster().await.unwrap_or_default();
            for student in &roster {
                println!("[CLIENT] Student {}: {}", student.id, student.display_name());
            }
        }
    }
    println!("{}", HELP);

    let mut input = BufReader::new(stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = input.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match command {
            "/quit" => break,
            "/logout" => {
                report(session.logout());
                break;
            }
            "/help" => println!("{}", HELP),
            "/partner" => {
                let Ok(id) = rest.parse::<UserId>() else {
                    println!("[CLIENT] Usage: /partner <id>");
                    continue;
                };
                let partner = pick_partner(&chat, &roster, id)
                    .await
                    .unwrap_or_else(|| ChatPartner::new(id, "", ""));
                call.set_partner(Some(partner.id)).await;
                report(chat.select_partner(partner).await);
            }
            "/history" => report(chat.load_history().await),
            "/call" => match call.start_call().await {
                Ok(room) => println!("[CALL] Calling in room {}", room),
                Err(e) => println!("[CLIENT] {}", e),
            },
            "/offer" => report(call.send_offer(rest).await.map(|_| ())),
            "/connected" => report(call.connected().await),
            "/accept" => report(call.accept().await.map(|_| ())),
            "/decline" => report(call.decline().await),
            "/end" => report(call.end_call().await),
            "/assign" => {
                let Some((course, text)) = rest.split_once(' ') else {
                    println!("[CLIENT] Usage: /assign <course> <text>");
                    continue;
                };
                let Ok(course_id) = course.parse() else {
                    println!("[CLIENT] Usage: /assign <course> <text>");
                    continue;
                };
                report(chat.send_assignment(course_id, text).await);
            }
            "/course" => {
                let Ok(course_id) = rest.parse() else {
                    println!("[CLIENT] Usage: /course <id>");
                    continue;
                };
                if let Ok(overview) = CourseOverview::load(gateway.as_ref(), course_id).await {
                    println!("[COURSE] {}% completed", overview.percent());
                    for status in &overview.lessons {
                        let mark = if status.completed { "x" } else { " " };
                        println!("  [{}] {} {}", mark, status.lesson.id, status.lesson.title);
                    }
                }
            }
            "/done" => {
                let Ok(lesson_id) = rest.parse() else {
                    println!("[CLIENT] Usage: /done <lesson>");
                    continue;
                };
                report(complete_lesson(gateway.as_ref(), lesson_id).await);
            }
            _ if command.starts_with('/') => println!("[CLIENT] Unknown command. {}", HELP),
            _ => report(chat.send(line).await.map(|_| ())),
        }
    }

    call.shutdown().await;
    chat.shutdown().await;
    message_printer.abort();
    state_printer.abort();
    drop(lease);
    Ok(())
}

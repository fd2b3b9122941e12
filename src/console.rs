use anyhow::Result;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::config::Config;
use crate::conversation::Role;
use crate::messages::{SessionCommand, SessionEvent};
use crate::session::Session;

const HELP: &str = "\
Type a message and press Enter to send it.
  /new            start a new conversation (/new! discards unsaved messages)
  /save           save the conversation
  /saveas TITLE   save under a new title (/saveas! overwrites)
  /load NAME      load a saved conversation
  /delete NAME    delete a saved conversation
  /list           list saved conversations
  /set KEY VALUE  change a setting
  /prompt TEXT    replace the system prompt
  /help           show this help
  /quit           exit";

#[derive(Debug, PartialEq)]
pub enum Input {
    Command(SessionCommand),
    Help,
    Empty,
    Invalid(String),
}

/// Interpret one line typed at the prompt.
pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Input::Command(SessionCommand::Send(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let cmd = match name {
        "new" => SessionCommand::NewConversation {
            discard_unsaved: false,
        },
        "new!" => SessionCommand::NewConversation {
            discard_unsaved: true,
        },
        "save" => SessionCommand::Save,
        "saveas" | "saveas!" if arg.is_empty() => {
            return Input::Invalid("usage: /saveas TITLE".to_string())
        }
        "saveas" => SessionCommand::SaveAs {
            title: arg.to_string(),
            overwrite: false,
        },
        "saveas!" => SessionCommand::SaveAs {
            title: arg.to_string(),
            overwrite: true,
        },
        "load" | "delete" if arg.is_empty() => {
            return Input::Invalid(format!("usage: /{} NAME", name))
        }
        "load" => SessionCommand::Load(arg.to_string()),
        "delete" => SessionCommand::Delete(arg.to_string()),
        "list" => SessionCommand::List,
        "set" => match arg.split_once(char::is_whitespace) {
            Some((key, value)) => SessionCommand::SetSetting {
                key: key.to_string(),
                value: value.trim().to_string(),
            },
            // A bare key clears the value, e.g. `/set elevenlabs_voice_id`
            None if !arg.is_empty() => SessionCommand::SetSetting {
                key: arg.to_string(),
                value: String::new(),
            },
            None => return Input::Invalid("usage: /set KEY VALUE".to_string()),
        },
        "prompt" if arg.is_empty() => return Input::Invalid("usage: /prompt TEXT".to_string()),
        "prompt" => SessionCommand::SetSystemPrompt(arg.to_string()),
        "help" | "?" => return Input::Help,
        "quit" | "exit" => SessionCommand::Quit,
        other => return Input::Invalid(format!("unknown command /{} (try /help)", other)),
    };

    Input::Command(cmd)
}

/// Render one session event as console text.
pub fn render(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Thinking => "… thinking".to_string(),
        SessionEvent::AssistantReply { name, content } => format!("{}: {}", name, content),
        SessionEvent::TurnFailed(msg) => format!("! No reply: {}", msg),
        SessionEvent::ConversationCleared => "-- New conversation --".to_string(),
        SessionEvent::ConversationLoaded {
            title,
            assistant_name,
            messages,
        } => {
            let mut out = format!("-- {} --", title);
            for message in messages {
                let speaker = match message.role {
                    Role::User => "You",
                    Role::Assistant => assistant_name.as_str(),
                    Role::System => "System",
                };
                out.push_str(&format!("\n{}: {}", speaker, message.content));
            }
            out
        }
        SessionEvent::Saved { title, path } => {
            format!("Saved '{}' to {}", title, path.display())
        }
        SessionEvent::Transcripts(list) if list.is_empty() => {
            "No saved conversations.".to_string()
        }
        SessionEvent::Transcripts(list) => list
            .iter()
            .map(|s| format!("  {}", s))
            .collect::<Vec<_>>()
            .join("\n"),
        SessionEvent::Notice(msg) => msg.clone(),
        SessionEvent::Error(msg) => format!("! {}", msg),
    }
}

/// Interactive chat on stdin/stdout.
pub async fn run(config: Config, config_path: PathBuf) -> Result<()> {
    let (cmd_tx, cmd_rx) = async_channel::bounded::<SessionCommand>(32);
    let (event_tx, event_rx) = async_channel::bounded::<SessionEvent>(64);

    let session = Session::new(config, Some(config_path), event_tx)?;
    let mut session_task = tokio::spawn(session.run(cmd_rx));

    let printer = tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            println!("{}", render(&event));
        }
        debug!("Session event channel closed");
    });

    println!("voxchat: type /help for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut session_done = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => match parse_input(&line) {
                        Input::Command(cmd) => {
                            let quit = matches!(cmd, SessionCommand::Quit);
                            if cmd_tx.send(cmd).await.is_err() || quit {
                                break;
                            }
                        }
                        Input::Help => println!("{}", HELP),
                        Input::Invalid(msg) => println!("! {}", msg),
                        Input::Empty => {}
                    },
                    // Closing the channel lets the session finish a pending reply
                    None => {
                        info!("End of input");
                        break;
                    }
                }
            }
            result = &mut session_task => {
                session_done = true;
                result??;
                break;
            }
        }
    }

    drop(cmd_tx);
    if !session_done {
        session_task.await??;
    }
    printer.await?;
    Ok(())
}

use std::io::Write;
use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use mystery_cast::console::{Command, Console, ConsoleEvent, HELP};
use mystery_cast::engine::OpenAiEngine;
use mystery_cast::manager::CharacterManager;
use mystery_cast::mystery::Mystery;
use mystery_cast::settings::Settings;
use mystery_cast::{logging, session::LifecycleState};
use tokio::sync::mpsc;

const DEFAULT_MYSTERY_PATH: &str = "./data/mystery.json";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Using default settings ({})", e);
            let settings = Settings::default();
            settings.save()?;
            settings
        }
    };
    logging::init(settings.debug_mode)?;
    log::info!("mystery_cast start: {}", chrono::Local::now());

    let mystery_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_MYSTERY_PATH.to_string());
    let mystery = Mystery::load_from_file(&mystery_path)
        .wrap_err_with(|| format!("Failed to load mystery from {}", mystery_path))?;
    println!("{}", mystery.metadata.title);
    if !mystery.metadata.context.is_empty() {
        println!("{}", mystery.metadata.context);
    }

    let engine = Arc::new(OpenAiEngine::new(&settings.engine));
    let manager = Arc::new(CharacterManager::new(engine.clone(), &settings));
    let build = manager.build_roster(Arc::new(mystery));

    let starter = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = engine.start().await {
                log::error!("Inference server did not answer: {}", e);
                eprintln!("Inference server did not answer: {}", e);
            }
        })
    };

    let mut console = Console::new();
    console.start();
    let mut ready = manager.roster_ready();

    loop {
        tokio::select! {
            changed = ready.changed() => {
                if changed.is_ok() && *ready.borrow_and_update() {
                    println!(
                        "{}/{} characters ready. Type /help for commands.",
                        manager.ready_count(),
                        manager.registered_characters().len()
                    );
                }
            }
            event = console.next() => {
                let Some(event) = event else { break };
                match event {
                    ConsoleEvent::Line(line) => {
                        if !handle_line(&manager, &line).await? {
                            break;
                        }
                    }
                    ConsoleEvent::Closed => break,
                    ConsoleEvent::Error => eprintln!("Could not read input"),
                    ConsoleEvent::Init => {}
                }
            }
        }
    }

    console.stop().await;
    manager.teardown().await;
    starter.abort();
    if let Err(e) = build.await {
        log::warn!("Roster build task ended abnormally: {}", e);
    }
    log::info!("mystery_cast exit: {}", chrono::Local::now());
    Ok(())
}

// Returns false when the user asked to leave.
async fn handle_line(manager: &CharacterManager, line: &str) -> Result<bool> {
    let Some(command) = Command::parse(line) else {
        return Ok(true);
    };

    let current = manager.current_character();
    let saving = command == Command::Save;
    match command {
        Command::Help => println!("{}", HELP),
        Command::List => {
            for id in manager.registered_characters() {
                let state = manager.state(&id).unwrap_or(LifecycleState::Uninitialized);
                let name = manager
                    .session(&id)
                    .map(|session| session.display_name().to_string())
                    .unwrap_or_default();
                println!("{:<24} {:<24} {}", id, name, state);
            }
        }
        Command::Switch(id) => match manager.switch_to(&id).await {
            Some(session) => println!("Now talking to {}.", session.display_name()),
            None => println!("Cannot switch to {} right now.", id),
        },
        Command::Reset => match current {
            Some(session) => {
                manager.reset(session.id()).await?;
                println!("{} has forgotten the conversation.", session.display_name());
            }
            None => println!("Nobody to reset."),
        },
        Command::Retry(id) => match manager.retry(&id).await {
            Ok(state) => println!("{} is now {}.", id, state),
            Err(e) => println!("{}", e),
        },
        Command::Fault(id) => match manager.report_fault(&id) {
            Ok(true) => println!("{} marked as failed.", id),
            Ok(false) => println!("{} was not ready.", id),
            Err(e) => println!("{}", e),
        },
        Command::Save | Command::Load => match current {
            Some(session) => {
                let result = if saving {
                    manager.save_conversation(session.id()).await
                } else {
                    manager.load_conversation(session.id()).await
                };
                match result {
                    Ok(()) => println!("Done."),
                    Err(e) => println!("{}", e),
                }
            }
            None => println!("Switch to a character first."),
        },
        Command::Debug => print!("{}", manager.debug_info()),
        Command::Quit => return Ok(false),
        Command::Say(text) => match current {
            Some(session) => {
                let (tokens_tx, mut tokens_rx) = mpsc::unbounded_channel::<String>();
                let printer = tokio::spawn(async move {
                    while let Some(token) = tokens_rx.recv().await {
                        print!("{}", token);
                        let _ = std::io::stdout().flush();
                    }
                    println!();
                });
                print!("{}: ", session.display_name());
                let reply = session.chat(&text, tokens_tx).await;
                printer.await?;
                if let Err(e) = reply {
                    log::error!("Chat with {} failed: {}", session.id(), e);
                    println!("({})", e);
                }
            }
            None => println!("Switch to a character first (/list, /switch <id>)."),
        },
        Command::Unknown(line) => println!("Unknown command {}. Type /help.", line),
    }
    Ok(true)
}

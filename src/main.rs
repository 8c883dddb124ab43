use std::path::{Path, PathBuf};
use std::sync::Arc;

use quest_script::config::QuestConfig;
use quest_script::quest::{
    HotReloadEvent, QuestEvent, QuestManager, QuestSnapshot, QuestStatus, ScriptLibrary,
    StateHandle, TracingSink,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::Receiver;
use tracing::{error, info, warn};

/// A line typed at the prompt
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Enter { quest_id: String, state: StateHandle },
    Update { quest_id: String },
    Status { quest_id: String, status: QuestStatus },
    Reset { quest_id: String },
    Save { quest_id: String },
    Restore { path: PathBuf },
    List,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let command = match words.as_slice() {
        ["enter", quest_id, state] => {
            let state: i64 = state
                .parse()
                .map_err(|_| format!("'{}' is not a state handle", state))?;
            Command::Enter { quest_id: quest_id.to_string(), state: StateHandle::new(state) }
        }
        ["update", quest_id] => Command::Update { quest_id: quest_id.to_string() },
        ["status", quest_id, status] => {
            let status = QuestStatus::from_str(status)
                .ok_or_else(|| format!("unknown status '{}'", status))?;
            Command::Status { quest_id: quest_id.to_string(), status }
        }
        ["reset", quest_id] => Command::Reset { quest_id: quest_id.to_string() },
        ["save", quest_id] => Command::Save { quest_id: quest_id.to_string() },
        ["restore", path] => Command::Restore { path: PathBuf::from(path) },
        ["list"] => Command::List,
        ["quit"] | ["exit"] => Command::Quit,
        _ => {
            return Err(
                "commands: enter <quest> <state> | update <quest> | status <quest> <status> | \
                 reset <quest> | save <quest> | restore <file> | list | quit"
                    .to_string(),
            )
        }
    };
    Ok(command)
}

fn print_events(events: &[QuestEvent]) {
    for event in events {
        match serde_json::to_string(event) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("Failed to encode {} event: {}", event.event_type(), e),
        }
    }
}

fn print_list(manager: &QuestManager) {
    for quest_id in manager.quest_ids() {
        let status = manager.status(&quest_id).map_or("?", |s| s.as_str());
        match manager.current_state(&quest_id) {
            Some(state) => println!("{} [{}] state {}", quest_id, status, state),
            None => println!("{} [{}]", quest_id, status),
        }
    }
}

fn read_snapshot(path: &Path) -> Result<QuestSnapshot, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
    QuestSnapshot::from_json(&json).map_err(|e| format!("{:?}: {}", path, e))
}

/// Run one command. Returns false when the session should end.
fn execute(manager: &mut QuestManager, command: Command) -> bool {
    let result = match command {
        Command::Enter { quest_id, state } => manager.request_state(&quest_id, state),
        Command::Update { quest_id } => manager.update(&quest_id),
        Command::Status { quest_id, status } => manager.set_status(&quest_id, status),
        Command::Reset { quest_id } => manager.reset(&quest_id),
        Command::Save { quest_id } => {
            match manager.snapshot(&quest_id).and_then(|s| s.to_json()) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("Failed to save quest '{}': {}", quest_id, e),
            }
            return true;
        }
        Command::Restore { path } => match read_snapshot(&path) {
            Ok(snapshot) => manager.restore(&snapshot),
            Err(e) => {
                error!("{}", e);
                return true;
            }
        },
        Command::List => {
            print_list(manager);
            return true;
        }
        Command::Quit => return false,
    };

    match result {
        Ok(events) => print_events(&events),
        Err(e) => error!("{}", e),
    }
    true
}

/// Pick up quests and scripts after the library reloaded
async fn apply_reload(manager: &mut QuestManager, library: &ScriptLibrary) {
    manager.register_scripts(library.script_factories().await);

    for quest_id in manager.load_quests(library.definitions().await) {
        match manager.initialize(&quest_id) {
            Ok(events) => print_events(&events),
            Err(e) => warn!("Failed to initialize quest '{}': {}", quest_id, e),
        }
    }
}

async fn next_reload(rx: &mut Option<Receiver<HotReloadEvent>>) -> Option<HotReloadEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "quest_script=info".parse::<tracing_subscriber::filter::Directive>() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match QuestConfig::load(Path::new("quest.toml")) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config: {}", e);
            QuestConfig::default()
        }
    };
    info!("Using data directory {:?}", config.data_dir);

    // Load quest definitions and scripts
    let library = Arc::new(ScriptLibrary::new(&config.data_dir));
    if let Err(e) = library.load_all().await {
        error!("Failed to load quest library: {}", e);
    }

    let mut manager = QuestManager::new(Arc::new(TracingSink));
    manager.register_scripts(library.script_factories().await);
    manager.load_quests(library.definitions().await);
    print_events(&manager.initialize_all());

    let mut reloads = if config.hot_reload {
        match library.start_file_watcher() {
            Ok(rx) => {
                info!("Quest hot-reload enabled");
                Some(rx)
            }
            Err(e) => {
                warn!("Failed to start quest hot-reload: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(command) => {
                        if !execute(&mut manager, command) {
                            break;
                        }
                    }
                    Err(usage) => println!("{}", usage),
                }
            }
            Some(event) = next_reload(&mut reloads) => match event {
                HotReloadEvent::Reloaded(path) => {
                    info!("Quest hot-reload: {}", path);
                    apply_reload(&mut manager, &library).await;
                }
                HotReloadEvent::Error(e) => error!("Quest hot-reload error: {}", e),
            },
        }
    }

    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("enter greeting 1").unwrap(),
            Command::Enter { quest_id: "greeting".to_string(), state: StateHandle::new(1) }
        );
        assert_eq!(
            parse_command("  status greeting Finished ").unwrap(),
            Command::Status { quest_id: "greeting".to_string(), status: QuestStatus::Finished }
        );
        assert_eq!(parse_command("list").unwrap(), Command::List);
        assert_eq!(parse_command("exit").unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_command("enter greeting one").unwrap_err().contains("not a state handle"));
        assert!(parse_command("status greeting paused").unwrap_err().contains("unknown status"));
        assert!(parse_command("dance").unwrap_err().starts_with("commands:"));
    }
}

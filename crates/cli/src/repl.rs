//! Interactive command loop.
//!
//! Each command maps to one client operation. Errors are printed with
//! their kind and message and the loop keeps accepting input; only `quit`
//! or end-of-input exits.

use serde_json::{json, Value};

use semem_client::protocol::ToolCallResult;
use semem_client::{ClientConfig, Session};

use crate::tools;

/// Run the REPL until `quit` or Ctrl+D.
pub async fn run(config: &ClientConfig) -> anyhow::Result<()> {
    let session = Session::connect(config).await?;

    let history_path = dirs::home_dir()
        .unwrap_or_default()
        .join(".semem")
        .join("history.txt");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    eprintln!("Semem interactive client");
    eprintln!(
        "{} tools discovered  |  type `help` for commands, `quit` to exit",
        session.tools().len()
    );
    eprintln!();

    loop {
        match rl.readline("semem> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();
                if exec(&session, trimmed).await {
                    break;
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or `quit` to exit)");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {e}");
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    session.close().await;
    eprintln!("Goodbye!");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Command dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execute one command line. Returns `true` if the REPL should exit.
async fn exec(session: &Session, line: &str) -> bool {
    let (cmd, rest) = split_command(line);

    let outcome = match cmd {
        "quit" | "exit" => return true,
        "help" => {
            print_help();
            return false;
        }
        "list" => list(session).await,
        "store" => match rest {
            Some(text) => call(session, tools::STORE, json!({ "prompt": text, "response": "" })).await,
            None => usage("store <text>"),
        },
        "embed" => match rest {
            Some(text) => call(session, tools::EMBED, json!({ "text": text })).await,
            None => usage("embed <text>"),
        },
        "concepts" => match rest {
            Some(text) => call(session, tools::CONCEPTS, json!({ "text": text })).await,
            None => usage("concepts <text>"),
        },
        "search" => match rest {
            Some(query) => call(session, tools::SEARCH, json!({ "query": query, "limit": 5 })).await,
            None => usage("search <query>"),
        },
        "read" => match rest {
            Some(uri) => read(session, uri).await,
            None => usage("read <uri>"),
        },
        "call" => match rest {
            Some(rest) => call_raw(session, rest).await,
            None => usage("call <tool> [json-args]"),
        },
        other => {
            eprintln!("unknown command: {other}  (type `help` for a list)");
            return false;
        }
    };

    if let Err(e) = outcome {
        // Print the error and keep the loop alive.
        eprintln!("error: {e}");
    }
    false
}

fn split_command(line: &str) -> (&str, Option<&str>) {
    match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => {
            let rest = rest.trim();
            (cmd, (!rest.is_empty()).then_some(rest))
        }
        None => (line, None),
    }
}

fn usage(text: &str) -> anyhow::Result<()> {
    eprintln!("usage: {text}");
    Ok(())
}

fn print_help() {
    eprintln!("Commands:");
    eprintln!("  list               List the server's tools");
    eprintln!("  store <text>       Store an interaction ({})", tools::STORE);
    eprintln!("  embed <text>       Generate an embedding ({})", tools::EMBED);
    eprintln!("  concepts <text>    Extract concepts ({})", tools::CONCEPTS);
    eprintln!("  search <query>     Search stored memories ({})", tools::SEARCH);
    eprintln!("  read <uri>         Read a resource (e.g. {})", tools::STATUS_URI);
    eprintln!("  call <tool> [json] Call any tool with raw JSON arguments");
    eprintln!("  quit               Exit");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn list(session: &Session) -> anyhow::Result<()> {
    for tool in session.list_tools().await? {
        println!("{:<32} {}", tool.name, tool.description);
    }
    Ok(())
}

async fn call(session: &Session, name: &str, arguments: Value) -> anyhow::Result<()> {
    let result = session.call_tool(name, arguments).await?;
    print_result(&result);
    Ok(())
}

async fn call_raw(session: &Session, rest: &str) -> anyhow::Result<()> {
    let (name, args) = split_command(rest);
    let arguments: Value = match args {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("arguments are not valid JSON: {e}"))?,
        None => json!({}),
    };
    call(session, name, arguments).await
}

async fn read(session: &Session, uri: &str) -> anyhow::Result<()> {
    for content in session.read_resource(uri).await?.contents {
        match content.text {
            Some(text) => println!("{text}"),
            None => println!("({} binary)", content.mime_type.as_deref().unwrap_or("unknown")),
        }
    }
    Ok(())
}

/// Print the common `{content: [{type: "text", ..}]}` shape as plain text,
/// anything else as pretty JSON.
fn print_result(result: &Value) {
    if let Ok(parsed) = serde_json::from_value::<ToolCallResult>(result.clone()) {
        if !parsed.content.is_empty() {
            for item in &parsed.content {
                if item.content_type == "text" {
                    println!("{}", item.text);
                }
            }
            if parsed.is_error {
                eprintln!("(tool reported an error)");
            }
            return;
        }
    }
    match serde_json::to_string_pretty(result) {
        Ok(pretty) => println!("{pretty}"),
        Err(_) => println!("{result}"),
    }
}

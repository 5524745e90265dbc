//! Batch demo runner.
//!
//! Executes a fixed sequence of calls against the server and prints each
//! result. Later steps depend on earlier ones, so the first failure is
//! reported and the run halts (fail-fast, non-zero exit).

use serde_json::json;

use semem_client::{ClientConfig, ClientError, Session};

use crate::tools;

const SAMPLE_TEXT: &str =
    "Semantic memory stores interactions as embeddings so they can be retrieved by meaning.";

pub async fn run(config: &ClientConfig) -> anyhow::Result<()> {
    let session = Session::connect(config).await?;
    let outcome = run_steps(&session).await;
    session.close().await;
    outcome
}

async fn run_steps(session: &Session) -> anyhow::Result<()> {
    let mut step = 0;
    let mut next = |label: &str| {
        step += 1;
        eprintln!("[{step}] {label}");
        (step, label.to_string())
    };

    let (n, label) = next("read server status");
    match session.read_resource(tools::STATUS_URI).await {
        Ok(result) => {
            for content in result.contents {
                if let Some(text) = content.text {
                    println!("{text}");
                }
            }
        }
        // A server without a status resource is fine; everything else halts.
        Err(ClientError::NotFound(_)) => eprintln!("    (no status resource)"),
        Err(e) => return fail(n, &label, e),
    }

    let (n, label) = next("list tools");
    let catalog = match session.list_tools().await {
        Ok(catalog) => catalog,
        Err(e) => return fail(n, &label, e),
    };
    println!("{} tools", catalog.len());
    for tool in &catalog {
        println!("  {}", tool.name);
    }

    let calls = [
        ("store an interaction", tools::STORE, json!({ "prompt": SAMPLE_TEXT, "response": "" })),
        ("generate an embedding", tools::EMBED, json!({ "text": SAMPLE_TEXT })),
        ("extract concepts", tools::CONCEPTS, json!({ "text": SAMPLE_TEXT })),
        ("search memories", tools::SEARCH, json!({ "query": "semantic memory", "limit": 5 })),
    ];
    for (label, tool, arguments) in calls {
        let (n, label) = next(label);
        match session.call_tool(tool, arguments).await {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => return fail(n, &label, e),
        }
    }

    eprintln!("batch complete");
    Ok(())
}

fn fail(step: usize, label: &str, err: ClientError) -> anyhow::Result<()> {
    Err(anyhow::anyhow!("step {step} ({label}) failed: {err}"))
}

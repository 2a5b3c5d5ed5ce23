// ABOUTME: Interactive console for the emris task manager.
// ABOUTME: Reads emris.json, starts the refill loop, forwards commands to the service.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use rustyline::DefaultEditor;
use tracing_subscriber::{EnvFilter, fmt};

use emris::prelude::*;

const HELP: &str = "\
commands:
  admin <token>
  user add <id> <resources> <rewards> <tokens>
  user show <id>
  user set <id> <resources>
  model add <id> <min_resources>
  model chunk <id> <index> <data>
  model activate <id>
  model deactivate <id>
  model show <id>
  model list [offset] [limit]
  model needy [offset] [limit]
  chunk done <model> <index> <worker>
  submit [--training] <task> <owner> <model> [payload...]
  result <task> <output...>
  fail <task> <reason...>
  task <id>
  tasks <owner>
  tick
  quit";

fn find_config() -> Option<PathBuf> {
    let local = PathBuf::from("emris.json");
    if local.exists() {
        return Some(local);
    }

    if let Some(home) = dirs::home_dir() {
        let global = home.join(".emris.json");
        if global.exists() {
            return Some(global);
        }
    }

    None
}

fn load_config() -> Result<ServiceConfig> {
    let mut config = match find_config() {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            ServiceConfig::from_file(&path)?
        }
        None => ServiceConfig::default(),
    };

    if let Ok(token) = std::env::var("EMRIS_ADMIN_TOKEN") {
        config = config.admin_token(token);
    }
    Ok(config)
}

struct Session {
    service: TaskManagerService,
    admin_token: String,
}

fn arg<'a>(args: &[&'a str], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .copied()
        .with_context(|| format!("missing <{}>", name))
}

fn num<T: std::str::FromStr>(args: &[&str], index: usize, name: &str) -> Result<T> {
    let raw = arg(args, index, name)?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("<{}> must be a number, got '{}'", name, raw))
}

fn page(args: &[&str], from: usize) -> Result<(usize, usize)> {
    let offset = if args.len() > from { num(args, from, "offset")? } else { 0 };
    let limit = if args.len() > from + 1 { num(args, from + 1, "limit")? } else { 20 };
    Ok((offset, limit))
}

/// Parse `[--training] <task> <owner> <model> [payload...]`.
fn submit_request(args: &[&str]) -> Result<TaskRequest> {
    let (kind, args) = match args {
        ["--training", rest @ ..] => (TaskKind::Training, rest),
        _ => (TaskKind::Inference, args),
    };
    let request = TaskRequest::new(
        arg(args, 0, "task")?,
        arg(args, 1, "owner")?,
        arg(args, 2, "model")?,
    )
    .kind(kind)
    .payload(args.get(3..).unwrap_or_default().join(" "));
    Ok(request)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_task(task: &Task) {
    println!(
        "{} owner={} model={} kind={:?} cost={} state={}",
        task.id, task.owner_id, task.model_id, task.kind, task.cost, task.state
    );
    if let Some(result) = &task.result {
        println!("  result: {}", String::from_utf8_lossy(result));
    }
    if let Some(reason) = &task.failure {
        println!("  failure: {}", reason);
    }
}

fn print_reconciliation(outcome: &Reconciliation) {
    if outcome.is_duplicate() {
        println!("[duplicate report, nothing changed]");
    }
    print_task(outcome.task());
}

impl Session {
    fn require_admin(&self) -> Result<(), EmrisError> {
        self.service.check_admin_access(&self.admin_token)
    }

    async fn dispatch(&mut self, args: &[&str]) -> Result<()> {
        let service = &self.service;
        match args {
            ["admin", token] => {
                self.admin_token = token.to_string();
                println!("admin token set");
            }
            ["user", "add", ..] => {
                let user = service
                    .register_user(
                        arg(args, 2, "id")?,
                        num(args, 3, "resources")?,
                        num(args, 4, "rewards")?,
                        num(args, 5, "tokens")?,
                    )
                    .await?;
                print_json(&user)?;
            }
            ["user", "show", id] => match service.get_user(id).await {
                Some(user) => print_json(&user)?,
                None => println!("no such user: {}", id),
            },
            ["user", "set", ..] => {
                let id = arg(args, 2, "id")?;
                service
                    .update_user_resources(id, num(args, 3, "resources")?)
                    .await?;
                println!("ok");
            }
            ["model", "add", ..] => {
                self.require_admin()?;
                let model = service
                    .register_model(arg(args, 2, "id")?, num(args, 3, "min_resources")?)
                    .await?;
                print_json(&model)?;
            }
            ["model", "chunk", ..] => {
                self.require_admin()?;
                let data = arg(args, 4, "data")?.as_bytes().to_vec();
                service
                    .distribute_model_chunks(arg(args, 2, "id")?, num(args, 3, "index")?, data)
                    .await?;
                println!("ok");
            }
            ["model", "activate", id] => {
                self.require_admin()?;
                service.activate_model(id).await?;
                println!("ok");
            }
            ["model", "deactivate", id] => {
                self.require_admin()?;
                service.deactivate_model(id).await?;
                println!("ok");
            }
            ["model", "show", id] => match service.get_model(id).await {
                Some(model) => {
                    print_json(&model)?;
                    let missing = service.get_missing_chunks(id).await?;
                    if !missing.is_empty() {
                        println!("missing chunks: {:?}", missing);
                    }
                }
                None => println!("no such model: {}", id),
            },
            ["model", "list", ..] => {
                let (offset, limit) = page(args, 2)?;
                print_json(&service.get_active_models(offset, limit).await)?;
            }
            ["model", "needy", ..] => {
                let (offset, limit) = page(args, 2)?;
                print_json(&service.get_models_needing_resources(offset, limit).await)?;
            }
            ["chunk", "done", ..] => {
                let first = service
                    .submit_computed_chunk(
                        arg(args, 2, "model")?,
                        num(args, 3, "index")?,
                        arg(args, 4, "worker")?,
                    )
                    .await?;
                println!("{}", if first { "rewarded" } else { "already completed" });
            }
            ["submit", rest @ ..] => {
                let request = submit_request(rest)?;
                if request.kind == TaskKind::Training {
                    self.require_admin()?;
                }
                let task = service.submit_task(request).await?;
                print_task(&task);
            }
            ["result", task_id, output @ ..] => {
                let outcome = service.report_task_result(task_id, output.join(" ")).await?;
                print_reconciliation(&outcome);
            }
            ["fail", task_id, reason @ ..] => {
                let outcome = service
                    .report_task_failure(task_id, &reason.join(" "))
                    .await?;
                print_reconciliation(&outcome);
            }
            ["task", id] => print_task(&service.get_task(id).await?),
            ["tasks", owner] => {
                for task in service.get_tasks_for_owner(owner).await {
                    print_task(&task);
                }
            }
            ["tick"] => {
                service.tick().await;
                println!("ok");
            }
            ["help"] => println!("{}", HELP),
            _ => bail!("unrecognized command, try 'help'"),
        }
        Ok(())
    }
}

async fn run_console(mut session: Session) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    println!("Type 'help' for commands, 'quit' to exit.\n");

    loop {
        let line = match rl.readline("emris> ") {
            Ok(line) => line,
            Err(_) => break,
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        let _ = rl.add_history_entry(line);
        let args: Vec<&str> = line.split_whitespace().collect();

        if let Err(e) = session.dispatch(&args).await {
            match e.downcast_ref::<EmrisError>() {
                Some(err) => println!("error[{}]: {}", err.kind(), err),
                None => println!("error: {}", e),
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    if let Err(e) = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("emris=info")),
        )
        .try_init()
    {
        eprintln!("Warning: tracing init failed: {}", e);
    }

    let config = load_config()?;
    let service = TaskManagerService::new(config)?;
    let refill = service.spawn_refill();

    println!(
        "emris ready (bucket {} / refill {} every {}ms)",
        service.config().bucket_capacity,
        service.config().refill_amount,
        service.config().refill_interval_ms,
    );

    let result = run_console(Session {
        service,
        admin_token: String::new(),
    })
    .await;

    refill.stop().await;

    result
}

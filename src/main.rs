use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use codebox::config::{CliArgs, Command, Config, load_config};
use codebox::executor::Executor;
use codebox::host::{HostController, RunOutcome};
use codebox::queue::JobQueue;
use codebox::web_server::build_server;
use codebox::worker::worker;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    match CliArgs::parse().command {
        Command::Serve {
            config_path,
            workers,
        } => serve(config_path, workers).await,
        Command::Run {
            executor,
            origin,
            code,
            tests,
            cases,
            function_name,
            timeout,
        } => {
            let passed = submit(
                &executor,
                origin,
                &code,
                &tests,
                cases.as_deref(),
                &function_name,
                Duration::from_secs(timeout),
            )
            .await
            .map_err(std::io::Error::other)?;

            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn serve(config_path: Option<PathBuf>, workers: Option<u8>) -> std::io::Result<()> {
    let Config {
        server: server_config,
        executor: mut executor_config,
    } = load_config(config_path.as_ref())?;

    if let Some(workers) = workers {
        executor_config.workers = workers;
    }
    if executor_config.workers == 0 {
        return Err(std::io::Error::other(
            "The number of executor workers must not be 0",
        ));
    }

    let hostname = executor_config
        .hostname
        .clone()
        .unwrap_or_else(|| server_config.address());
    let executor_config = Arc::new(executor_config);
    let job_queue = Arc::new(JobQueue::new());
    let executor = Arc::new(Executor::new(&executor_config, &hostname, job_queue.clone()));
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 0..executor_config.workers {
        workers.spawn(worker(
            i,
            executor_config.clone(),
            job_queue.clone(),
            shutdown_token.clone(),
        ));
    }

    let server = build_server(server_config, executor)?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {:?}", res_worker);
        }
    }

    // 1. Stop accepting messages, letting in-flight ones finish
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        match res {
            Ok(Err(e)) => log::error!("Worker finished with error: {e:#}"),
            Err(e) if e.is_panic() => log::error!("Worker handle panicked: {:?}", e),
            Err(e) => log::error!("Worker handle finished with error: {:?}", e),
            Ok(Ok(())) => {}
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}

async fn submit(
    executor_url: &str,
    origin: String,
    code: &Path,
    tests: &Path,
    cases: Option<&Path>,
    function_name: &str,
    timeout: Duration,
) -> anyhow::Result<bool> {
    use anyhow::Context;

    let code = std::fs::read_to_string(code)
        .with_context(|| format!("Failed to read {}", code.display()))?;
    let test_code = std::fs::read_to_string(tests)
        .with_context(|| format!("Failed to read {}", tests.display()))?;
    let test_cases: Vec<Vec<Value>> = match cases {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&text).context("Test cases must be an array of arrays")?
        }
        None => Vec::new(),
    };

    let host = HostController::new(executor_url, origin, timeout)?;
    let report = host
        .run_code(&code, &test_code, test_cases, function_name)
        .await?;

    println!(
        "request {} ({} -> {})",
        report.request_id, report.started_at, report.finished_at
    );
    match &report.outcome {
        RunOutcome::Completed {
            result,
            tally,
            passed,
        } => {
            for line in &result.logs {
                println!("  | {line}");
            }
            for record in &result.test_results {
                let suite = if record.parent_title.is_empty() {
                    String::new()
                } else {
                    format!("{} > ", record.parent_title)
                };
                println!("  [{:?}] {suite}{}", record.status, record.title);
                if let Some(error) = &record.error {
                    println!("      {error}");
                }
            }
            println!("returns: {}", result.message);
            println!("invocation time: {:.3} ms", result.time_taken);
            println!(
                "{} passed, {} failed: {}",
                tally.passed,
                tally.failed,
                if *passed { "SUCCESS" } else { "FAILURE" }
            );
        }
        RunOutcome::Failed(error) => println!("{error}"),
        RunOutcome::NoOutput => println!("No output received from the executor"),
        RunOutcome::Discarded => println!("Reply did not match the request"),
    }

    Ok(report.outcome.passed())
}

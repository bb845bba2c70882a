use clap::{Parser, Subcommand};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{exit, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(author, version, about = "Developer tasks for the Signalbox workspace")]
struct Cli {
    #[command(subcommand)]
    command: Task,
}

#[derive(Subcommand)]
enum Task {
    #[command(about = "Run `cargo fmt --all`")]
    Fmt,
    #[command(about = "Run format + clippy lint checks")]
    Lint,
    #[command(about = "Execute `cargo test --workspace`")]
    Test,
    #[command(about = "Run fmt + clippy + test sequence")]
    Ci,
    #[command(about = "Launch the server with metrics and drive a join/join/status exchange")]
    CiBrokerSmoke,
}

fn main() {
    let cli = Cli::parse();

    let workspace_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(|p| p.to_path_buf())
        .expect("workspace root");

    let result = match cli.command {
        Task::Fmt => run_commands(&workspace_root, [("cargo", &["fmt", "--all"])]),
        Task::Lint => run_commands(
            &workspace_root,
            [
                ("cargo", &["fmt", "--all", "--", "--check"]),
                ("cargo", &["clippy", "--workspace", "--", "-D", "warnings"]),
            ],
        ),
        Task::Test => run_commands(&workspace_root, [("cargo", &["test", "--workspace"])]),
        Task::Ci => run_ci(&workspace_root),
        Task::CiBrokerSmoke => run_ci_broker_smoke(&workspace_root),
    };

    if !result {
        exit(1);
    }
}

fn run_ci(workspace_root: &Path) -> bool {
    if !run_commands(
        workspace_root,
        [
            ("cargo", &["fmt", "--all", "--", "--check"]),
            ("cargo", &["clippy", "--workspace", "--", "-D", "warnings"]),
        ],
    ) {
        return false;
    }
    run_commands(workspace_root, [("cargo", &["test", "--workspace"])])
}

fn run_ci_broker_smoke(workspace_root: &Path) -> bool {
    if !run_commands(
        workspace_root,
        [(
            "cargo",
            &["build", "--features", "metrics", "-p", "signalbox-server"],
        )],
    ) {
        return false;
    }

    let port = match reserve_port() {
        Some(port) => port,
        None => {
            eprintln!("failed to reserve a free TCP port");
            return false;
        }
    };
    let bind_addr = format!("127.0.0.1:{port}");

    let mut child = match Command::new("cargo")
        .args([
            "run",
            "--quiet",
            "--features",
            "metrics",
            "-p",
            "signalbox-server",
            "--",
            "--bind-addr",
            &bind_addr,
            "--metrics-enabled",
            "true",
        ])
        .env("RUST_LOG", "warn")
        .current_dir(workspace_root)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            eprintln!("failed to launch signalbox-server: {err}");
            return false;
        }
    };

    let result = match Client::builder().timeout(Duration::from_secs(5)).build() {
        Ok(client) => {
            let base_url = format!("http://{bind_addr}");
            if !wait_for_ready(&client, &format!("{base_url}/ready"), Duration::from_secs(30)) {
                eprintln!("server failed to report ready state within timeout");
                false
            } else {
                match exercise_broker(&client, &format!("{base_url}/broker")) {
                    Ok(()) => verify_metrics(&client, &format!("{base_url}/metrics")),
                    Err(err) => {
                        eprintln!("broker smoke failed: {err}");
                        false
                    }
                }
            }
        }
        Err(err) => {
            eprintln!("failed to build HTTP client: {err}");
            false
        }
    };

    if let Err(err) = child.kill() {
        if err.kind() != std::io::ErrorKind::InvalidInput {
            eprintln!("failed to terminate server process: {err}");
        }
    }
    let _ = child.wait();

    result
}

fn reserve_port() -> Option<u16> {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .ok()
}

fn wait_for_ready(client: &Client, url: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match client.get(url).send() {
            Ok(response) if response.status().is_success() => return true,
            Ok(_) | Err(_) => sleep(Duration::from_millis(500)),
        }
    }
    false
}

fn broker_call(client: &Client, url: &str, request: Value) -> Result<Value, String> {
    let response = client
        .post(url)
        .json(&request)
        .send()
        .map_err(|err| format!("request failed: {err}"))?;
    let status = response.status();
    let body: Value = response
        .json()
        .map_err(|err| format!("unreadable response body: {err}"))?;
    if status != StatusCode::OK {
        return Err(format!("unexpected status {status}: {body}"));
    }
    Ok(body)
}

fn peer_id(joined: &Value) -> Result<String, String> {
    joined["PeerID"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("join response without PeerID: {joined}"))
}

fn exercise_broker(client: &Client, url: &str) -> Result<(), String> {
    let channel = format!("smoke-{}", std::process::id());

    let first = broker_call(client, url, json!({"Operation": "join", "ChannelID": channel}))?;
    if first["Peers"] != json!([]) {
        return Err(format!("first join saw existing peers: {first}"));
    }
    let first_id = peer_id(&first)?;

    let second = broker_call(client, url, json!({"Operation": "join", "ChannelID": channel}))?;
    if second["Peers"] != json!([first_id]) {
        return Err(format!("second join did not see the first peer: {second}"));
    }
    let second_id = peer_id(&second)?;

    broker_call(
        client,
        url,
        json!({
            "Operation": "add offer",
            "SourcePeerID": first_id,
            "TargetPeerID": second_id,
            "Offer": "smoke-offer",
        }),
    )?;

    let status = broker_call(
        client,
        url,
        json!({"Operation": "get status", "SourcePeerID": second_id, "ChannelID": channel}),
    )?;
    if status["Peers"] != json!([first_id, second_id]) {
        return Err(format!("status peers out of order: {status}"));
    }
    if status["Offers"] != json!([{"SourceID": first_id, "Offer": "smoke-offer"}]) {
        return Err(format!("offer missing from mailbox: {status}"));
    }
    Ok(())
}

fn verify_metrics(client: &Client, url: &str) -> bool {
    match client.get(url).send() {
        Ok(response) if response.status() == StatusCode::OK => match response.text() {
            Ok(body) => {
                if body.contains("signalbox_broker_operations_total") {
                    true
                } else {
                    eprintln!("metrics endpoint responded without broker counters");
                    false
                }
            }
            Err(err) => {
                eprintln!("failed to read metrics body: {err}");
                false
            }
        },
        Ok(response) => {
            eprintln!("unexpected metrics response status: {}", response.status());
            false
        }
        Err(err) => {
            eprintln!("failed to call metrics endpoint: {err}");
            false
        }
    }
}

fn run_commands<const N: usize>(workspace_root: &Path, commands: [(&str, &[&str]); N]) -> bool {
    for (program, args) in commands {
        let status = Command::new(program)
            .args(args)
            .current_dir(workspace_root)
            .status();

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                eprintln!("command '{program} {}' failed with {status}", args.join(" "));
                return false;
            }
            Err(err) => {
                eprintln!("failed to spawn '{program}': {err}");
                return false;
            }
        }
    }
    true
}

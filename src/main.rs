use anyhow::Context;
use botpanel::config::PanelConfig;
use botpanel::console::render_line;
use botpanel::controller::{Notice, Severity, SyncController};
use botpanel::ports::http_api::HttpBotApi;
use botpanel::sync::TokioClock;
use chrono::{DateTime, FixedOffset, Utc};
use env_logger::Builder;
use std::env;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const REFRESH_INTERVAL: Duration = Duration::from_millis(250);

const HELP: &str = "commands: start | stop | send <text> | set KEY=VALUE | save | config | status | quit";

fn print_notice(notice: &Notice) {
    let tag = match notice.severity {
        Severity::Success => "ok",
        Severity::Warning => "warn",
        Severity::Error => "error",
    };
    println!("({}) {}", tag, notice.message);
}

/// Prints output lines from the first one that changed since the last refresh.
fn refresh(controller: &SyncController, shown: &mut Vec<String>) {
    let snapshot = controller.snapshot();
    let first_changed = shown
        .iter()
        .zip(snapshot.output.iter())
        .position(|(old, new)| old != new)
        .unwrap_or_else(|| shown.len().min(snapshot.output.len()));
    if snapshot.output.len() < shown.len() && first_changed == snapshot.output.len() {
        println!("-- log reset --");
    }
    for line in &snapshot.output[first_changed..] {
        println!("{}", render_line(line));
    }
    *shown = snapshot.output;

    for notice in controller.drain_notices() {
        print_notice(&notice);
    }
}

async fn handle_command(controller: &SyncController, line: &str) -> bool {
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    match command {
        "start" => {
            controller.start().await;
        }
        "stop" => {
            controller.stop().await;
        }
        "send" => {
            controller.set_input(rest);
            controller.submit_input().await;
        }
        "set" => match rest.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                controller.set_field(key.trim(), value.trim())
            }
            _ => println!("usage: set KEY=VALUE"),
        },
        "save" => {
            controller.save_current().await;
        }
        "config" => {
            for (key, value) in controller.config() {
                println!("{} = {}", key, value);
            }
        }
        "status" => {
            let snapshot = controller.snapshot();
            println!(
                "bot: {:?}{} | {} log lines",
                snapshot.run_state,
                if snapshot.saving { " (saving)" } else { "" },
                snapshot.output.len()
            );
        }
        "quit" | "exit" => return false,
        "" => {}
        _ => println!("{}", HELP),
    }
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with local timezone
    let offset_seconds = env::var("TIMEZONE_OFFSET")
        .unwrap_or_else(|_| "0".to_string())
        .parse::<i32>()
        .expect("Invalid TIMEZONE_OFFSET");
    let offset = FixedOffset::east_opt(offset_seconds).expect("Invalid offset");
    Builder::new()
        .format(move |buf, record| {
            let utc_now: DateTime<Utc> = Utc::now();
            let local_now = utc_now.with_timezone(&offset);
            writeln!(
                buf,
                "{} [{}] - {}",
                local_now.format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .parse_filters(
            &env::var("RUST_LOG").unwrap_or_else(|_| "info,reqwest=warn,hyper=warn".to_string()),
        )
        .init();

    let git_hash = option_env!("BOTPANEL_GIT_HASH").unwrap_or("unknown");
    log::info!("botpanel git: {}", git_hash);

    let cfg = PanelConfig::from_env_or_yaml().expect("invalid panel config");
    let api = HttpBotApi::new(&cfg.api_base_url, cfg.request_timeout)
        .context("failed to build HTTP client")?;
    log::info!("[PANEL] controlling bot at {}", api.base_url());
    let controller = Arc::new(SyncController::new(
        &cfg,
        Arc::new(api),
        Arc::new(TokioClock),
    ));

    controller.load_initial().await;
    controller.start_output_polling();

    let printer = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut shown = Vec::new();
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            loop {
                ticker.tick().await;
                refresh(&controller, &mut shown);
            }
        })
    };

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !handle_command(&controller, line.trim()).await {
            break;
        }
    }

    controller.teardown().await;
    printer.abort();
    Ok(())
}

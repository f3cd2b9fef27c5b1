use std::path::PathBuf;
use std::time::Duration;

use capturer::{capture_with, CaptureConfig, OutputResult, StdStream};
use clap::Parser;
use log::{error, info};
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(name = "capturer-demo")]
#[command(version = "0.0.2")]
#[command(about = "Captures the stdout and stderr of a noisy concurrent workload")]
struct Args {
    /// TOML file with capture settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Echo captured output to the real streams while capturing
    #[arg(long, action = clap::ArgAction::SetTrue)]
    passthrough: bool,

    /// Pump read buffer size in bytes
    #[arg(long, env = "CAPTURER_READ_BUFFER_SIZE")]
    read_buffer_size: Option<usize>,

    /// Print the captured output as JSON
    #[arg(long, action = clap::ArgAction::SetTrue)]
    json: bool,
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CaptureConfig::from_file(path).unwrap_or_else(|e| {
            error!("Unable to import configuration from {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => CaptureConfig::default(),
    };
    if args.passthrough {
        config = config.with_passthrough(true);
    }
    if let Some(size) = args.read_buffer_size {
        config = config.with_read_buffer_size(size);
    }
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            error!("Unable to start the tokio runtime: {}", e);
            std::process::exit(1);
        });

    println!(" --- Before capture start --- ");
    let output = capture_with(&config, || runtime.block_on(noisy_workload())).unwrap_or_else(|e| {
        error!("Capture failed: {}", e);
        std::process::exit(1);
    });
    println!(" --- After capture end --- ");
    info!("Captured {} bytes in {:?}", output.total_bytes(), output.elapsed);

    if args.json {
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Unable to serialize captured output: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        print_report(&output);
    }
}

fn print_report(output: &OutputResult) {
    print!("\n\n");
    print!("Captured stdout:\n{}\n\n", indent(&output.stdout));
    print!("Captured stderr:\n{}\n\n", indent(&output.stderr));
    print!("Captured combined:\n{}\n\n", indent(&output.combined));
}

fn indent(text: &str) -> String {
    prefix_lines(text, "  ")
}

fn prefix_lines(lines: &str, prefix: &str) -> String {
    format!("{}{}", prefix, lines.replace('\n', &format!("\n{}", prefix)))
}

fn say(stream: StdStream, line: &str) {
    match stream {
        StdStream::Stdout => println!("{}", line),
        StdStream::Stderr => eprintln!("{}", line),
    }
}

async fn say_later(stream: StdStream, delay_ms: u64, line: String) {
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    say(stream, &line);
}

/// Writes to both streams from this task and from delayed tasks, joining all
/// of them before returning.
async fn noisy_workload() {
    say(StdStream::Stdout, "This should be stdout.");
    say(StdStream::Stderr, "This should be stderr.");

    let mut tasks = JoinSet::new();
    tasks.spawn(say_later(StdStream::Stdout, 1, "Not much wait on this one.".to_string()));
    tasks.spawn(say_later(
        StdStream::Stderr,
        1500,
        "This stderr statement took a long time to come through.".to_string(),
    ));
    for ms in (50..=500).rev().step_by(50) {
        say(
            StdStream::Stdout,
            &format!("Delaying stdout message {} ms and stderr message {} ms", ms, ms + 25),
        );
        tasks.spawn(say_later(StdStream::Stdout, ms, format!("stdout delayed {} ms", ms)));
        tasks.spawn(say_later(StdStream::Stderr, ms + 25, format!("stderr delayed {} ms", ms + 25)));
    }

    say(StdStream::Stdout, "Waiting for tasks to finish.");
    while tasks.join_next().await.is_some() {}
    say(StdStream::Stdout, "All tasks done.");
    say(StdStream::Stderr, "Some final stderr output.");
    println!("Just a normal println");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_lines() {
        assert_eq!(indent("a\nb"), "  a\n  b");
        assert_eq!(prefix_lines("", "> "), "> ");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "capturer-demo",
            "--passthrough",
            "--read-buffer-size",
            "1024",
            "--json",
        ])
        .unwrap_or_else(|e| panic!("{}", e));
        assert!(args.passthrough);
        assert!(args.json);
        assert_eq!(args.read_buffer_size, Some(1024));
        assert!(args.config.is_none());
    }
}

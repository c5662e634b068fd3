extern crate pagewatch;
extern crate simplelog;

#[macro_use]
extern crate log;

use std::env;
use std::process;

use chrono::Utc;
use simplelog::{ColorChoice, CombinedLogger, LevelFilter, TermLogger, TerminalMode};

use pagewatch::{dump, statistics, Config};

fn usage() -> ! {
    eprintln!("usage: pagewatch [-v] [--no-frames] [--no-shift-check] <pid>");
    process::exit(2);
}

fn main() {
    let mut level = LevelFilter::Info;
    let mut config = Config::default();
    let mut pid: Option<u32> = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-v" => level = LevelFilter::Debug,
            "--no-frames" => config = config.with_frame_attributes(false),
            "--no-shift-check" => config = config.with_verify_page_shift(false),
            other => match other.parse() {
                Ok(p) if pid.is_none() => pid = Some(p),
                _ => usage(),
            },
        }
    }
    let pid = match pid {
        Some(pid) => pid,
        None => usage(),
    };

    if let Err(e) = CombinedLogger::init(vec![TermLogger::new(
        level,
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )]) {
        eprintln!("unable to set up logging: {}", e);
    }

    let start_time = Utc::now();
    let memory = match dump::capture(pid, &config) {
        Ok(memory) => memory,
        Err(e) => {
            error!("pid {}: {}", pid, e);
            process::exit(1);
        }
    };

    for segment in &memory.segments {
        println!(
            "{} [{} of {} pages present]",
            segment.region,
            segment.present_pages(),
            segment.total_pages()
        );
    }
    println!();
    println!("{}", statistics::page_analytics(&memory));
    info!(
        "---------- Completed analysis of pid {} in {} ms ----------",
        pid,
        (Utc::now() - start_time).num_milliseconds()
    );
}

// Output formatting and display for CLI

use crate::config::ProcessSpec;
use crate::process::{InstanceState, InstanceStatus};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a formatted table of instances
pub fn print_status_table(statuses: &[InstanceStatus]) {
    #[derive(Tabled)]
    struct InstanceRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "#")]
        index: usize,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Last Exit")]
        last_exit: String,
    }

    if statuses.is_empty() {
        println!("{}", "No processes are supervised".yellow());
        return;
    }

    let rows: Vec<InstanceRow> = statuses
        .iter()
        .map(|s| InstanceRow {
            name: truncate(&s.id.name, 20),
            index: s.id.index,
            state: format_state_colored(&s.state),
            pid: s
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            memory: format_memory(s.memory_usage),
            uptime: format_duration(&s.uptime()),
            restarts: format!("{} ({} total)", s.restarts, s.total_restarts),
            last_exit: s
                .last_exit
                .as_ref()
                .map(|exit| exit.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} instance(s)", statuses.len())
            .dimmed()
            .italic()
    );
}

/// Print a formatted table of parsed specs
pub fn print_spec_table(specs: &[ProcessSpec]) {
    #[derive(Tabled)]
    struct SpecRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Command")]
        command: String,
        #[tabled(rename = "Instances")]
        instances: usize,
        #[tabled(rename = "Autorestart")]
        autorestart: String,
        #[tabled(rename = "Max Restarts")]
        max_restarts: u32,
        #[tabled(rename = "Min Uptime")]
        min_uptime: String,
        #[tabled(rename = "Delay")]
        restart_delay: String,
        #[tabled(rename = "Memory Limit")]
        memory_limit: String,
    }

    let rows: Vec<SpecRow> = specs
        .iter()
        .map(|spec| {
            let (program, args) = spec.command_line();
            let command = std::iter::once(program.display().to_string())
                .chain(args)
                .collect::<Vec<_>>()
                .join(" ");

            SpecRow {
                name: truncate(&spec.name, 20),
                command: truncate(&command, 48),
                instances: spec.instances,
                autorestart: if spec.autorestart {
                    "yes".green().to_string()
                } else {
                    "no".yellow().to_string()
                },
                max_restarts: spec.max_restarts,
                min_uptime: format_millis(spec.min_uptime),
                restart_delay: format_millis(spec.restart_delay),
                memory_limit: spec
                    .max_memory_restart
                    .map(format_memory)
                    .unwrap_or_else(|| "-".to_string()),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
}

/// Format an instance state with color coding
fn format_state_colored(state: &InstanceState) -> String {
    match state {
        InstanceState::Running => state.to_string().green().to_string(),
        InstanceState::Starting
        | InstanceState::RestartPending
        | InstanceState::Stopping => state.to_string().yellow().to_string(),
        InstanceState::Exited | InstanceState::MemoryExceeded => {
            state.to_string().magenta().to_string()
        }
        InstanceState::Stopped => state.to_string().bright_black().to_string(),
        InstanceState::Failed => state.to_string().red().bold().to_string(),
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Config-style durations: `1500ms`, `4s`
fn format_millis(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis >= 1000 && millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}

/// Format memory usage in human-readable format
fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Create a spinner for long operations
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Finish a progress bar with success
pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

/// Finish a progress bar with error
pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}

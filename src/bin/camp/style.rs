//! Terminal styling utilities

pub fn style_cyan(s: &str) -> String {
    format!("\x1b[36m{}\x1b[0m", s)
}

pub fn style_green(s: &str) -> String {
    format!("\x1b[32m{}\x1b[0m", s)
}

pub fn style_red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}

pub fn style_yellow(s: &str) -> String {
    format!("\x1b[33m{}\x1b[0m", s)
}

pub fn style_dim(s: &str) -> String {
    format!("\x1b[2m{}\x1b[0m", s)
}

pub fn style_bold(s: &str) -> String {
    format!("\x1b[1m{}\x1b[0m", s)
}

pub fn print_success(msg: &str) {
    println!("{} {}", style_green("✓"), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", style_red("✗"), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", style_yellow("⚠"), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", style_cyan("ℹ"), msg);
}

pub fn print_header(title: &str) {
    println!();
    println!("{}", style_bold(title));
    println!("{}", "─".repeat(title.chars().count()));
}

/// Shorten text to `max` characters for table cells
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}

/// Coloured severity label, padded to `width` before the escape codes go on
pub fn style_severity(severity: &str, width: usize) -> String {
    let cell = format!("{:<width$}", severity, width = width);
    match severity {
        "URGENT" => style_red(&cell),
        "HIGH" => style_yellow(&cell),
        "MEDIUM" => style_cyan(&cell),
        _ => style_dim(&cell),
    }
}

/// Coloured status label, padded like [`style_severity`]
pub fn style_status(status: &str, width: usize) -> String {
    let cell = format!("{:<width$}", status, width = width);
    match status {
        "FIXED" => style_green(&cell),
        "NOT_A_BUG" => style_dim(&cell),
        _ => cell,
    }
}

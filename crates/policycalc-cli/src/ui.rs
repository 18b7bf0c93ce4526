//! UI helpers for CLI display.

use console::style;

/// Check if color output is disabled via `NO_COLOR` env var.
#[must_use]
pub fn is_color_disabled() -> bool {
    std::env::var_os("NO_COLOR").is_some()
}

fn tag<'a>(text: &'a str, color: fn(console::StyledObject<&'a str>) -> console::StyledObject<&'a str>) -> String {
    if is_color_disabled() {
        text.to_string()
    } else {
        color(style(text)).bold().to_string()
    }
}

/// Print a styled header.
pub fn print_header(text: &str) {
    if is_color_disabled() {
        println!("=== {text} ===");
    } else {
        println!("{}", style(format!("=== {text} ===")).bold().cyan());
    }
}

/// Print a success message.
pub fn print_success(text: &str) {
    println!("{} {text}", tag("[OK]", console::StyledObject::green));
}

/// Print a warning to stderr.
pub fn print_warning(text: &str) {
    eprintln!("{} {text}", tag("[WARN]", console::StyledObject::yellow));
}

/// Print an error message to stderr.
pub fn print_error(text: &str) {
    eprintln!("{} {text}", tag("[ERROR]", console::StyledObject::red));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_keeps_text() {
        assert!(tag("[OK]", console::StyledObject::green).contains("[OK]"));
    }

    #[test]
    fn print_functions_do_not_panic() {
        print_header("Reform impact");
        print_success("1 simulation(s), 100.0% in 40.0s");
        print_warning("timed out");
        print_error("Unable to reach the calculation service");
        print_header("");
    }
}

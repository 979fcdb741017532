use colored::Colorize;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_step(label: &str, detail: &str) {
    println!("{} {}", format!("{label}:").cyan(), detail);
}

/// Shortens token values for display.
pub fn abbreviate(value: &str) -> String {
    const KEEP: usize = 12;
    if value.chars().count() <= KEEP {
        return value.to_string();
    }
    let head: String = value.chars().take(KEEP).collect();
    format!("{head}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate("short"), "short");
        assert_eq!(abbreviate("0123456789abcdef"), "0123456789ab…");
    }
}

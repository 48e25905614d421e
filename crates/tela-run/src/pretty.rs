use tela_cli_common::context;
use tela_tap::TestResult;

/// Totals collected while reformatting a TAP stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub planned: i32,
    pub passed: i32,
    pub failed: i32,
    pub skipped: i32,
    pub warnings: i32,
}

pub fn header(plan: i32) {
    let c = &context().color;
    if plan > 0 {
        println!("{}Running {plan} tests{}", c.bold, c.reset);
    } else {
        println!("{}Running tests{}", c.bold, c.reset);
    }
}

fn trailer(result: TestResult) -> String {
    let c = &context().color;
    let (color, text) = match result {
        TestResult::Pass => (c.green, "pass"),
        TestResult::Fail => (c.red, "fail"),
        TestResult::Skip => (c.blue, "skip"),
        TestResult::Todo => (c.red, "todo"),
    };
    format!("[{color}{text}{}]", c.reset)
}

fn numdots() -> i32 {
    std::env::var("TELA_NUMDOTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(31)
}

fn count_digits(mut num: i32) -> usize {
    let mut digits = 1;
    while num >= 10 {
        num /= 10;
        digits += 1;
    }
    digits
}

fn padded_name(name: &str, numdots: i32) -> String {
    let dots = usize::try_from(numdots).unwrap_or(0);
    if name.len() < dots {
        format!("{name} {}", ".".repeat(dots - name.len() - 1))
    } else {
        name.to_string()
    }
}

/// Display a formatted result line for one test.
pub fn result(name: &str, num: i32, plan: i32, result: TestResult, reason: Option<&str>) {
    let c = &context().color;
    let numdots = numdots();
    let digits = if plan > 0 {
        count_digits(plan)
    } else {
        usize::try_from(-plan).unwrap_or(0)
    };

    let counter = if plan > 0 {
        format!("({num:>digits$}/{plan:>digits$}) ")
    } else {
        format!("({num:>digits$}) ")
    };

    let reason = reason.unwrap_or("").trim();
    print!("{}{counter}{}", c.bold, c.reset);
    if numdots >= 0 {
        /* (1/2) test1 ........... [skip] Missing device */
        print!("{}{}{} ", c.bold, padded_name(name, numdots), c.reset);
        print!("{}", trailer(result));
        if !reason.is_empty() {
            print!(" {reason}");
        }
    } else {
        /* (1/2) [skip] test1 (Missing device) */
        print!("{} ", trailer(result));
        print!("{}{name}{}", c.bold, c.reset);
        if !reason.is_empty() {
            print!(" ({reason})");
        }
    }
    println!();
}

/// Display the summary footer.
pub fn footer(stats: &Stats, logfile: Option<&str>) {
    let c = &context().color;
    let total = stats.passed + stats.failed + stats.skipped;
    let missing = stats.planned - total;

    print!("{}{total} tests executed{}, ", c.bold, c.reset);
    if stats.passed > 0 {
        print!("{}", c.green);
    }
    print!("{} passed{}, ", stats.passed, c.reset);
    if stats.failed > 0 || missing > 0 {
        print!("{}", c.red);
    }
    print!("{} failed", stats.failed);
    if missing > 0 {
        print!(" + {missing} missing");
    }
    print!(",{} ", c.reset);
    if stats.skipped > 0 {
        print!("{}", c.blue);
    }
    println!("{} skipped {}", stats.skipped, c.reset);

    if let Some(log) = logfile {
        let path = std::fs::canonicalize(log)
            .map_or_else(|_| log.to_string(), |p| p.display().to_string());
        println!("Result log stored in {path}");
    }

    if stats.warnings == 1 {
        println!("{}Note: There was 1 warning{}", c.red, c.reset);
    } else if stats.warnings > 1 {
        println!(
            "{}Note: There were {} warnings{}",
            c.red, stats.warnings, c.reset
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_counting() {
        assert_eq!(count_digits(1), 1);
        assert_eq!(count_digits(9), 1);
        assert_eq!(count_digits(10), 2);
        assert_eq!(count_digits(123), 3);
    }

    #[test]
    fn name_padding() {
        assert_eq!(padded_name("ab", 6), "ab ...");
        assert_eq!(padded_name("abcdef", 4), "abcdef");
    }
}

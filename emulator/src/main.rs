mod session;
mod store;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use delay_core::clock::{DEFAULT_CLOCK_KHZ, DEFAULT_TIMER_OFFSET, TickClock};
use delay_core::config::{DEFAULT_MIN_SPACING, EngineConfig};

use session::{Session, SessionOptions};

const USAGE: &str = "Usage: delay-emulator [--clock-khz <khz>] [--offset <ticks>] \
                     [--min-spacing <ticks>] [--store <path>] [--transcript <path>]";

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(&options)?;
    let mut line = String::new();

    let clock = session.config().clock();
    writeln!(
        writer,
        "Trigger delay emulator ready ({} kHz tick, {} tick latency, {} tick spacing).",
        clock.clock_khz(),
        clock.timer_offset(),
        session.config().min_spacing()
    )?;
    writeln!(
        writer,
        "Type `help` for commands, `trigger` to fire an edge or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed)? {
            if response.starts_with("error: ") {
                eprintln!("{response}");
            } else {
                writeln!(writer, "{response}")?;
            }
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options(args: impl IntoIterator<Item = String>) -> Result<SessionOptions, String> {
    let mut clock_khz = DEFAULT_CLOCK_KHZ;
    let mut offset = DEFAULT_TIMER_OFFSET;
    let mut min_spacing = DEFAULT_MIN_SPACING;
    let mut options = SessionOptions::default();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg.clone(), None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {flag}"))
        };

        match flag.as_str() {
            "--clock-khz" => clock_khz = parse_number(&flag, &value()?)?,
            "--offset" => offset = parse_number(&flag, &value()?)?,
            "--min-spacing" => min_spacing = parse_number(&flag, &value()?)?,
            "--store" => options.store = Some(PathBuf::from(value()?)),
            "--transcript" => options.transcript = Some(PathBuf::from(value()?)),
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }

    if clock_khz == 0 {
        return Err("--clock-khz must be non-zero".to_string());
    }
    options.config = EngineConfig::new(TickClock::new(clock_khz, offset), min_spacing);
    Ok(options)
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid value `{value}` for {flag}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| (*arg).to_string()).collect()
    }

    #[test]
    fn defaults_match_reference_board() {
        let options = parse_options(args(&[])).unwrap();
        assert_eq!(options.config, EngineConfig::default());
        assert!(options.store.is_none());
    }

    #[test]
    fn flags_accept_separate_and_inline_values() {
        let options = parse_options(args(&[
            "--clock-khz",
            "1000",
            "--offset=4",
            "--min-spacing",
            "20",
            "--store=schedule.bin",
        ]))
        .unwrap();
        assert_eq!(options.config.clock().clock_khz(), 1000);
        assert_eq!(options.config.clock().timer_offset(), 4);
        assert_eq!(options.config.min_spacing(), 20);
        assert_eq!(options.store, Some(PathBuf::from("schedule.bin")));
    }

    #[test]
    fn bad_flags_are_reported() {
        assert!(parse_options(args(&["--offset"])).is_err());
        assert!(parse_options(args(&["--offset", "-1"])).is_err());
        assert!(parse_options(args(&["--clock-khz", "0"])).is_err());
        assert!(parse_options(args(&["--verbose"])).is_err());
    }
}
